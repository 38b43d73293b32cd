// Embeddings module
// The embedder seam plus the vector record stored alongside each chunk

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

use crate::{RagError, Result};

/// Maps text to fixed-length vectors
///
/// Implementations must return exactly one vector per input, in input order,
/// and every vector produced by one instance must share the same dimension.
pub trait Embedder: Send + Sync {
    /// Stable identifier of the underlying model
    fn model_id(&self) -> &str;

    /// Embed a batch of texts
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text as a batch of one
    #[inline]
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .pop()
            .ok_or_else(|| RagError::EmbeddingBackend("backend returned no vector".to_string()))
    }
}

/// A vector associated with one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: String,
    pub vector: Vec<f32>,
}

impl Embedding {
    #[inline]
    pub fn new(chunk_id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            vector,
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// Check a backend response against the request it answers
///
/// Returns the shared dimension of the vectors. `expected_dimension` pins the
/// dimension when the embedder already knows it.
#[inline]
pub fn validate_batch(
    input_count: usize,
    vectors: &[Vec<f32>],
    expected_dimension: Option<usize>,
) -> Result<Option<usize>> {
    if vectors.len() != input_count {
        return Err(RagError::EmbeddingBackend(format!(
            "Mismatch between request and response counts: {} vs {}",
            input_count,
            vectors.len()
        )));
    }

    let mut dimension = expected_dimension;
    for (index, vector) in vectors.iter().enumerate() {
        if vector.is_empty() {
            return Err(RagError::EmbeddingBackend(format!(
                "backend returned an empty vector at position {}",
                index
            )));
        }
        match dimension {
            Some(expected) if expected != vector.len() => {
                return Err(RagError::EmbeddingBackend(format!(
                    "backend returned a {}-dimensional vector at position {}, expected {}",
                    vector.len(),
                    index,
                    expected
                )));
            }
            Some(_) => {}
            None => dimension = Some(vector.len()),
        }
    }

    Ok(dimension)
}
