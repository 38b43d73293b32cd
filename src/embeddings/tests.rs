use super::*;
use crate::chunking::{ChunkStrategy, chunk};

/// Deterministic embedder: counts of 'a', 'b' and 'c' plus a bias term
struct LetterEmbedder;

impl Embedder for LetterEmbedder {
    fn model_id(&self) -> &str {
        "letters"
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let count = |needle: char| text.chars().filter(|c| *c == needle).count() as f32;
                vec![count('A'), count('B'), count('C'), 0.1]
            })
            .collect())
    }
}

#[test]
fn chunk_then_embed_yields_one_vector_per_chunk() {
    let chunks = chunk("A\n\nB\n\nC", &ChunkStrategy::Paragraph).expect("should chunk");
    let vectors = LetterEmbedder.embed(&chunks).expect("should embed");

    assert_eq!(vectors.len(), chunks.len());
    assert!(vectors.iter().all(|v| v.len() == 4));
    assert_ne!(vectors[0], vectors[1]);
    assert_ne!(vectors[1], vectors[2]);
    assert_ne!(vectors[0], vectors[2]);

    let dimension = validate_batch(chunks.len(), &vectors, None).expect("batch should be valid");
    assert_eq!(dimension, Some(4));
}

#[test]
fn embed_one_is_a_batch_of_one() {
    let single = LetterEmbedder.embed_one("B").expect("should embed");
    let batch = LetterEmbedder
        .embed(&["B".to_string()])
        .expect("should embed");
    assert_eq!(vec![single], batch);
}

#[test]
fn validate_batch_rejects_count_mismatch() {
    let result = validate_batch(2, &[vec![1.0, 2.0]], None);
    assert!(matches!(result, Err(RagError::EmbeddingBackend(_))));
}

#[test]
fn validate_batch_rejects_ragged_vectors() {
    let result = validate_batch(2, &[vec![1.0, 2.0], vec![1.0]], None);
    assert!(matches!(result, Err(RagError::EmbeddingBackend(_))));
}

#[test]
fn validate_batch_rejects_unexpected_dimension() {
    let result = validate_batch(1, &[vec![1.0, 2.0, 3.0]], Some(2));
    assert!(matches!(result, Err(RagError::EmbeddingBackend(_))));
}

#[test]
fn validate_batch_rejects_empty_vectors() {
    let result = validate_batch(1, &[Vec::new()], None);
    assert!(matches!(result, Err(RagError::EmbeddingBackend(_))));
}

#[test]
fn empty_batch_keeps_known_dimension() {
    assert_eq!(
        validate_batch(0, &[], Some(768)).expect("empty batch is valid"),
        Some(768)
    );
    assert_eq!(validate_batch(0, &[], None).expect("empty batch is valid"), None);
}

#[test]
fn embedding_dimension_matches_vector() {
    let embedding = Embedding::new("chunk-1", vec![0.1, 0.2, 0.3]);
    assert_eq!(embedding.dimension(), 3);
    assert_eq!(embedding.chunk_id, "chunk-1");
}
