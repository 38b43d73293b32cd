// LanceDB vector database module
// Named collections of chunk + embedding + metadata entries with similarity search


pub mod filter;
pub mod index_store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::chunking::Chunk;
use crate::embeddings::Embedding;
use crate::{RagError, Result};

pub use filter::MetadataFilter;
pub use index_store::{Collection, IndexStore, OpenMode};

/// Scalar value attached to an entry under a metadata key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Metadata recorded alongside each entry
pub type Metadata = BTreeMap<String, MetadataValue>;

impl MetadataValue {
    /// Equality across the scalar kinds; integers and floats compare numerically
    #[inline]
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Integer(a), Self::Float(b)) | (Self::Float(b), Self::Integer(a)) => {
                (*a as f64) == *b
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for MetadataValue {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::Text(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for MetadataValue {
    #[inline]
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    #[inline]
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    #[inline]
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for MetadataValue {
    #[inline]
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for MetadataValue {
    #[inline]
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    #[inline]
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Entry stored in a collection
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Embedding,
    pub metadata: Metadata,
    /// RFC 3339 timestamp of the insert that committed this entry
    pub created_at: String,
}

/// One hit returned by a similarity search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub id: String,
    pub chunk_text: String,
    pub source: String,
    /// Cosine distance in [0, 2]; lower is more similar
    pub distance: f32,
    pub metadata: Metadata,
}

impl QueryResult {
    #[inline]
    pub fn similarity_score(&self) -> f32 {
        1.0 - self.distance
    }
}

impl From<&IndexEntry> for QueryResult {
    #[inline]
    fn from(entry: &IndexEntry) -> Self {
        Self {
            id: entry.chunk.id.clone(),
            chunk_text: entry.chunk.text.clone(),
            source: entry.chunk.source.clone(),
            distance: 0.0,
            metadata: entry.metadata.clone(),
        }
    }
}

/// Collection names map to table names, so they are restricted to a portable alphabet
#[inline]
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RagError::InvalidRequest(
            "collection name cannot be empty".to_string(),
        ));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(RagError::InvalidRequest(format!(
            "collection name {:?} contains invalid character {:?}",
            name, bad
        )));
    }

    if name.starts_with('.') {
        return Err(RagError::InvalidRequest(format!(
            "collection name {:?} cannot start with '.'",
            name
        )));
    }

    Ok(())
}

/// Cosine distance clamped to [0, 2]; a zero vector is at distance 1.0 from everything
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;

    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    (1.0 - similarity).clamp(0.0, 2.0) as f32
}
