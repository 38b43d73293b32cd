use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Input produced no non-empty chunks")]
    EmptyInput,

    #[error("Embedding backend error: {0}")]
    EmbeddingBackend(String),

    #[error(
        "Dimension mismatch in collection '{collection}' for {}: expected {expected}, got {actual}",
        .id.as_deref().unwrap_or("query vector")
    )]
    DimensionMismatch {
        collection: String,
        id: Option<String>,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate id '{id}' in collection '{collection}'")]
    DuplicateId { collection: String, id: String },

    #[error("Collection not found: {name}")]
    CollectionNotFound { name: String },

    #[error("Generation backend error: {message}")]
    GenerationBackend {
        message: String,
        partial: Option<String>,
    },

    #[error(
        "Misaligned insert into collection '{collection}': {chunks} chunks, {embeddings} embeddings, {metadata} metadata entries"
    )]
    MisalignedBatch {
        collection: String,
        chunks: usize,
        embeddings: usize,
        metadata: usize,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Text the generation backend produced before it failed, if any.
    #[inline]
    pub fn partial_answer(&self) -> Option<&str> {
        match self {
            Self::GenerationBackend { partial, .. } => partial.as_deref(),
            _ => None,
        }
    }
}

pub mod answer;
pub mod chunking;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod generation;
pub mod indexer;
pub mod ollama;
pub mod retriever;
pub mod session;
pub mod sources;
