// Indexer module
// Drives documents through chunking and embedding into a collection


use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::chunking::{Chunk, ChunkStrategy, chunk_document};
use crate::database::lancedb::{Collection, Metadata};
use crate::embeddings::{Embedder, Embedding, validate_batch};
use crate::sources::SourceDocument;
use crate::{RagError, Result};

const DEFAULT_BATCH_SIZE: usize = 16;

/// Chunks, embeds and stores documents
#[derive(Clone)]
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    strategy: ChunkStrategy,
    batch_size: usize,
}

/// Statistics about one indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingStats {
    pub documents_processed: usize,
    pub documents_skipped: usize,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    pub batches: usize,
    pub duration: Duration,
}

impl Indexer {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, strategy: ChunkStrategy) -> Self {
        Self {
            embedder,
            strategy,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn strategy(&self) -> &ChunkStrategy {
        &self.strategy
    }

    /// Index every document into `collection`
    ///
    /// Documents without any chunk are skipped. All embeddings are produced
    /// before the single insert, so a failed run stores nothing.
    #[inline]
    pub async fn index_documents(
        &self,
        collection: &Collection,
        documents: &[SourceDocument],
    ) -> Result<IndexingStats> {
        let start = Instant::now();
        self.strategy.validate()?;

        let mut stats = IndexingStats::default();
        let mut chunks: Vec<Chunk> = Vec::new();
        for document in documents {
            match chunk_document(document, &self.strategy) {
                Ok(document_chunks) => {
                    stats.documents_processed += 1;
                    chunks.extend(document_chunks);
                }
                Err(RagError::EmptyInput) => {
                    debug!("Skipping {}: no content to index", document.identifier);
                    stats.documents_skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if chunks.is_empty() {
            warn!("None of the {} documents produced a chunk", documents.len());
            return Err(RagError::EmptyInput);
        }
        stats.chunks_created = chunks.len();

        info!(
            "Embedding {} chunks from {} documents into {}",
            chunks.len(),
            stats.documents_processed,
            collection.name()
        );

        let bar = if console::user_attended_stderr() {
            ProgressBar::new(chunks.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] Embedding {msg}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        };
        bar.set_message(collection.name().to_string());

        let mut embeddings = Vec::with_capacity(chunks.len());
        let mut dimension = None;
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let embedder = Arc::clone(&self.embedder);
            let vectors = tokio::task::spawn_blocking(move || embedder.embed(&texts))
                .await
                .map_err(|e| {
                    RagError::EmbeddingBackend(format!("embedding task failed: {}", e))
                })??;

            dimension = validate_batch(batch.len(), &vectors, dimension)?;
            embeddings.extend(
                batch
                    .iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| Embedding::new(chunk.id.clone(), vector)),
            );

            stats.batches += 1;
            stats.embeddings_generated = embeddings.len();
            bar.set_position(embeddings.len() as u64);
        }
        bar.finish_and_clear();

        let metadata: Vec<Metadata> = chunks.iter().map(chunk_metadata).collect();
        collection.insert(&chunks, &embeddings, &metadata).await?;

        stats.duration = start.elapsed();
        info!(
            "Indexed {} chunks into {} in {:.2?}",
            stats.chunks_created,
            collection.name(),
            stats.duration
        );
        Ok(stats)
    }
}

/// Metadata recorded for every indexed chunk
#[inline]
pub fn chunk_metadata(chunk: &Chunk) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), chunk.source.as_str().into());
    metadata.insert("sequence_index".to_string(), chunk.sequence_index.into());
    metadata
}
