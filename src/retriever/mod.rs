
use std::sync::Arc;
use tracing::debug;

use crate::database::lancedb::{Collection, MetadataFilter, QueryResult};
use crate::embeddings::Embedder;
use crate::{RagError, Result};

/// Embeds a query and searches one collection with it
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    collection: Collection,
}

impl Retriever {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, collection: Collection) -> Self {
        Self {
            embedder,
            collection,
        }
    }

    #[inline]
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Up to `top_k` chunks closest to `query`, most similar first
    #[inline]
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>> {
        if query.trim().is_empty() {
            return Err(RagError::EmptyInput);
        }
        if top_k == 0 {
            return Err(RagError::InvalidRequest(
                "top_k must be greater than zero".to_string(),
            ));
        }

        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed_one(&text))
            .await
            .map_err(|e| RagError::EmbeddingBackend(format!("embedding task failed: {}", e)))??;

        self.collection.refresh().await?;
        let results = self.collection.search(&vector, top_k, filter)?;
        debug!(
            "Retrieved {} chunks from {} for query of length {}",
            results.len(),
            self.collection.name(),
            query.len()
        );

        Ok(results)
    }
}
