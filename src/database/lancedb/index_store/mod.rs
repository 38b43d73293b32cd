
use arrow::array::{
    Array, ArrayRef, Float32Array, ListArray, RecordBatchIterator, StringArray, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType, Field, Float32Type, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    IndexEntry, Metadata, MetadataFilter, QueryResult, cosine_distance, validate_collection_name,
};
use crate::chunking::Chunk;
use crate::config::Config;
use crate::embeddings::Embedding;
use crate::{RagError, Result};

/// How a collection handle is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Create the collection when it does not exist yet
    #[default]
    OpenOrCreate,
    /// Fail with `CollectionNotFound` when the collection does not exist
    MustExist,
}

/// Open collection handles of this process, keyed by canonical store path and name
type Registry = Mutex<HashMap<(PathBuf, String), Collection>>;

static REGISTRY: LazyLock<Registry> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// Vector store holding named collections under one LanceDB directory
///
/// Handles live in a process-wide registry, so every open of the same
/// collection shares one committed view and one write lock, even across
/// separate `IndexStore` instances on the same directory.
pub struct IndexStore {
    connection: Connection,
    path: PathBuf,
}

/// Shared handle to one collection
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

struct CollectionInner {
    name: String,
    table: lancedb::Table,
    write_lock: Mutex<()>,
    snapshot: RwLock<Arc<Snapshot>>,
}

/// Committed state of a collection, replaced wholesale after each insert
#[derive(Debug, Default)]
struct Snapshot {
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
    ids: HashSet<String>,
    /// One past the largest persisted `seq`
    next_seq: u64,
}

impl IndexStore {
    /// Connect to the vector directory derived from the configuration
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::open(config.vector_database_path()).await
    }

    #[inline]
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Initializing LanceDB at path: {:?}", path);

        std::fs::create_dir_all(&path).map_err(|e| {
            RagError::Database(format!("Failed to create vector database directory: {}", e))
        })?;
        let path = path.canonicalize().map_err(|e| {
            RagError::Database(format!("Failed to resolve {}: {}", path.display(), e))
        })?;

        let uri = format!("file://{}", path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        info!("Vector store opened at {}", path.display());
        Ok(Self { connection, path })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a collection, creating it if absent
    #[inline]
    pub async fn open_or_create(&self, name: &str) -> Result<Collection> {
        self.open_collection(name, OpenMode::OpenOrCreate).await
    }

    #[inline]
    pub async fn open_collection(&self, name: &str, mode: OpenMode) -> Result<Collection> {
        validate_collection_name(name)?;

        let key = self.registry_key(name);
        let mut registry = REGISTRY.lock().await;
        if let Some(collection) = registry.get(&key) {
            return Ok(collection.clone());
        }

        let exists = self.table_names().await?.iter().any(|table| table == name);
        let table = if exists {
            debug!("Opening existing collection {}", name);
            self.connection
                .open_table(name)
                .execute()
                .await
                .map_err(|e| RagError::Database(format!("Failed to open table {}: {}", name, e)))?
        } else {
            if mode == OpenMode::MustExist {
                return Err(RagError::CollectionNotFound {
                    name: name.to_string(),
                });
            }
            info!("Creating collection {}", name);
            self.connection
                .create_empty_table(name, entry_schema())
                .execute()
                .await
                .map_err(|e| {
                    RagError::Database(format!("Failed to create table {}: {}", name, e))
                })?
        };

        let snapshot = load_snapshot(name, &table).await?;
        debug!(
            "Collection {} loaded with {} entries",
            name,
            snapshot.entries.len()
        );

        let collection = Collection {
            inner: Arc::new(CollectionInner {
                name: name.to_string(),
                table,
                write_lock: Mutex::new(()),
                snapshot: RwLock::new(Arc::new(snapshot)),
            }),
        };
        registry.insert(key, collection.clone());

        Ok(collection)
    }

    /// Names of every stored collection, sorted
    #[inline]
    pub async fn collection_names(&self) -> Result<Vec<String>> {
        let mut names = self.table_names().await?;
        names.sort();
        Ok(names)
    }

    /// Destroy a collection and all of its entries
    #[inline]
    pub async fn drop_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;

        let mut registry = REGISTRY.lock().await;
        if !self.table_names().await?.iter().any(|table| table == name) {
            return Err(RagError::CollectionNotFound {
                name: name.to_string(),
            });
        }

        self.connection
            .drop_table(name)
            .await
            .map_err(|e| RagError::Database(format!("Failed to drop table {}: {}", name, e)))?;
        registry.remove(&self.registry_key(name));

        info!("Dropped collection {}", name);
        Ok(())
    }

    fn registry_key(&self, name: &str) -> (PathBuf, String) {
        (self.path.clone(), name.to_string())
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables: {}", e)))
    }
}

impl Collection {
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Vector dimension fixed by the first committed entry
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.snapshot().dimension
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.snapshot().entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// All committed entries in insertion order
    #[inline]
    pub fn list(&self) -> Vec<IndexEntry> {
        self.snapshot().entries.clone()
    }

    /// Append a batch of entries
    ///
    /// The batch is validated as a whole before anything is written, so a
    /// rejected batch leaves the collection unchanged.
    #[inline]
    pub async fn insert(
        &self,
        chunks: &[Chunk],
        embeddings: &[Embedding],
        metadata: &[Metadata],
    ) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        let current = self.reload_if_stale().await?;

        let dimension = self.validate_batch(&current, chunks, embeddings, metadata)?;
        if chunks.is_empty() {
            return Ok(());
        }

        let created_at = chrono::Utc::now().to_rfc3339();
        let first_seq = current.next_seq;
        let batch = build_record_batch(chunks, embeddings, metadata, first_seq, &created_at)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        self.inner.table.add(reader).execute().await.map_err(|e| {
            RagError::Database(format!(
                "Failed to insert into collection {}: {}",
                self.name(),
                e
            ))
        })?;

        let mut next = Snapshot {
            dimension,
            entries: current.entries.clone(),
            ids: current.ids.clone(),
            next_seq: first_seq + chunks.len() as u64,
        };
        for ((chunk, embedding), entry_metadata) in chunks.iter().zip(embeddings).zip(metadata) {
            next.ids.insert(chunk.id.clone());
            next.entries.push(IndexEntry {
                chunk: chunk.clone(),
                embedding: embedding.clone(),
                metadata: entry_metadata.clone(),
                created_at: created_at.clone(),
            });
        }

        *self
            .inner
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(next);

        info!(
            "Stored {} entries in collection {}",
            chunks.len(),
            self.name()
        );
        Ok(())
    }

    /// Nearest entries to `query_vector` by cosine distance
    ///
    /// The filter is applied before ranking. Equal distances keep insertion order.
    #[inline]
    pub fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>> {
        if top_k == 0 {
            return Err(RagError::InvalidRequest(
                "top_k must be greater than zero".to_string(),
            ));
        }

        let snapshot = self.snapshot();
        let Some(dimension) = snapshot.dimension else {
            debug!("Search on empty collection {}", self.name());
            return Ok(Vec::new());
        };

        if query_vector.len() != dimension {
            return Err(RagError::DimensionMismatch {
                collection: self.name().to_string(),
                id: None,
                expected: dimension,
                actual: query_vector.len(),
            });
        }

        let mut scored: Vec<(f32, &IndexEntry)> = snapshot
            .entries
            .iter()
            .filter(|entry| filter.is_none_or(|f| f.matches(&entry.metadata)))
            .map(|entry| (cosine_distance(query_vector, &entry.embedding.vector), entry))
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        let results: Vec<QueryResult> = scored
            .into_iter()
            .take(top_k)
            .map(|(distance, entry)| QueryResult {
                distance,
                ..QueryResult::from(entry)
            })
            .collect();

        debug!(
            "Search in {} returned {} results",
            self.name(),
            results.len()
        );
        Ok(results)
    }

    /// Pick up entries committed to the table by another process
    #[inline]
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        self.reload_if_stale().await?;
        Ok(())
    }

    /// Committed snapshot, reloaded from the table when its row count moved on
    ///
    /// Callers hold the write lock.
    async fn reload_if_stale(&self) -> Result<Arc<Snapshot>> {
        let current = self.snapshot();
        let table = &self.inner.table;

        table.checkout_latest().await.map_err(|e| {
            RagError::Database(format!(
                "Failed to check out latest version of {}: {}",
                self.name(),
                e
            ))
        })?;
        let persisted = table.count_rows(None).await.map_err(|e| {
            RagError::Database(format!("Failed to count collection {}: {}", self.name(), e))
        })?;
        if persisted == current.entries.len() {
            return Ok(current);
        }

        debug!(
            "Collection {} has {} persisted entries, snapshot has {}; reloading",
            self.name(),
            persisted,
            current.entries.len()
        );
        let reloaded = Arc::new(load_snapshot(self.name(), table).await?);
        *self
            .inner
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&reloaded);
        Ok(reloaded)
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(
            &self
                .inner
                .snapshot
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn validate_batch(
        &self,
        current: &Snapshot,
        chunks: &[Chunk],
        embeddings: &[Embedding],
        metadata: &[Metadata],
    ) -> Result<Option<usize>> {
        if chunks.len() != embeddings.len() || chunks.len() != metadata.len() {
            return Err(self.misaligned(chunks, embeddings, metadata));
        }
        if chunks
            .iter()
            .zip(embeddings)
            .any(|(chunk, embedding)| chunk.id != embedding.chunk_id)
        {
            return Err(self.misaligned(chunks, embeddings, metadata));
        }

        let mut dimension = current.dimension;
        for embedding in embeddings {
            if embedding.vector.is_empty() {
                return Err(RagError::InvalidRequest(format!(
                    "embedding for {} is empty",
                    embedding.chunk_id
                )));
            }
            let expected = *dimension.get_or_insert(embedding.dimension());
            if embedding.dimension() != expected {
                return Err(RagError::DimensionMismatch {
                    collection: self.name().to_string(),
                    id: Some(embedding.chunk_id.clone()),
                    expected,
                    actual: embedding.dimension(),
                });
            }
        }

        let mut batch_ids = HashSet::with_capacity(chunks.len());
        for chunk in chunks {
            if current.ids.contains(&chunk.id) || !batch_ids.insert(chunk.id.as_str()) {
                return Err(RagError::DuplicateId {
                    collection: self.name().to_string(),
                    id: chunk.id.clone(),
                });
            }
        }

        Ok(dimension)
    }

    fn misaligned(
        &self,
        chunks: &[Chunk],
        embeddings: &[Embedding],
        metadata: &[Metadata],
    ) -> RagError {
        RagError::MisalignedBatch {
            collection: self.name().to_string(),
            chunks: chunks.len(),
            embeddings: embeddings.len(),
            metadata: metadata.len(),
        }
    }
}

fn entry_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("seq", DataType::UInt64, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("sequence_index", DataType::UInt32, false),
        Field::new("text", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::List(Arc::new(Field::new("item", DataType::Float32, true))),
            false,
        ),
        Field::new("metadata", DataType::Utf8, false),
        Field::new("created_at", DataType::Utf8, false),
    ]))
}

fn build_record_batch(
    chunks: &[Chunk],
    embeddings: &[Embedding],
    metadata: &[Metadata],
    first_seq: u64,
    created_at: &str,
) -> Result<RecordBatch> {
    let len = chunks.len();

    let mut metadata_json = Vec::with_capacity(len);
    for entry_metadata in metadata {
        metadata_json.push(serde_json::to_string(entry_metadata).map_err(|e| {
            RagError::Database(format!("Failed to serialize metadata: {}", e))
        })?);
    }

    let vector_array = ListArray::from_iter_primitive::<Float32Type, _, _>(
        embeddings
            .iter()
            .map(|embedding| Some(embedding.vector.iter().copied().map(Some))),
    );

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            chunks.iter().map(|c| c.id.as_str()),
        )),
        Arc::new(UInt64Array::from_iter_values(
            (0..len as u64).map(|offset| first_seq + offset),
        )),
        Arc::new(StringArray::from_iter_values(
            chunks.iter().map(|c| c.source.as_str()),
        )),
        Arc::new(UInt32Array::from_iter_values(
            chunks.iter().map(|c| c.sequence_index),
        )),
        Arc::new(StringArray::from_iter_values(
            chunks.iter().map(|c| c.text.as_str()),
        )),
        Arc::new(vector_array),
        Arc::new(StringArray::from_iter_values(metadata_json)),
        Arc::new(StringArray::from_iter_values(
            std::iter::repeat_n(created_at, len),
        )),
    ];

    RecordBatch::try_new(entry_schema(), arrays)
        .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
}

async fn load_snapshot(name: &str, table: &lancedb::Table) -> Result<Snapshot> {
    let total = table
        .count_rows(None)
        .await
        .map_err(|e| RagError::Database(format!("Failed to count collection {}: {}", name, e)))?;
    if total == 0 {
        return Ok(Snapshot::default());
    }

    let mut stream = table
        .query()
        .limit(total)
        .execute()
        .await
        .map_err(|e| RagError::Database(format!("Failed to scan collection {}: {}", name, e)))?;

    let mut rows = Vec::new();
    while let Some(batch) = stream
        .try_next()
        .await
        .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
    {
        rows.extend(parse_batch(&batch)?);
    }
    rows.sort_by_key(|(seq, _)| *seq);

    let mut snapshot = Snapshot {
        next_seq: rows.last().map_or(0, |(seq, _)| seq + 1),
        ..Snapshot::default()
    };
    for (_, entry) in rows {
        if snapshot.dimension.is_none() {
            snapshot.dimension = Some(entry.embedding.dimension());
        }
        snapshot.ids.insert(entry.chunk.id.clone());
        snapshot.entries.push(entry);
    }

    Ok(snapshot)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

fn parse_batch(batch: &RecordBatch) -> Result<Vec<(u64, IndexEntry)>> {
    let ids = column::<StringArray>(batch, "id")?;
    let seqs = column::<UInt64Array>(batch, "seq")?;
    let sources = column::<StringArray>(batch, "source")?;
    let sequence_indices = column::<UInt32Array>(batch, "sequence_index")?;
    let texts = column::<StringArray>(batch, "text")?;
    let vectors = column::<ListArray>(batch, "vector")?;
    let metadata = column::<StringArray>(batch, "metadata")?;
    let created_ats = column::<StringArray>(batch, "created_at")?;

    let mut entries = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let values = vectors.value(row);
        let vector = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| RagError::Database("Invalid vector item type".to_string()))?
            .values()
            .to_vec();

        let entry_metadata: Metadata = serde_json::from_str(metadata.value(row))
            .map_err(|e| RagError::Database(format!("Failed to parse stored metadata: {}", e)))?;

        let chunk = Chunk {
            id: ids.value(row).to_string(),
            text: texts.value(row).to_string(),
            source: sources.value(row).to_string(),
            sequence_index: sequence_indices.value(row),
        };
        let embedding = Embedding::new(chunk.id.clone(), vector);

        entries.push((
            seqs.value(row),
            IndexEntry {
                chunk,
                embedding,
                metadata: entry_metadata,
                created_at: created_ats.value(row).to_string(),
            },
        ));
    }

    Ok(entries)
}
