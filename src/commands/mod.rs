// CLI commands
// Each command wires configuration, the Ollama client and the stores into one library operation


use anyhow::{Context, Result};
use dialoguer::{Confirm, Input};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::RagError;
use crate::answer::AnswerComposer;
use crate::config::Config;
use crate::database::lancedb::{Collection, IndexStore, MetadataFilter, OpenMode, QueryResult};
use crate::embeddings::Embedder;
use crate::indexer::{Indexer, IndexingStats};
use crate::ollama::OllamaClient;
use crate::retriever::Retriever;
use crate::session::SessionStore;
use crate::sources::repository::{repository_collection_name, validate_repository_url};
use crate::sources::{DEFAULT_EXTENSIONS, RepoCache, SourceDocument, load_directory, load_file};

const CHAT_SESSION: &str = "cli";

/// Where `ingest` reads its documents from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestSource {
    /// A single file or a directory tree
    Path(PathBuf),
    /// A git repository URL, cloned into the repository cache
    Repository(String),
}

/// Options shared by every ingest source
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Target collection; defaults to the configured one, or one derived from the repository URL
    pub collection: Option<String>,
    /// Extensions picked up from directories; empty means the defaults
    pub extensions: Vec<String>,
    /// Re-clone the repository even if a cached clone exists
    pub refresh: bool,
    /// Drop the collection before indexing into it; without it a non-empty collection is refused
    pub replace: bool,
}

/// Load, chunk, embed and store documents from a path or repository
#[inline]
pub async fn ingest(
    config: &Config,
    source: &IngestSource,
    options: &IngestOptions,
) -> Result<IndexingStats> {
    let extensions = resolve_extensions(&options.extensions);
    let collection_name = match (&options.collection, source) {
        (Some(name), _) => name.clone(),
        (None, IngestSource::Path(_)) => config.retrieval.collection.clone(),
        (None, IngestSource::Repository(url)) => {
            repository_collection_name(&validate_repository_url(url)?)
        }
    };
    // A re-cloned repository is indexed from scratch
    let replace = options.replace || options.refresh;

    let store = IndexStore::from_config(config)
        .await
        .context("Failed to open index store")?;
    let exists = store.collection_names().await?.contains(&collection_name);
    if exists && !replace {
        let existing = store
            .open_collection(&collection_name, OpenMode::MustExist)
            .await?;
        if !existing.is_empty() {
            anyhow::bail!(
                "Collection {} already holds {} chunks; use --replace to rebuild it",
                collection_name,
                existing.count()
            );
        }
    }

    let documents = match source {
        IngestSource::Path(path) => {
            info!("Ingesting {}", path.display());
            collect_documents(path, &extensions)?
        }
        IngestSource::Repository(url) => {
            let cache = RepoCache::from_config(config)
                .await
                .context("Failed to open repository cache")?;
            let local_path = if options.refresh {
                cache.refresh(url).await?
            } else {
                cache.checkout(url).await?
            };
            println!("Repository {} at {}", url, local_path.display());
            collect_documents(&local_path, &extensions)?
        }
    };

    if exists && replace {
        println!("Dropping existing collection {}", collection_name);
        store.drop_collection(&collection_name).await?;
    }

    let collection = store.open_or_create(&collection_name).await?;
    let client = Arc::new(OllamaClient::new(config)?);
    let indexer = Indexer::new(client, config.chunking)
        .with_batch_size(config.ollama.batch_size as usize);

    println!(
        "Indexing {} documents into collection {}",
        documents.len(),
        collection_name
    );
    let stats = indexer.index_documents(&collection, &documents).await?;

    println!("Indexing completed successfully!");
    println!("  Documents indexed: {}", stats.documents_processed);
    println!("  Documents skipped: {}", stats.documents_skipped);
    println!("  Chunks stored: {}", stats.chunks_created);
    println!("  Embedding batches: {}", stats.batches);
    println!("  Duration: {:.2?}", stats.duration);
    println!("  Collection size: {}", collection.count());

    Ok(stats)
}

/// Print the chunks closest to `query`
#[inline]
pub async fn search(
    config: &Config,
    query: &str,
    collection: Option<&str>,
    top_k: Option<usize>,
    source: Option<&str>,
) -> Result<Vec<QueryResult>> {
    let retriever = open_retriever(config, collection).await?;
    let filter = source_filter(source);

    let results = retriever
        .retrieve(
            query,
            top_k.unwrap_or(config.retrieval.top_k),
            filter.as_ref(),
        )
        .await?;

    if results.is_empty() {
        println!("No matching chunks in {}", retriever.collection().name());
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. {} (similarity {:.3})",
            rank + 1,
            result.source,
            result.similarity_score()
        );
        println!("{}", indent(&result.chunk_text));
        println!();
    }

    Ok(results)
}

/// Answer one question from the collection, streaming the answer to stdout
#[inline]
pub async fn ask(
    config: &Config,
    question: &str,
    collection: Option<&str>,
    top_k: Option<usize>,
) -> Result<String> {
    let client = Arc::new(OllamaClient::new(config)?);
    let retriever = retriever_for(config, &client, collection).await?;
    let composer = AnswerComposer::from_config(Arc::<OllamaClient>::clone(&client), &config.generation);

    let retrieved = retriever
        .retrieve(question, top_k.unwrap_or(config.retrieval.top_k), None)
        .await?;
    let answer = stream_answer(&composer, question, &retrieved, &[]).await?;
    print_sources(&retrieved);

    Ok(answer)
}

/// Interactive conversation over a collection or a repository
///
/// Lines starting with `/` are commands: `/repo <url>` switches source,
/// `/reset` forgets the conversation and `/quit` leaves.
#[inline]
pub async fn chat(config: &Config, collection: Option<&str>, repository: Option<&str>) -> Result<()> {
    let client = Arc::new(OllamaClient::new(config)?);
    let embedder: Arc<dyn Embedder> = client.clone();
    let composer = AnswerComposer::from_config(client, &config.generation);
    let store = IndexStore::from_config(config)
        .await
        .context("Failed to open index store")?;
    let sessions = SessionStore::from_config(&config.session);
    let top_k = config.retrieval.top_k;

    let mut retriever = match repository {
        Some(url) => {
            let collection = switch_repository(config, &store, &embedder, &sessions, url)
                .await?
                .context("Repository session already active")?;
            Retriever::new(Arc::clone(&embedder), collection)
        }
        None => {
            let name = collection.unwrap_or(&config.retrieval.collection);
            let collection = store.open_collection(name, OpenMode::MustExist).await?;
            Retriever::new(Arc::clone(&embedder), collection)
        }
    };

    println!(
        "Chatting with collection {} ({} chunks). Type /quit to leave.",
        retriever.collection().name(),
        retriever.collection().count()
    );

    loop {
        let line: String = Input::new()
            .with_prompt("You")
            .allow_empty(true)
            .interact_text()
            .context("Failed to read input")?;
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if matches!(line, "/quit" | "/exit") {
            break;
        }
        if line == "/reset" {
            sessions.close(CHAT_SESSION);
            println!("Conversation cleared");
            continue;
        }
        if let Some(url) = line.strip_prefix("/repo ") {
            let url = url.trim();
            match switch_repository(config, &store, &embedder, &sessions, url).await {
                Ok(Some(collection)) => {
                    println!(
                        "Switched to {} ({} chunks)",
                        collection.name(),
                        collection.count()
                    );
                    retriever = Retriever::new(Arc::clone(&embedder), collection);
                }
                Ok(None) => println!("Already chatting about {}", url),
                Err(e) => println!("Could not load {}: {:#}", url, e),
            }
            continue;
        }

        if let Err(e) = answer_turn(&composer, &retriever, &sessions, top_k, line).await {
            println!("Answer failed: {:#}", e);
        }
    }

    sessions.close(CHAT_SESSION);
    Ok(())
}

/// Print a short generated summary of every document under `path`
#[inline]
pub async fn summarize(config: &Config, path: &Path, extensions: &[String]) -> Result<Vec<(String, String)>> {
    let documents = collect_documents(path, &resolve_extensions(extensions))?;
    let client = Arc::new(OllamaClient::new(config)?);
    let composer = AnswerComposer::from_config(client, &config.generation);

    let mut summaries = Vec::with_capacity(documents.len());
    for document in &documents {
        match composer
            .summarize_source(&document.identifier, &document.text)
            .await
        {
            Ok(summary) => {
                println!("## {}", document.identifier);
                println!("{}", summary);
                println!();
                summaries.push((document.identifier.clone(), summary));
            }
            Err(RagError::EmptyInput) => {
                warn!("Skipping empty file {}", document.identifier);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(summaries)
}

/// List every collection with its size and dimension
#[inline]
pub async fn list_collections(config: &Config) -> Result<()> {
    let store = IndexStore::from_config(config)
        .await
        .context("Failed to open index store")?;
    let names = store.collection_names().await?;

    if names.is_empty() {
        println!("No collections have been created yet.");
        println!("Use 'repo-rag ingest <path>' to index some documents.");
        return Ok(());
    }

    println!("Collections ({} total):", names.len());
    for name in &names {
        let collection = store.open_collection(name, OpenMode::MustExist).await?;
        match collection.dimension() {
            Some(dimension) => println!(
                "  {} - {} chunks, {} dimensions",
                name,
                collection.count(),
                dimension
            ),
            None => println!("  {} - empty", name),
        }
    }

    Ok(())
}

/// Drop a collection after confirmation
#[inline]
pub async fn drop_collection(config: &Config, name: &str, assume_yes: bool) -> Result<bool> {
    let store = IndexStore::from_config(config)
        .await
        .context("Failed to open index store")?;
    let collection = store.open_collection(name, OpenMode::MustExist).await?;

    println!(
        "Collection {} holds {} chunks. This action cannot be undone.",
        name,
        collection.count()
    );
    let confirmed = assume_yes
        || Confirm::new()
            .with_prompt("Drop this collection?")
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;

    if !confirmed {
        println!("Nothing dropped");
        return Ok(false);
    }

    store.drop_collection(name).await?;
    println!("✓ Collection {} dropped", name);
    Ok(true)
}

/// Report backend health, collections and cached repositories
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 repo-rag Status Report");
    println!("{}", "=".repeat(50));
    println!("Base directory: {}", config.get_base_dir().display());
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(config) {
        Ok(client) => match client.health_check() {
            Ok(()) => {
                println!("   ✅ Ollama: Connected ({})", client.base_url());
                println!("   📋 Embedding model: {}", config.ollama.embedding_model);
                println!("   📋 Generation model: {}", config.ollama.generation_model);
                println!("   🔢 Batch Size: {}", config.ollama.batch_size);
            }
            Err(e) => println!("   ⚠️  Ollama: Unhealthy - {:#}", e),
        },
        Err(e) => println!("   ❌ Ollama: Invalid configuration - {:#}", e),
    }

    println!();
    println!("🔍 Index Store Status:");
    match IndexStore::from_config(config).await {
        Ok(store) => {
            let names = store.collection_names().await?;
            println!("   ✅ LanceDB: {}", store.path().display());
            if names.is_empty() {
                println!("   📭 No collections yet");
            }
            for name in &names {
                let collection = store.open_collection(name, OpenMode::MustExist).await?;
                println!("   📚 {}: {} chunks", name, collection.count());
            }
        }
        Err(e) => println!("   ❌ LanceDB: Failed to open - {}", e),
    }

    println!();
    println!("🗄️  Repository Cache:");
    match RepoCache::from_config(config).await {
        Ok(cache) => {
            let repositories = cache.list().await?;
            if repositories.is_empty() {
                println!("   📭 No repositories cloned yet");
            }
            for repository in &repositories {
                println!(
                    "   📦 {} -> {} (cloned {})",
                    repository.url,
                    repository.local_path,
                    repository.cloned_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Err(e) => println!("   ❌ SQLite: Failed to open - {}", e),
    }

    Ok(())
}

/// Documents from a single file or every matching file under a directory
#[inline]
pub fn collect_documents(path: &Path, extensions: &[String]) -> Result<Vec<SourceDocument>> {
    if path.is_file() {
        return Ok(vec![load_file(path)?]);
    }

    let extensions: Vec<&str> = extensions.iter().map(String::as_str).collect();
    let documents = load_directory(path, &extensions)?;
    if documents.is_empty() {
        warn!(
            "No files with extensions {:?} under {}",
            extensions,
            path.display()
        );
    }
    Ok(documents)
}

/// Normalize user-supplied extensions, falling back to the defaults
#[inline]
pub fn resolve_extensions(extensions: &[String]) -> Vec<String> {
    let resolved: Vec<String> = extensions
        .iter()
        .flat_map(|entry| entry.split(','))
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();

    if resolved.is_empty() {
        DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
    } else {
        resolved
    }
}

/// Restrict a search to chunks from one source identifier
#[inline]
pub fn source_filter(source: Option<&str>) -> Option<MetadataFilter> {
    source.map(|source| MetadataFilter::eq("source", source))
}

async fn open_retriever(config: &Config, collection: Option<&str>) -> Result<Retriever> {
    let client = Arc::new(OllamaClient::new(config)?);
    retriever_for(config, &client, collection).await
}

async fn retriever_for(
    config: &Config,
    client: &Arc<OllamaClient>,
    collection: Option<&str>,
) -> Result<Retriever> {
    let store = IndexStore::from_config(config)
        .await
        .context("Failed to open index store")?;
    let name = collection.unwrap_or(&config.retrieval.collection);
    let collection = store.open_collection(name, OpenMode::MustExist).await?;
    Ok(Retriever::new(Arc::<OllamaClient>::clone(client), collection))
}

/// Collection for a repository, cloning and indexing it on first use
async fn prepare_repository(
    config: &Config,
    store: &IndexStore,
    embedder: &Arc<dyn Embedder>,
    url: &str,
) -> Result<Collection> {
    let parsed = validate_repository_url(url)?;
    let collection = store
        .open_or_create(&repository_collection_name(&parsed))
        .await?;
    if !collection.is_empty() {
        return Ok(collection);
    }

    let cache = RepoCache::from_config(config)
        .await
        .context("Failed to open repository cache")?;
    let local_path = cache.checkout(url).await?;
    let documents = collect_documents(&local_path, &resolve_extensions(&[]))?;

    println!("Indexing {} files from {}", documents.len(), url);
    let indexer = Indexer::new(Arc::clone(embedder), config.chunking)
        .with_batch_size(config.ollama.batch_size as usize);
    indexer.index_documents(&collection, &documents).await?;

    Ok(collection)
}

/// Move the chat session onto a repository
///
/// Returns `None` when the session already uses `url`. The session source
/// and history only change once the repository collection is ready.
async fn switch_repository(
    config: &Config,
    store: &IndexStore,
    embedder: &Arc<dyn Embedder>,
    sessions: &SessionStore,
    url: &str,
) -> Result<Option<Collection>> {
    if sessions.source(CHAT_SESSION).as_deref() == Some(url) {
        return Ok(None);
    }

    let collection = prepare_repository(config, store, embedder, url).await?;
    sessions.set_source(CHAT_SESSION, url);
    Ok(Some(collection))
}

/// One chat exchange: rewrite the question, retrieve, answer and record it
async fn answer_turn(
    composer: &AnswerComposer,
    retriever: &Retriever,
    sessions: &SessionStore,
    top_k: usize,
    line: &str,
) -> Result<String> {
    let history = sessions.history(CHAT_SESSION);
    let standalone = composer.contextualize_question(line, &history).await?;
    let retrieved = retriever.retrieve(&standalone, top_k, None).await?;

    let answer = stream_answer(composer, &standalone, &retrieved, &history).await?;
    print_sources(&retrieved);
    sessions.record_exchange(CHAT_SESSION, line, &answer);
    Ok(answer)
}

async fn stream_answer(
    composer: &AnswerComposer,
    question: &str,
    retrieved: &[QueryResult],
    history: &[crate::session::Turn],
) -> Result<String> {
    let result = composer
        .compose_answer_streaming(question, retrieved, history, |fragment| {
            print!("{}", fragment);
            let _ = std::io::stdout().flush();
        })
        .await;
    println!();

    result.map_err(|e| {
        if e.partial_answer().is_some() {
            warn!("Answer was cut off: {}", e);
        }
        anyhow::Error::new(e)
    })
}

fn print_sources(retrieved: &[QueryResult]) {
    if retrieved.is_empty() {
        return;
    }

    let mut sources: Vec<&str> = Vec::new();
    for result in retrieved {
        if !sources.contains(&result.source.as_str()) {
            sources.push(&result.source);
        }
    }
    println!("Sources: {}", sources.join(", "));
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}
