#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end pipeline over deterministic in-process backends:
// directory -> chunks -> vectors -> collection -> retrieval -> answer

use repo_rag::answer::{AnswerComposer, build_prompt};
use repo_rag::chunking::{ChunkStrategy, chunk};
use repo_rag::database::lancedb::{IndexStore, MetadataFilter, OpenMode};
use repo_rag::embeddings::Embedder;
use repo_rag::generation::{FragmentStream, GenerationBackend, GenerationOptions, GenerationStream};
use repo_rag::indexer::Indexer;
use repo_rag::retriever::Retriever;
use repo_rag::session::{SessionStore, Turn};
use repo_rag::sources::{DEFAULT_EXTENSIONS, SourceDocument, load_directory};
use repo_rag::{RagError, Result};
use std::fs;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const VOCABULARY: [&str; 6] = ["parser", "config", "database", "test", "a", "b"];

/// Bag-of-words over a fixed vocabulary
struct VocabularyEmbedder;

impl Embedder for VocabularyEmbedder {
    fn model_id(&self) -> &str {
        "vocabulary"
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let words: Vec<String> = text
                    .split(|c: char| !c.is_alphanumeric())
                    .map(str::to_lowercase)
                    .collect();
                VOCABULARY
                    .iter()
                    .map(|term| words.iter().filter(|w| w == term).count() as f32)
                    .collect()
            })
            .collect())
    }
}

/// Echoes a fixed answer and keeps the prompts it received
struct EchoBackend {
    answer: String,
    prompts: Mutex<Vec<String>>,
}

impl EchoBackend {
    fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

impl GenerationBackend for EchoBackend {
    fn model_id(&self) -> &str {
        "echo"
    }

    fn generate_stream(&self, prompt: &str, _options: &GenerationOptions) -> Result<GenerationStream> {
        self.prompts.lock().expect("lock").push(prompt.to_string());
        let body = self
            .answer
            .split_inclusive(' ')
            .map(|word| serde_json::json!({"response": word, "done": false}).to_string())
            .chain(std::iter::once(
                serde_json::json!({"response": "", "done": true}).to_string(),
            ))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(FragmentStream::new(Box::new(Cursor::new(body.into_bytes()))))
    }
}

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

fn write_project(root: &std::path::Path) {
    fs::create_dir_all(root.join("src")).expect("create src");
    fs::create_dir_all(root.join(".git")).expect("create .git");
    fs::write(
        root.join("src/parser.rs"),
        "The parser reads tokens.\n\nThe parser reports errors with spans.",
    )
    .expect("write parser");
    fs::write(
        root.join("src/config.rs"),
        "Config is loaded from a TOML file.",
    )
    .expect("write config");
    fs::write(
        root.join("README.md"),
        "Run the test suite before sending a patch.",
    )
    .expect("write readme");
    fs::write(root.join(".git/config"), "config database parser").expect("write git config");
}

#[test]
fn paragraphs_split_into_chunks() {
    let chunks = chunk("A\n\nB\n\nC", &ChunkStrategy::Paragraph).expect("chunks");

    assert_eq!(chunks, vec!["A", "B", "C"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn single_document_round_trip() {
    init_test_tracing();
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = IndexStore::open(temp_dir.path()).await.expect("store opens");
    let collection = store.open_or_create("letters").await.expect("collection opens");
    let embedder = Arc::new(VocabularyEmbedder);

    Indexer::new(embedder.clone(), ChunkStrategy::Paragraph)
        .index_documents(&collection, &[SourceDocument::new("abc", "A\n\nB\n\nC")])
        .await
        .expect("indexing succeeds");

    let query = embedder.embed_one("B").expect("embeds");
    let results = collection.search(&query, 1, None).expect("search succeeds");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_text, "B");
    assert!(results[0].distance.abs() < 1e-6);

    let everything = collection.search(&query, 10, None).expect("search succeeds");
    assert_eq!(everything.len(), 3);
    assert!(
        everything
            .windows(2)
            .all(|pair| pair[0].distance <= pair[1].distance)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn directory_to_answer() {
    init_test_tracing();
    let project = TempDir::new().expect("should create temp dir");
    let data = TempDir::new().expect("should create temp dir");
    write_project(project.path());

    let documents = load_directory(project.path(), DEFAULT_EXTENSIONS).expect("directory loads");
    let identifiers: Vec<&str> = documents.iter().map(|d| d.identifier.as_str()).collect();
    assert_eq!(identifiers, vec!["README.md", "src/config.rs", "src/parser.rs"]);

    let store = IndexStore::open(data.path()).await.expect("store opens");
    let collection = store.open_or_create("project").await.expect("collection opens");
    let embedder = Arc::new(VocabularyEmbedder);
    let stats = Indexer::new(embedder.clone(), ChunkStrategy::Paragraph)
        .index_documents(&collection, &documents)
        .await
        .expect("indexing succeeds");
    assert_eq!(stats.documents_processed, 3);
    assert_eq!(stats.chunks_created, 4);

    let retriever = Retriever::new(embedder, collection.clone());
    let retrieved = retriever
        .retrieve("Where is the parser?", 2, None)
        .await
        .expect("retrieval succeeds");
    assert_eq!(retrieved.len(), 2);
    assert!(retrieved.iter().all(|r| r.source == "src/parser.rs"));

    let filter = MetadataFilter::eq("source", "src/config.rs");
    let filtered = retriever
        .retrieve("Where is the parser?", 5, Some(&filter))
        .await
        .expect("retrieval succeeds");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].source, "src/config.rs");

    let backend = EchoBackend::new("It lives in src/parser.rs.");
    let composer = AnswerComposer::new(backend.clone(), GenerationOptions::default());
    let answer = composer
        .compose_answer("Where is the parser?", &retrieved, &[])
        .await
        .expect("answer succeeds");

    assert_eq!(answer, "It lives in src/parser.rs.");
    let prompts = backend.prompts.lock().expect("lock").clone();
    assert_eq!(prompts, vec![build_prompt("Where is the parser?", &retrieved, &[])]);
}

#[tokio::test(flavor = "multi_thread")]
async fn collections_persist_across_store_instances() {
    init_test_tracing();
    let data = TempDir::new().expect("should create temp dir");
    let embedder = Arc::new(VocabularyEmbedder);

    {
        let store = IndexStore::open(data.path()).await.expect("store opens");
        let collection = store.open_or_create("notes").await.expect("collection opens");
        Indexer::new(embedder.clone(), ChunkStrategy::Line)
            .index_documents(
                &collection,
                &[SourceDocument::new("notes.txt", "database config\nparser test")],
            )
            .await
            .expect("indexing succeeds");
    }

    let store = IndexStore::open(data.path()).await.expect("store reopens");
    assert_eq!(
        store.collection_names().await.expect("names"),
        vec!["notes".to_string()]
    );
    let collection = store
        .open_collection("notes", OpenMode::MustExist)
        .await
        .expect("collection exists");
    assert_eq!(collection.count(), 2);
    assert_eq!(collection.dimension(), Some(VOCABULARY.len()));

    let query = embedder.embed_one("parser").expect("embeds");
    let results = collection.search(&query, 1, None).expect("search succeeds");
    assert_eq!(results[0].chunk_text, "parser test");
}

#[tokio::test(flavor = "multi_thread")]
async fn conversation_uses_session_history() {
    init_test_tracing();
    let backend = EchoBackend::new("Where are the parser tests?");
    let composer = AnswerComposer::new(backend.clone(), GenerationOptions::default());
    let sessions = SessionStore::new(Duration::from_secs(60), 10);

    assert!(sessions.set_source("s1", "https://example.com/project.git"));
    let first = composer
        .contextualize_question("Where is the parser?", &sessions.history("s1"))
        .await
        .expect("contextualize succeeds");
    assert_eq!(first, "Where is the parser?");
    sessions.record_exchange("s1", "Where is the parser?", "In src/parser.rs.");

    let history = sessions.history("s1");
    assert_eq!(history, vec![
        Turn::user("Where is the parser?"),
        Turn::assistant("In src/parser.rs."),
    ]);
    let standalone = composer
        .contextualize_question("And its tests?", &history)
        .await
        .expect("contextualize succeeds");
    assert_eq!(standalone, "Where are the parser tests?");

    assert!(sessions.set_source("s1", "https://example.com/other.git"));
    assert!(sessions.history("s1").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_corpus_is_rejected() {
    init_test_tracing();
    let data = TempDir::new().expect("should create temp dir");
    let store = IndexStore::open(data.path()).await.expect("store opens");
    let collection = store.open_or_create("empty").await.expect("collection opens");

    let result = Indexer::new(Arc::new(VocabularyEmbedder), ChunkStrategy::Paragraph)
        .index_documents(&collection, &[SourceDocument::new("blank.md", "  \n\n\t")])
        .await;

    assert!(matches!(result, Err(RagError::EmptyInput)));
    assert!(collection.is_empty());
}
