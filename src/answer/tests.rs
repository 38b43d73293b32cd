use super::*;
use crate::database::lancedb::Metadata;
use crate::generation::{FragmentStream, GenerationStream};
use std::io::Cursor;
use std::sync::Mutex;

/// Replays a fixed NDJSON body and remembers every prompt and option set it was given
struct ScriptedBackend {
    body: String,
    calls: Mutex<Vec<(String, GenerationOptions)>>,
}

impl ScriptedBackend {
    fn new(records: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            body: records.join("\n"),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn answering(text: &str) -> Arc<Self> {
        let record = serde_json::json!({"response": text, "done": true}).to_string();
        Self::new(&[&record])
    }

    fn calls(&self) -> Vec<(String, GenerationOptions)> {
        self.calls.lock().expect("lock").clone()
    }
}

impl GenerationBackend for ScriptedBackend {
    fn model_id(&self) -> &str {
        "scripted"
    }

    fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> crate::Result<GenerationStream> {
        self.calls
            .lock()
            .expect("lock")
            .push((prompt.to_string(), *options));
        Ok(FragmentStream::new(Box::new(Cursor::new(
            self.body.clone().into_bytes(),
        ))))
    }
}

fn result(source: &str, text: &str, distance: f32) -> QueryResult {
    QueryResult {
        id: format!("{source}-{text}"),
        chunk_text: text.to_string(),
        source: source.to_string(),
        distance,
        metadata: Metadata::new(),
    }
}

fn composer(backend: Arc<ScriptedBackend>) -> AnswerComposer {
    AnswerComposer::from_config(
        backend,
        &GenerationConfig {
            temperature: 0.7,
            summary_temperature: 0.2,
            max_tokens: Some(128),
        },
    )
}

#[test]
fn prompt_orders_context_history_and_question() {
    let retrieved = vec![
        result("src/db.rs", "fn connect()", 0.1),
        result("README.md", "Run with cargo", 0.4),
    ];
    let history = vec![Turn::user("What is this?"), Turn::assistant("A tool.")];

    let prompt = build_prompt("How do I run it?", &retrieved, &history);

    let first = prompt.find("fn connect()").expect("first chunk present");
    let second = prompt.find("Run with cargo").expect("second chunk present");
    let turn = prompt.find("Assistant: A tool.").expect("history present");
    let question = prompt.find("Question: How do I run it?").expect("question present");
    assert!(first < second && second < turn && turn < question);
    assert!(prompt.contains("[1] (source: src/db.rs)"));
    assert!(prompt.contains("[2] (source: README.md)"));
    assert!(prompt.ends_with("Answer:"));
}

#[test]
fn prompt_without_context_or_history() {
    let prompt = build_prompt("Anything?", &[], &[]);

    assert!(prompt.contains("(no relevant context found)"));
    assert!(!prompt.contains("Conversation so far"));
}

#[test]
fn summary_prompt_is_truncated() {
    let long_text = "x".repeat(MAX_SUMMARY_CHARS + 500);

    let prompt = build_summary_prompt("big.rs", &long_text);

    assert!(prompt.contains("big.rs"));
    assert_eq!(prompt.matches('x').count(), MAX_SUMMARY_CHARS);
}

#[tokio::test(flavor = "multi_thread")]
async fn answer_uses_configured_options() {
    let backend = ScriptedBackend::new(&[
        r#"{"response":"Use ","done":false}"#,
        r#"{"response":"cargo run.","done":false}"#,
        r#"{"response":"","done":true}"#,
    ]);
    let composer = composer(backend.clone());

    let answer = composer
        .compose_answer("How?", &[result("a.md", "cargo run", 0.0)], &[])
        .await
        .expect("answer succeeds");

    assert_eq!(answer, "Use cargo run.");
    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.temperature, Some(0.7));
    assert_eq!(calls[0].1.max_tokens, Some(128));
    assert_eq!(calls[0].0, build_prompt("How?", &[result("a.md", "cargo run", 0.0)], &[]));
}

#[tokio::test(flavor = "multi_thread")]
async fn streaming_forwards_each_fragment() {
    let backend = ScriptedBackend::new(&[
        r#"{"response":"one ","done":false}"#,
        "not json at all",
        r#"{"response":"two","done":true}"#,
    ]);
    let composer = composer(backend);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let answer = composer
        .compose_answer_streaming("Count", &[], &[], move |fragment| {
            sink.lock().expect("lock").push(fragment.to_string());
        })
        .await
        .expect("answer succeeds");

    assert_eq!(answer, "one two");
    assert_eq!(*seen.lock().expect("lock"), vec!["one ", "two"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_terminal_record_fails_with_partial_text() {
    let backend = ScriptedBackend::new(&[r#"{"response":"cut off","done":false}"#]);
    let composer = composer(backend);

    let error = composer
        .compose_answer("Why?", &[], &[])
        .await
        .expect_err("stream is truncated");

    assert!(matches!(error, RagError::GenerationBackend { .. }));
    assert_eq!(error.partial_answer(), Some("cut off"));
}

#[tokio::test(flavor = "multi_thread")]
async fn error_record_fails() {
    let backend = ScriptedBackend::new(&[r#"{"error":"model not found"}"#]);
    let composer = composer(backend);

    let error = composer
        .compose_answer("Why?", &[], &[])
        .await
        .expect_err("backend reported an error");

    assert!(error.to_string().contains("model not found"));
    assert_eq!(error.partial_answer(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn blank_question_is_rejected() {
    let backend = ScriptedBackend::answering("unused");
    let composer = composer(backend.clone());

    let result = composer.compose_answer("  ", &[], &[]).await;

    assert!(matches!(result, Err(RagError::EmptyInput)));
    assert!(backend.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn contextualize_without_history_skips_backend() {
    let backend = ScriptedBackend::answering("rewritten");
    let composer = composer(backend.clone());

    let question = composer
        .contextualize_question("What about tests?", &[])
        .await
        .expect("contextualize succeeds");

    assert_eq!(question, "What about tests?");
    assert!(backend.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn contextualize_with_history_rewrites() {
    let backend = ScriptedBackend::answering("  How are the parser tests run?\n");
    let composer = composer(backend.clone());
    let history = vec![
        Turn::user("Where is the parser?"),
        Turn::assistant("In src/parser."),
    ];

    let question = composer
        .contextualize_question("How are its tests run?", &history)
        .await
        .expect("contextualize succeeds");

    assert_eq!(question, "How are the parser tests run?");
    let calls = backend.calls();
    assert!(calls[0].0.contains("User: Where is the parser?"));
    assert!(calls[0].0.contains("Latest question: How are its tests run?"));
}

#[tokio::test(flavor = "multi_thread")]
async fn summary_uses_summary_temperature() {
    let backend = ScriptedBackend::answering(" Parses config files. ");
    let composer = composer(backend.clone());

    let summary = composer
        .summarize_source("src/config.rs", "fn parse() {}")
        .await
        .expect("summary succeeds");

    assert_eq!(summary, "Parses config files.");
    let calls = backend.calls();
    assert_eq!(calls[0].1.temperature, Some(0.2));
    assert!(calls[0].0.contains("src/config.rs"));
    assert!(calls[0].0.contains("fn parse() {}"));
}
