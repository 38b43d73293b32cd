// Answer composition
// Prompt assembly over retrieved context and conversation history, forwarded to the generation backend

#[cfg(test)]
mod tests;

use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::database::lancedb::QueryResult;
use crate::generation::{GenerationBackend, GenerationOptions, collect_fragments};
use crate::session::Turn;
use crate::{RagError, Result};

/// Longest source text sent for a single summary, in characters
pub const MAX_SUMMARY_CHARS: usize = 16_000;

const ANSWER_INSTRUCTIONS: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. \
If you don't know the answer, say that you don't know. Keep the answer concise.";

const CONTEXTUALIZE_INSTRUCTIONS: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question which can \
be understood without the chat history. Do NOT answer the question, just reformulate it if \
needed and otherwise return it as is.";

/// Turns questions plus retrieved context into answers
#[derive(Clone)]
pub struct AnswerComposer {
    backend: Arc<dyn GenerationBackend>,
    options: GenerationOptions,
    summary_options: GenerationOptions,
}

impl AnswerComposer {
    #[inline]
    pub fn new(backend: Arc<dyn GenerationBackend>, options: GenerationOptions) -> Self {
        Self {
            backend,
            options,
            summary_options: options,
        }
    }

    #[inline]
    pub fn from_config(backend: Arc<dyn GenerationBackend>, config: &GenerationConfig) -> Self {
        let options = GenerationOptions {
            temperature: Some(config.temperature),
            max_tokens: config.max_tokens,
        };
        Self::new(backend, options).with_summary_options(GenerationOptions {
            temperature: Some(config.summary_temperature),
            ..options
        })
    }

    #[inline]
    pub fn with_summary_options(mut self, options: GenerationOptions) -> Self {
        self.summary_options = options;
        self
    }

    #[inline]
    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Generate an answer and wait for the complete text
    #[inline]
    pub async fn compose_answer(
        &self,
        question: &str,
        retrieved: &[QueryResult],
        history: &[Turn],
    ) -> Result<String> {
        self.compose_answer_streaming(question, retrieved, history, |_| {})
            .await
    }

    /// Generate an answer, handing each fragment to `on_fragment` as it arrives
    ///
    /// On failure the text produced so far is carried in the error.
    #[inline]
    pub async fn compose_answer_streaming<F>(
        &self,
        question: &str,
        retrieved: &[QueryResult],
        history: &[Turn],
        on_fragment: F,
    ) -> Result<String>
    where
        F: FnMut(&str) + Send + 'static,
    {
        if question.trim().is_empty() {
            return Err(RagError::EmptyInput);
        }

        let prompt = build_prompt(question, retrieved, history);
        debug!(
            "Composing answer from {} chunks and {} prior turns",
            retrieved.len(),
            history.len()
        );

        self.run(prompt, self.options, on_fragment).await
    }

    /// Rewrite a follow-up into a question that stands on its own
    ///
    /// Without history the question is returned unchanged and the backend is not called.
    #[inline]
    pub async fn contextualize_question(&self, question: &str, history: &[Turn]) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let prompt = build_contextualize_prompt(question, history);
        let rewritten = self.run(prompt, self.options, |_| {}).await?;
        let rewritten = rewritten.trim();

        if rewritten.is_empty() {
            Ok(question.to_string())
        } else {
            debug!("Contextualized question: {}", rewritten);
            Ok(rewritten.to_string())
        }
    }

    /// Short description of one source file
    #[inline]
    pub async fn summarize_source(&self, identifier: &str, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(RagError::EmptyInput);
        }

        let prompt = build_summary_prompt(identifier, text);
        let summary = self.run(prompt, self.summary_options, |_| {}).await?;
        Ok(summary.trim().to_string())
    }

    async fn run<F>(&self, prompt: String, options: GenerationOptions, on_fragment: F) -> Result<String>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || {
            let stream = backend.generate_stream(&prompt, &options)?;
            collect_fragments(stream, on_fragment)
        })
        .await
        .map_err(|e| RagError::GenerationBackend {
            message: format!("generation task failed: {}", e),
            partial: None,
        })?
    }
}

/// Prompt with the ranked context, then prior turns, then the question
#[inline]
pub fn build_prompt(question: &str, retrieved: &[QueryResult], history: &[Turn]) -> String {
    let mut prompt = String::new();
    prompt.push_str(ANSWER_INSTRUCTIONS);
    prompt.push_str("\n\nContext:\n");

    if retrieved.is_empty() {
        prompt.push_str("(no relevant context found)\n");
    }
    for (rank, result) in retrieved.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "[{}] (source: {})\n{}\n",
            rank + 1,
            result.source,
            result.chunk_text
        );
    }

    push_history(&mut prompt, history);

    let _ = write!(prompt, "\nQuestion: {}\nAnswer:", question.trim());
    prompt
}

fn build_contextualize_prompt(question: &str, history: &[Turn]) -> String {
    let mut prompt = String::new();
    prompt.push_str(CONTEXTUALIZE_INSTRUCTIONS);
    prompt.push('\n');
    push_history(&mut prompt, history);
    let _ = write!(
        prompt,
        "\nLatest question: {}\nStandalone question:",
        question.trim()
    );
    prompt
}

fn build_summary_prompt(identifier: &str, text: &str) -> String {
    let snippet = match text.char_indices().nth(MAX_SUMMARY_CHARS) {
        Some((cut, _)) => text.get(..cut).unwrap_or(text),
        None => text,
    };

    format!(
        "You are a senior software engineer. Summarize the purpose and logic of this file in \
         short: {}\n\nCode:\n{}\n\nSummary:",
        identifier, snippet
    )
}

fn push_history(prompt: &mut String, history: &[Turn]) {
    if history.is_empty() {
        return;
    }

    prompt.push_str("\nConversation so far:\n");
    for turn in history {
        let _ = writeln!(prompt, "{}: {}", turn.role, turn.content);
    }
}
