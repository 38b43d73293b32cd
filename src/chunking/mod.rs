
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::sources::SourceDocument;
use crate::{RagError, Result};

/// A contiguous unit of source text, the atomic retrievable item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Globally unique identifier
    pub id: String,
    /// The chunk text, never empty
    pub text: String,
    /// Identifier of the document this chunk came from
    pub source: String,
    /// Position of this chunk within its source
    pub sequence_index: u32,
}

impl Chunk {
    /// Create a chunk with a fresh random id
    #[inline]
    pub fn new(text: impl Into<String>, source: impl Into<String>, sequence_index: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            source: source.into(),
            sequence_index,
        }
    }
}

/// How raw text is split into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Split on blank lines
    #[default]
    Paragraph,
    /// One chunk per non-blank line
    Line,
    /// Fixed-size character windows sharing `overlap` characters with their predecessor
    Window { size: usize, overlap: usize },
}

impl ChunkStrategy {
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if let Self::Window { size, overlap } = *self {
            if size == 0 {
                return Err(RagError::InvalidRequest(
                    "window size must be greater than zero".to_string(),
                ));
            }
            if overlap >= size {
                return Err(RagError::InvalidRequest(format!(
                    "window overlap ({}) must be smaller than window size ({})",
                    overlap, size
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ChunkStrategy {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Paragraph => write!(f, "paragraph"),
            Self::Line => write!(f, "line"),
            Self::Window { size, overlap } => write!(f, "window({}, overlap {})", size, overlap),
        }
    }
}

/// Split raw text into an ordered sequence of non-empty chunk texts
///
/// Fails with [`RagError::EmptyInput`] when nothing survives filtering.
#[inline]
pub fn chunk(raw_text: &str, strategy: &ChunkStrategy) -> Result<Vec<String>> {
    strategy.validate()?;

    let chunks = match *strategy {
        ChunkStrategy::Paragraph => split_paragraphs(raw_text),
        ChunkStrategy::Line => split_lines(raw_text),
        ChunkStrategy::Window { size, overlap } => split_windows(raw_text, size, overlap),
    };

    if chunks.is_empty() {
        return Err(RagError::EmptyInput);
    }

    debug!(
        "Split {} bytes into {} chunks using {} strategy",
        raw_text.len(),
        chunks.len(),
        strategy
    );
    Ok(chunks)
}

/// Chunk a whole document, assigning ids, source and sequence positions
#[inline]
pub fn chunk_document(document: &SourceDocument, strategy: &ChunkStrategy) -> Result<Vec<Chunk>> {
    let texts = chunk(&document.text, strategy)?;

    texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let sequence_index = u32::try_from(index).map_err(|_| {
                RagError::InvalidRequest(format!(
                    "document '{}' produced too many chunks",
                    document.identifier
                ))
            })?;
            Ok(Chunk::new(text, document.identifier.as_str(), sequence_index))
        })
        .collect()
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            flush_paragraph(&mut current, &mut paragraphs);
        } else {
            current.push(line);
        }
    }
    flush_paragraph(&mut current, &mut paragraphs);

    paragraphs
}

fn flush_paragraph(current: &mut Vec<&str>, paragraphs: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }

    let paragraph = current.join("\n");
    let trimmed = paragraph.trim();
    if !trimmed.is_empty() {
        paragraphs.push(trimmed.to_string());
    }
    current.clear();
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(ToString::to_string)
        .collect()
}

fn split_windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut windows = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + size).min(chars.len());

        // Prefer to end on whitespace found in the second half of the window
        if end < chars.len() {
            let floor = start + size / 2;
            if let Some(offset) = chars[floor..end].iter().rposition(|c| c.is_whitespace()) {
                end = floor + offset + 1;
            }
        }

        let window: String = chars[start..end].iter().collect();
        let trimmed = window.trim();
        if !trimmed.is_empty() {
            windows.push(trimmed.to_string());
        }

        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    windows
}
