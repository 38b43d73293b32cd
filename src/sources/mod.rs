// Source ingestion
// Turns files, directory trees and cloned repositories into documents for chunking


pub mod repository;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::{RagError, Result};

pub use repository::RepoCache;

/// File extensions picked up when loading a directory without an explicit list
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "java", "cpp", "c", "cs", "go", "rb", "php", "rs", "html", "css", "json",
    "yaml", "yml", "md", "txt", "toml",
];

/// A unit of raw text plus the identifier chunks will carry as their source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub identifier: String,
    pub text: String,
}

impl SourceDocument {
    #[inline]
    pub fn new(identifier: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            text: text.into(),
        }
    }
}

/// Read one file; its identifier is the path as given
#[inline]
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<SourceDocument> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .map_err(|e| RagError::Source(format!("Failed to read {}: {}", path.display(), e)))?;

    Ok(SourceDocument::new(
        path.to_string_lossy(),
        String::from_utf8_lossy(&bytes),
    ))
}

/// Read every matching file under `root`
///
/// Hidden directories are not descended into. Identifiers are relative to
/// `root` with `/` separators, and the result is sorted by identifier.
#[inline]
pub fn load_directory<P: AsRef<Path>>(root: P, extensions: &[&str]) -> Result<Vec<SourceDocument>> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(RagError::Source(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut documents = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden_dir(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };

        if !entry.file_type().is_file() || !has_extension(entry.path(), extensions) {
            continue;
        }

        let bytes = match fs::read(entry.path()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping unreadable file {}: {}", entry.path().display(), e);
                continue;
            }
        };

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let identifier = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        documents.push(SourceDocument::new(
            identifier,
            String::from_utf8_lossy(&bytes),
        ));
    }

    documents.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    debug!(
        "Loaded {} documents from {}",
        documents.len(),
        root.display()
    );

    Ok(documents)
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name().to_string_lossy().starts_with('.')
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(&ext)))
}
