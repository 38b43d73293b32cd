#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{NewRepository, Repository};
use crate::{RagError, Result};

const ALLOWED_SCHEMES: &[&str] = &["http", "https", "ssh", "git", "file"];

/// Local clones of remote repositories, keyed by URL
///
/// A clone is reused for as long as its registration and directory both
/// exist. Cloning a URL whose target directory belongs to another URL evicts
/// the other clone first.
#[derive(Debug, Clone)]
pub struct RepoCache {
    cache_dir: PathBuf,
    database: Database,
}

impl RepoCache {
    #[inline]
    pub fn new(cache_dir: impl Into<PathBuf>, database: Database) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            database,
        }
    }

    /// Cache rooted at the configured repository directory, registry in the configured database
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let database = Database::initialize_from_config_dir(config.get_base_dir())
            .await
            .map_err(database_error)?;
        Ok(Self::new(config.repository_cache_path(), database))
    }

    #[inline]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Local path of a clone of `url`, cloning when no usable clone exists
    #[inline]
    pub async fn checkout(&self, url: &str) -> Result<PathBuf> {
        let url = validate_repository_url(url)?;
        let key = url.as_str();

        if let Some(existing) = self
            .database
            .get_repository(key)
            .await
            .map_err(database_error)?
        {
            if existing.path().is_dir() {
                debug!("Reusing clone of {} at {}", key, existing.local_path);
                return Ok(existing.path());
            }
            warn!(
                "Clone of {} vanished from {}, cloning again",
                key, existing.local_path
            );
            self.database
                .remove_repository(key)
                .await
                .map_err(database_error)?;
        }

        let target = self.cache_dir.join(repository_name(&url));
        let target_str = target.to_string_lossy().into_owned();

        if let Some(occupant) = self
            .database
            .get_repository_by_path(&target_str)
            .await
            .map_err(database_error)?
        {
            info!(
                "Evicting {} to make room for {} at {}",
                occupant.url, key, target_str
            );
            self.evict(&occupant.url).await?;
        }

        if target.exists() {
            debug!("Removing unregistered directory {}", target.display());
            remove_dir(&target).await?;
        }

        self.clone_into(key, &target).await?;

        self.database
            .register_repository(&NewRepository {
                url: key.to_string(),
                local_path: target_str,
            })
            .await
            .map_err(database_error)?;

        Ok(target)
    }

    /// Discard any existing clone of `url` and clone it again
    #[inline]
    pub async fn refresh(&self, url: &str) -> Result<PathBuf> {
        let parsed = validate_repository_url(url)?;
        self.evict(parsed.as_str()).await?;
        self.checkout(url).await
    }

    /// Remove the registration and directory of `url`; returns whether a clone was registered
    #[inline]
    pub async fn evict(&self, url: &str) -> Result<bool> {
        let key = validate_repository_url(url)?;
        let key = key.as_str();

        let Some(existing) = self
            .database
            .get_repository(key)
            .await
            .map_err(database_error)?
        else {
            return Ok(false);
        };

        if existing.path().exists() {
            remove_dir(&existing.path()).await?;
        }
        self.database
            .remove_repository(key)
            .await
            .map_err(database_error)?;

        info!("Evicted clone of {}", key);
        Ok(true)
    }

    #[inline]
    pub async fn list(&self) -> Result<Vec<Repository>> {
        self.database
            .list_repositories()
            .await
            .map_err(database_error)
    }

    async fn clone_into(&self, url: &str, target: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| {
                RagError::Source(format!(
                    "Failed to create repository cache {}: {}",
                    self.cache_dir.display(),
                    e
                ))
            })?;

        info!("Cloning {} into {}", url, target.display());
        let output = Command::new("git")
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg("--quiet")
            .arg(url)
            .arg(target)
            .output()
            .await
            .map_err(|e| RagError::Source(format!("Failed to run git: {}", e)))?;

        if !output.status.success() {
            if target.exists() {
                let _ = tokio::fs::remove_dir_all(target).await;
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RagError::Source(format!(
                "Failed to clone {}: {}",
                url,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Parse a repository URL and check its scheme
#[inline]
pub fn validate_repository_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| RagError::Source(format!("Invalid repository URL {:?}: {}", url, e)))?;

    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(RagError::Source(format!(
            "Unsupported repository URL scheme {:?} (expected one of {})",
            parsed.scheme(),
            ALLOWED_SCHEMES.join(", ")
        )));
    }

    Ok(parsed)
}

/// Directory name for a clone: the last path segment without a `.git` suffix
#[inline]
pub fn repository_name(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| s.strip_suffix(".git").unwrap_or(s).to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "repository".to_string());

    let name = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string();

    if name.is_empty() {
        "repository".to_string()
    } else {
        name
    }
}

/// Collection name for a repository: its directory name plus a short hash of the URL
///
/// Repositories sharing a last path segment (`a/utils`, `b/utils`) get
/// distinct collections.
#[inline]
pub fn repository_collection_name(url: &Url) -> String {
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_str().as_bytes())
        .simple()
        .to_string();
    let short: String = digest.chars().take(8).collect();
    format!("{}-{}", repository_name(url), short)
}

async fn remove_dir(path: &Path) -> Result<()> {
    tokio::fs::remove_dir_all(path).await.map_err(|e| {
        RagError::Source(format!("Failed to remove {}: {}", path.display(), e))
    })
}

fn database_error(error: anyhow::Error) -> RagError {
    RagError::Database(format!("{error:#}"))
}
