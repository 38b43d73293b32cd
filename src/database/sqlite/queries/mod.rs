#[cfg(test)]
mod tests;

use super::models::{NewRepository, Repository};
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

pub struct RepositoryQueries;

impl RepositoryQueries {
    /// Register a clone, replacing any previous registration for the same URL
    #[inline]
    pub async fn upsert(pool: &SqlitePool, repository: NewRepository) -> Result<Repository> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO repositories (url, local_path, cloned_at) VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET local_path = excluded.local_path,
                                           cloned_at = excluded.cloned_at
            "#,
        )
        .bind(&repository.url)
        .bind(&repository.local_path)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to register repository")?;

        debug!(
            "Registered repository {} at {}",
            repository.url, repository.local_path
        );

        Self::get_by_url(pool, &repository.url)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve registered repository"))
    }

    #[inline]
    pub async fn get_by_url(pool: &SqlitePool, url: &str) -> Result<Option<Repository>> {
        sqlx::query_as::<_, Repository>(
            "SELECT url, local_path, cloned_at FROM repositories WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(pool)
        .await
        .context("Failed to get repository by url")
    }

    #[inline]
    pub async fn get_by_local_path(
        pool: &SqlitePool,
        local_path: &str,
    ) -> Result<Option<Repository>> {
        sqlx::query_as::<_, Repository>(
            "SELECT url, local_path, cloned_at FROM repositories WHERE local_path = ?",
        )
        .bind(local_path)
        .fetch_optional(pool)
        .await
        .context("Failed to get repository by local path")
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Repository>> {
        sqlx::query_as::<_, Repository>(
            "SELECT url, local_path, cloned_at FROM repositories ORDER BY url",
        )
        .fetch_all(pool)
        .await
        .context("Failed to list repositories")
    }

    /// Returns whether a registration was removed
    #[inline]
    pub async fn delete(pool: &SqlitePool, url: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM repositories WHERE url = ?")
            .bind(url)
            .execute(pool)
            .await
            .context("Failed to delete repository")?;

        Ok(result.rows_affected() > 0)
    }
}
