use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{NewRepository, Repository};
use crate::database::sqlite::queries::RepositoryQueries;


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_url: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        let db_path = config_dir.join("metadata.db");
        let db_url = db_path.to_string_lossy();

        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(db_url.as_ref()).await
    }

    // Repository registry operations
    #[inline]
    pub async fn register_repository(&self, repository: &NewRepository) -> Result<Repository> {
        RepositoryQueries::upsert(&self.pool, repository.clone()).await
    }

    #[inline]
    pub async fn get_repository(&self, url: &str) -> Result<Option<Repository>> {
        RepositoryQueries::get_by_url(&self.pool, url).await
    }

    #[inline]
    pub async fn get_repository_by_path(&self, local_path: &str) -> Result<Option<Repository>> {
        RepositoryQueries::get_by_local_path(&self.pool, local_path).await
    }

    #[inline]
    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        RepositoryQueries::list_all(&self.pool).await
    }

    #[inline]
    pub async fn remove_repository(&self, url: &str) -> Result<bool> {
        RepositoryQueries::delete(&self.pool, url).await
    }
}
