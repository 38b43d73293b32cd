use super::*;
use crate::database::sqlite::Database;
use tempfile::TempDir;

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

fn new_repository(url: &str, local_path: &str) -> NewRepository {
    NewRepository {
        url: url.to_string(),
        local_path: local_path.to_string(),
    }
}

#[tokio::test]
async fn upsert_and_fetch() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let pool = database.pool();

    let created = RepositoryQueries::upsert(
        pool,
        new_repository("https://example.com/a.git", "/cache/a"),
    )
    .await?;
    assert_eq!(created.local_path, "/cache/a");

    let fetched = RepositoryQueries::get_by_url(pool, "https://example.com/a.git").await?;
    assert_eq!(fetched, Some(created));

    let by_path = RepositoryQueries::get_by_local_path(pool, "/cache/a").await?;
    assert_eq!(
        by_path.map(|r| r.url),
        Some("https://example.com/a.git".to_string())
    );

    Ok(())
}

#[tokio::test]
async fn upsert_replaces_existing_registration() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let pool = database.pool();

    RepositoryQueries::upsert(pool, new_repository("https://example.com/a.git", "/old")).await?;
    RepositoryQueries::upsert(pool, new_repository("https://example.com/a.git", "/new")).await?;

    let all = RepositoryQueries::list_all(pool).await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].local_path, "/new");

    Ok(())
}

#[tokio::test]
async fn list_is_sorted_and_delete_reports_removal() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let pool = database.pool();

    RepositoryQueries::upsert(pool, new_repository("https://b.example/x.git", "/b")).await?;
    RepositoryQueries::upsert(pool, new_repository("https://a.example/x.git", "/a")).await?;

    let urls: Vec<String> = RepositoryQueries::list_all(pool)
        .await?
        .into_iter()
        .map(|r| r.url)
        .collect();
    assert_eq!(urls, vec!["https://a.example/x.git", "https://b.example/x.git"]);

    assert!(RepositoryQueries::delete(pool, "https://a.example/x.git").await?);
    assert!(!RepositoryQueries::delete(pool, "https://a.example/x.git").await?);
    assert!(
        RepositoryQueries::get_by_url(pool, "https://a.example/x.git")
            .await?
            .is_none()
    );

    Ok(())
}
