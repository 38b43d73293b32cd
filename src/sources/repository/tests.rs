use super::*;
use std::process::Command as StdCommand;
use tempfile::TempDir;

fn git_available() -> bool {
    StdCommand::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

fn git(dir: &Path, args: &[&str]) {
    let status = StdCommand::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git runs");
    assert!(status.success(), "git {:?} failed", args);
}

/// Create a local repository with one committed file and return its file:// URL
fn create_origin(root: &Path, name: &str, contents: &str) -> String {
    let origin = root.join("origins").join(name);
    std::fs::create_dir_all(&origin).expect("should create origin dir");
    git(&origin, &["init", "--quiet"]);
    std::fs::write(origin.join("README.md"), contents).expect("should write file");
    git(&origin, &["add", "README.md"]);
    git(&origin, &["commit", "--quiet", "-m", "initial"]);
    Url::from_directory_path(&origin)
        .expect("origin path is absolute")
        .to_string()
}

async fn create_cache(root: &Path) -> RepoCache {
    let database = Database::initialize_from_config_dir(&root.join("state"))
        .await
        .expect("database opens");
    RepoCache::new(root.join("cache"), database)
}

#[test]
fn url_scheme_validation() {
    for url in [
        "https://github.com/rust-lang/log.git",
        "http://example.com/repo",
        "ssh://git@example.com/repo.git",
        "git://example.com/repo.git",
        "file:///srv/git/repo",
    ] {
        assert!(validate_repository_url(url).is_ok(), "{url} should be accepted");
    }

    for url in ["ftp://example.com/repo", "not a url", "mailto:someone@example.com"] {
        assert!(
            matches!(validate_repository_url(url), Err(RagError::Source(_))),
            "{url} should be rejected"
        );
    }
}

#[test]
fn repository_names() {
    let name = |url: &str| repository_name(&Url::parse(url).expect("url parses"));

    assert_eq!(name("https://github.com/rust-lang/log.git"), "log");
    assert_eq!(name("https://github.com/rust-lang/log/"), "log");
    assert_eq!(name("file:///srv/git/tools"), "tools");
    assert_eq!(name("https://example.com/"), "example.com");
    assert_eq!(name("https://example.com/a/we%20ird"), "we_20ird");
}

#[test]
fn repository_collections_are_keyed_by_url() {
    let name = |url: &str| repository_collection_name(&Url::parse(url).expect("url parses"));

    let first = name("https://github.com/alpha/utils.git");
    let second = name("https://github.com/beta/utils.git");

    assert_ne!(first, second);
    assert!(first.starts_with("utils-"));
    assert!(second.starts_with("utils-"));
    assert_eq!(first, name("https://github.com/alpha/utils.git"));
    assert!(crate::database::lancedb::validate_collection_name(&first).is_ok());
    assert!(
        crate::database::lancedb::validate_collection_name(&name("https://example.com/")).is_ok()
    );
}

#[tokio::test]
async fn checkout_clones_once_and_reuses() {
    if !git_available() {
        return;
    }
    let temp_dir = TempDir::new().expect("should create temp dir");
    let url = create_origin(temp_dir.path(), "project", "hello");
    let cache = create_cache(temp_dir.path()).await;

    let first = cache.checkout(&url).await.expect("clone succeeds");
    assert_eq!(first, temp_dir.path().join("cache").join("project"));
    assert_eq!(
        std::fs::read_to_string(first.join("README.md")).expect("file cloned"),
        "hello"
    );

    std::fs::write(first.join("marker"), "kept").expect("should write marker");
    let second = cache.checkout(&url).await.expect("reuse succeeds");
    assert_eq!(second, first);
    assert!(second.join("marker").exists());
    assert_eq!(cache.list().await.expect("list succeeds").len(), 1);
}

#[tokio::test]
async fn changed_url_evicts_previous_clone() {
    if !git_available() {
        return;
    }
    let temp_dir = TempDir::new().expect("should create temp dir");
    let first_url = create_origin(&temp_dir.path().join("one"), "project", "first");
    let second_url = create_origin(&temp_dir.path().join("two"), "project", "second");
    let cache = create_cache(temp_dir.path()).await;

    let path = cache.checkout(&first_url).await.expect("first clone succeeds");
    let replaced = cache.checkout(&second_url).await.expect("second clone succeeds");

    assert_eq!(path, replaced);
    assert_eq!(
        std::fs::read_to_string(replaced.join("README.md")).expect("file cloned"),
        "second"
    );
    let registered: Vec<String> = cache
        .list()
        .await
        .expect("list succeeds")
        .into_iter()
        .map(|r| r.url)
        .collect();
    assert_eq!(registered, vec![second_url]);
}

#[tokio::test]
async fn missing_directory_triggers_reclone() {
    if !git_available() {
        return;
    }
    let temp_dir = TempDir::new().expect("should create temp dir");
    let url = create_origin(temp_dir.path(), "project", "hello");
    let cache = create_cache(temp_dir.path()).await;

    let path = cache.checkout(&url).await.expect("clone succeeds");
    std::fs::remove_dir_all(&path).expect("should remove clone");

    let again = cache.checkout(&url).await.expect("reclone succeeds");
    assert!(again.join("README.md").exists());
}

#[tokio::test]
async fn refresh_and_evict() {
    if !git_available() {
        return;
    }
    let temp_dir = TempDir::new().expect("should create temp dir");
    let url = create_origin(temp_dir.path(), "project", "hello");
    let cache = create_cache(temp_dir.path()).await;

    let path = cache.checkout(&url).await.expect("clone succeeds");
    std::fs::write(path.join("marker"), "stale").expect("should write marker");

    let refreshed = cache.refresh(&url).await.expect("refresh succeeds");
    assert!(!refreshed.join("marker").exists());

    assert!(cache.evict(&url).await.expect("evict succeeds"));
    assert!(!refreshed.exists());
    assert!(!cache.evict(&url).await.expect("second evict succeeds"));
    assert!(cache.list().await.expect("list succeeds").is_empty());
}

#[tokio::test]
async fn failed_clone_leaves_no_registration() {
    if !git_available() {
        return;
    }
    let temp_dir = TempDir::new().expect("should create temp dir");
    let cache = create_cache(temp_dir.path()).await;
    let missing = Url::from_directory_path(temp_dir.path().join("nowhere"))
        .expect("path is absolute")
        .to_string();

    let result = cache.checkout(&missing).await;

    assert!(matches!(result, Err(RagError::Source(_))));
    assert!(cache.list().await.expect("list succeeds").is_empty());
    assert!(!temp_dir.path().join("cache").join("nowhere").exists());
}
