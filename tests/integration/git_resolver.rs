//! Git sources end to end, through the repository and the real `git`.
//!
//! Remote tests map `git://pkgplan.test/` onto a local directory with an
//! `insteadOf` rule passed through `GIT_CONFIG_*`, so remote sources are
//! cached exactly like network ones. `https://github.com/` is mapped the
//! same way so GitHub sources clone locally once their tarball fails.

use pkgplan_cli::core::{LogLevel, Logger, error_code};
use pkgplan_cli::endpoint::Endpoint;
use pkgplan_cli::metadata::{Resolution, SIDECAR_META_FILE};
use pkgplan_cli::repository::PackageRepository;
use pkgplan_cli::test_utils::MemoryLogger;
use serde_json::json;
use serial_test::serial;
use std::fs;
use std::path::Path;
use std::sync::{Arc, LazyLock, Once};
use tempfile::TempDir;

use crate::common::{TestGit, TestServer, has_git, test_config};

static REMOTE_ROOT: LazyLock<TempDir> = LazyLock::new(|| TempDir::new().expect("remote root"));
static REWRITE: Once = Once::new();

const REMOTE_BASE: &str = "git://pkgplan.test/";
const GITHUB_BASE: &str = "https://github.com/";

fn rewrite_remote_urls() {
    REWRITE.call_once(|| {
        let key = format!("url.file://{}/.insteadOf", REMOTE_ROOT.path().display());
        let github_key = format!("url.file://{}/github/.insteadOf", REMOTE_ROOT.path().display());
        // Set once, before any remote test spawns git
        unsafe {
            std::env::set_var("GIT_CONFIG_COUNT", "2");
            std::env::set_var("GIT_CONFIG_KEY_0", key);
            std::env::set_var("GIT_CONFIG_VALUE_0", REMOTE_BASE);
            std::env::set_var("GIT_CONFIG_KEY_1", github_key);
            std::env::set_var("GIT_CONFIG_VALUE_1", GITHUB_BASE);
        }
    });
}

/// `v1.0.0` (annotated), `1.1.0` and a `develop` branch one commit ahead.
fn widget_repo(path: &Path) -> (TestGit, String) {
    let git = TestGit::new(path);
    git.init().unwrap();
    git.write("package.json", &json!({"name": "widget", "version": "1.0.0"}).to_string()).unwrap();
    git.write("index.js", "v1").unwrap();
    let first = git.commit("v1").unwrap();
    git.annotated_tag("v1.0.0").unwrap();

    git.write("package.json", &json!({"name": "widget", "version": "1.1.0"}).to_string()).unwrap();
    git.write("index.js", "v1.1").unwrap();
    git.commit("v1.1").unwrap();
    git.tag("1.1.0").unwrap();

    git.branch("develop").unwrap();
    git.checkout("develop").unwrap();
    git.write("index.js", "dev").unwrap();
    git.commit("dev").unwrap();
    git.checkout("master").unwrap();
    (git, first)
}

fn repository(root: &Path, tweak: impl FnOnce(&mut pkgplan_cli::config::Config)) -> (PackageRepository, Arc<MemoryLogger>) {
    let mut config = test_config(root);
    tweak(&mut config);
    let logger = Arc::new(MemoryLogger::default());
    let shared: Arc<dyn Logger> = logger.clone();
    (PackageRepository::new(Arc::new(config), shared).unwrap(), logger)
}

fn read(dir: &Path, file: &str) -> String {
    fs::read_to_string(dir.join(file)).unwrap()
}

#[tokio::test]
async fn test_local_repository_targets() {
    if !has_git() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let (_git, first) = widget_repo(&temp.path().join("widget"));
    let source = temp.path().join("widget").display().to_string();
    let (repository, logger) = repository(temp.path(), |_| {});

    let fetched = repository.fetch(&Endpoint::new(None, &source, "~1.0.0")).await.unwrap();
    assert_eq!(fetched.name, "widget");
    assert!(fetched.targetable);
    assert_eq!(fetched.pkg_meta.version.as_deref(), Some("1.0.0"));
    assert!(matches!(fetched.pkg_meta.resolution, Some(Resolution::Version { ref tag, .. }) if tag == "v1.0.0"));
    assert_eq!(read(&fetched.canonical_dir, "index.js"), "v1");
    assert!(fetched.canonical_dir.join(SIDECAR_META_FILE).is_file());
    assert!(!fetched.canonical_dir.join(".git").exists());

    let latest = repository.fetch(&Endpoint::new(None, &source, "*")).await.unwrap();
    assert_eq!(latest.pkg_meta.version.as_deref(), Some("1.1.0"));

    let develop = repository.fetch(&Endpoint::new(None, &source, "develop")).await.unwrap();
    assert!(matches!(develop.pkg_meta.resolution, Some(Resolution::Branch { .. })));
    assert_eq!(read(&develop.canonical_dir, "index.js"), "dev");

    let pinned = repository.fetch(&Endpoint::new(None, &source, &first[..10])).await.unwrap();
    assert!(matches!(pinned.pkg_meta.resolution, Some(Resolution::Commit { ref commit }) if *commit == first));
    assert_eq!(read(&pinned.canonical_dir, "index.js"), "v1");

    let err = repository.fetch(&Endpoint::new(None, &source, "~5.0.0")).await.unwrap_err();
    assert_eq!(error_code(&err), Some("NO_RESOLVE_TARGET"));

    // Local sources never reach the cache
    assert!(repository.list().await.unwrap().is_empty());
    assert!(logger.ids().iter().all(|id| id != "cached"));
    assert!(logger.ids().iter().any(|id| id == "not-cached"));
}

#[tokio::test]
#[serial]
async fn test_remote_repository_is_cached_and_revalidated() {
    if !has_git() {
        return;
    }
    rewrite_remote_urls();
    let temp = TempDir::new().unwrap();
    let (git, _) = widget_repo(&REMOTE_ROOT.path().join("widget-cached.git"));
    let source = format!("{REMOTE_BASE}widget-cached.git");
    let endpoint = Endpoint::new(None, &source, "^1.0.0");

    let (first, logger) = repository(temp.path(), |_| {});
    let fetched = first.fetch(&endpoint).await.unwrap();
    assert_eq!(fetched.pkg_meta.version.as_deref(), Some("1.1.0"));
    assert!(fetched.canonical_dir.starts_with(first.cache().root()));
    assert!(logger.ids().contains(&"resolved".to_string()));

    // A fresh process finds the entry and validates it against the refs
    let (second, logger) = repository(temp.path(), |_| {});
    let cached = second.fetch(&endpoint).await.unwrap();
    assert_eq!(cached.canonical_dir, fetched.canonical_dir);
    let ids = logger.ids();
    assert!(ids.contains(&"cached".to_string()));
    assert!(ids.contains(&"validate".to_string()));
    assert!(!ids.contains(&"resolved".to_string()));

    git.write("package.json", &json!({"name": "widget", "version": "1.2.0"}).to_string()).unwrap();
    git.commit("v1.2").unwrap();
    git.tag("1.2.0").unwrap();

    let (third, logger) = repository(temp.path(), |_| {});
    let updated = third.fetch(&endpoint).await.unwrap();
    assert_eq!(updated.pkg_meta.version.as_deref(), Some("1.2.0"));
    assert!(logger.ids().contains(&"new".to_string()));
    assert_eq!(third.versions(&source).await.unwrap(), vec!["1.2.0", "1.1.0"]);

    let (offline, logger) = repository(temp.path(), |c| c.offline = true);
    let pinned = offline.fetch(&Endpoint::new(None, &source, "~1.1.0")).await.unwrap();
    assert_eq!(pinned.pkg_meta.version.as_deref(), Some("1.1.0"));
    assert!(!logger.ids().contains(&"validate".to_string()));
}

#[tokio::test]
#[serial]
async fn test_remote_branches_are_not_cached() {
    if !has_git() {
        return;
    }
    rewrite_remote_urls();
    let temp = TempDir::new().unwrap();
    widget_repo(&REMOTE_ROOT.path().join("widget-branch.git"));
    let source = format!("{REMOTE_BASE}widget-branch.git");

    let (repository, _) = repository(temp.path(), |_| {});
    let develop = repository.fetch(&Endpoint::new(None, &source, "develop")).await.unwrap();
    assert_eq!(read(&develop.canonical_dir, "index.js"), "dev");
    assert!(!develop.canonical_dir.starts_with(repository.cache().root()));
    assert!(repository.list().await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn test_offline_miss_reports_no_cache() {
    rewrite_remote_urls();
    let temp = TempDir::new().unwrap();
    let (repository, _) = repository(temp.path(), |c| c.offline = true);
    let source = format!("{REMOTE_BASE}never-fetched.git");

    let err = repository.fetch(&Endpoint::new(None, &source, "~1.0.0")).await.unwrap_err();
    assert_eq!(error_code(&err), Some("NO_CACHE"));
    assert!(format!("{err:#}").contains("never-fetched"));
}

#[tokio::test]
#[serial]
async fn test_github_tarball_failure_falls_back_to_clone() {
    if !has_git() {
        return;
    }
    rewrite_remote_urls();
    let temp = TempDir::new().unwrap();
    widget_repo(&REMOTE_ROOT.path().join("github/acme/widget.git"));
    // No routes: every archive request gets a 404
    let server = TestServer::start().await.unwrap();
    let source = format!("{GITHUB_BASE}acme/widget.git");

    let base = server.base.clone();
    let (repository, logger) = repository(temp.path(), |c| c.github_archive_base = base);
    let fetched = repository.fetch(&Endpoint::new(None, &source, "~1.0.0")).await.unwrap();
    assert_eq!(fetched.pkg_meta.version.as_deref(), Some("1.0.0"));
    assert_eq!(read(&fetched.canonical_dir, "index.js"), "v1");
    assert!(!fetched.canonical_dir.join(".git").exists());

    assert_eq!(server.hits(), vec!["GET /acme/widget/archive/v1.0.0.tar.gz".to_string()]);
    let events = logger.events();
    assert!(
        events
            .iter()
            .any(|e| e.level == LogLevel::Warn && e.message.contains("trying with git"))
    );
}
