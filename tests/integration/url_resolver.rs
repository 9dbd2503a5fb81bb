//! URL sources against a local HTTP server.

use pkgplan_cli::core::{Logger, error_code};
use pkgplan_cli::endpoint::Endpoint;
use pkgplan_cli::repository::PackageRepository;
use pkgplan_cli::test_utils::MemoryLogger;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use crate::common::{Canned, TestServer, tarball, test_config};

fn repository(root: &Path) -> (PackageRepository, Arc<MemoryLogger>) {
    let logger = Arc::new(MemoryLogger::default());
    let shared: Arc<dyn Logger> = logger.clone();
    (PackageRepository::new(Arc::new(test_config(root)), shared).unwrap(), logger)
}

#[tokio::test]
async fn test_single_file_is_renamed_to_index() {
    let server = TestServer::start().await.unwrap();
    server.route("/dist/lib.min.js", Canned::ok("window.lib = {};").header("ETag", "\"0123456789abcdef\""));
    let temp = TempDir::new().unwrap();
    let (repository, _) = repository(temp.path());

    let fetched = repository.fetch(&Endpoint::new(None, &server.url("/dist/lib.min.js"), "*")).await.unwrap();
    assert_eq!(fetched.name, "lib.min");
    assert!(!fetched.targetable);
    assert_eq!(fs::read_to_string(fetched.canonical_dir.join("index.js")).unwrap(), "window.lib = {};");
    assert_eq!(fetched.pkg_meta.main.as_ref().and_then(|m| m.as_str()), Some("index.js"));
    assert_eq!(fetched.pkg_meta.release.as_deref(), Some("e-tag:012345678"));
    let headers = fetched.pkg_meta.cache_headers.as_ref().unwrap();
    assert_eq!(headers.get("ETag").map(String::as_str), Some("\"0123456789abcdef\""));
}

#[tokio::test]
async fn test_tarball_is_extracted_and_unwrapped() {
    let server = TestServer::start().await.unwrap();
    let body = tarball(
        "package",
        &[("package.json", r#"{"name": "bundle", "version": "2.0.0"}"#), ("lib/main.js", "main")],
    )
    .unwrap();
    server.route("/bundle.tar.gz", Canned::ok(body).header("Content-Type", "application/x-gzip"));
    let temp = TempDir::new().unwrap();
    let (repository, _) = repository(temp.path());

    let fetched = repository.fetch(&Endpoint::new(None, &server.url("/bundle.tar.gz"), "*")).await.unwrap();
    assert_eq!(fetched.name, "bundle");
    assert_eq!(fetched.pkg_meta.version.as_deref(), Some("2.0.0"));
    assert_eq!(fs::read_to_string(fetched.canonical_dir.join("lib/main.js")).unwrap(), "main");
    assert!(!fetched.canonical_dir.join("bundle.tar.gz").exists());
}

#[tokio::test]
async fn test_cached_download_is_revalidated_with_etag() {
    let server = TestServer::start().await.unwrap();
    server.route("/util.js", Canned::ok("v1").header("ETag", "\"aaaa\""));
    let temp = TempDir::new().unwrap();
    let url = server.url("/util.js");
    let endpoint = Endpoint::new(None, &url, "*");

    let (first, _) = repository(temp.path());
    let fetched = first.fetch(&endpoint).await.unwrap();

    let (second, logger) = repository(temp.path());
    let cached = second.fetch(&endpoint).await.unwrap();
    assert_eq!(cached.canonical_dir, fetched.canonical_dir);
    assert!(logger.ids().contains(&"validate".to_string()));
    assert!(server.hits().contains(&"HEAD /util.js".to_string()));

    server.route("/util.js", Canned::ok("v2").header("ETag", "\"bbbb\""));
    let (third, logger) = repository(temp.path());
    let updated = third.fetch(&endpoint).await.unwrap();
    assert!(logger.ids().contains(&"new".to_string()));
    assert_eq!(fs::read_to_string(updated.canonical_dir.join("index.js")).unwrap(), "v2");
}

#[tokio::test]
async fn test_http_errors_and_targets() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let (repository, _) = repository(temp.path());

    let err = repository.fetch(&Endpoint::new(None, &server.url("/missing.js"), "*")).await.unwrap_err();
    assert_eq!(error_code(&err), Some("DOWNLOAD_FAILED"));
    assert!(format!("{err:#}").contains("404"));

    let err = repository.fetch(&Endpoint::new(None, &server.url("/lib.js"), "~1.0.0")).await.unwrap_err();
    assert_eq!(error_code(&err), Some("NO_RESOLVE_TARGET"));
}
