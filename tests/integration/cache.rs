//! Package store behaviour across instances sharing one root.

use pkgplan_cli::cache::{ResolveCache, RuntimeCache, source_id};
use pkgplan_cli::metadata::{PackageMeta, SIDECAR_META_FILE};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use crate::common::test_config;

const SOURCE: &str = "git://example.com/widget.git";

fn cache(root: &Path) -> ResolveCache {
    ResolveCache::new(&test_config(root), Arc::new(RuntimeCache::new()))
}

async fn store(cache: &ResolveCache, root: &Path, version: Option<&str>, target: &str) -> PackageMeta {
    let meta = PackageMeta {
        version: version.map(str::to_string),
        source: Some(SOURCE.to_string()),
        target: Some(target.to_string()),
        ..PackageMeta::named("widget")
    };
    let dir = root.join("staging").join(format!("{}-{target}", version.unwrap_or("none")));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("index.js"), "module.exports = 1;").unwrap();
    meta.write_sidecar(&dir).unwrap();
    cache.store(&dir, &meta).await.unwrap();
    meta
}

#[tokio::test]
async fn test_store_layout_and_lookup() {
    let temp = TempDir::new().unwrap();
    let cache = cache(temp.path());
    store(&cache, temp.path(), Some("1.0.0"), "~1.0.0").await;
    store(&cache, temp.path(), Some("1.2.0"), "^1.0.0").await;
    store(&cache, temp.path(), None, "develop").await;

    let source_dir = cache.root().join(source_id(SOURCE));
    assert!(source_dir.join("1.0.0").join(SIDECAR_META_FILE).is_file());
    assert!(source_dir.join("develop").join("index.js").is_file());

    let hit = cache.retrieve(SOURCE, "^1.0.0").await.unwrap().unwrap();
    assert_eq!(hit.pkg_meta.version.as_deref(), Some("1.2.0"));
    let hit = cache.retrieve(SOURCE, "~1.0.0").await.unwrap().unwrap();
    assert_eq!(hit.pkg_meta.version.as_deref(), Some("1.0.0"));
    let hit = cache.retrieve(SOURCE, "develop").await.unwrap().unwrap();
    assert_eq!(hit.canonical_dir, source_dir.join("develop"));
    assert!(cache.retrieve(SOURCE, "~2.0.0").await.unwrap().is_none());
    assert!(cache.retrieve("git://example.com/other.git", "*").await.unwrap().is_none());

    assert_eq!(cache.versions(SOURCE).await.unwrap(), vec!["1.2.0", "1.0.0"]);
}

#[tokio::test]
async fn test_second_instance_sees_stored_entries() {
    let temp = TempDir::new().unwrap();
    let first = cache(temp.path());
    store(&first, temp.path(), Some("2.0.0"), "*").await;

    let second = cache(temp.path());
    let hit = second.retrieve(SOURCE, "*").await.unwrap().unwrap();
    assert_eq!(hit.pkg_meta.version.as_deref(), Some("2.0.0"));
}

#[tokio::test]
async fn test_list_and_eliminate() {
    let temp = TempDir::new().unwrap();
    let cache = cache(temp.path());
    let old = store(&cache, temp.path(), Some("1.0.0"), "1.0.0").await;
    let new = store(&cache, temp.path(), Some("1.1.0"), "1.1.0").await;
    fs::write(cache.root().join("stray.txt"), "x").unwrap();

    let listed = cache.list().await.unwrap();
    let versions: Vec<_> = listed.iter().filter_map(|e| e.pkg_meta.version.clone()).collect();
    assert_eq!(versions, vec!["1.0.0", "1.1.0"]);
    assert!(!cache.root().join("stray.txt").exists());

    cache.eliminate(&old).await.unwrap();
    assert_eq!(cache.versions(SOURCE).await.unwrap(), vec!["1.1.0"]);
    cache.eliminate(&new).await.unwrap();
    assert!(!cache.root().join(source_id(SOURCE)).exists());
}

#[tokio::test]
async fn test_corrupt_sidecar_is_invalidated() {
    let temp = TempDir::new().unwrap();
    let cache = cache(temp.path());
    store(&cache, temp.path(), Some("1.0.0"), "1.0.0").await;
    let entry = cache.root().join(source_id(SOURCE)).join("1.0.0");
    fs::write(entry.join(SIDECAR_META_FILE), "{ broken").unwrap();

    assert!(cache.retrieve(SOURCE, "1.0.0").await.unwrap().is_none());
    assert!(!entry.exists());
}

#[tokio::test]
async fn test_clear_empties_the_root() {
    let temp = TempDir::new().unwrap();
    let cache = cache(temp.path());
    store(&cache, temp.path(), Some("1.0.0"), "1.0.0").await;

    cache.clear().await.unwrap();
    assert!(cache.root().is_dir());
    assert!(cache.list().await.unwrap().is_empty());
    assert!(cache.retrieve(SOURCE, "1.0.0").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stores_of_one_release_leave_one_entry() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();
    let meta = PackageMeta {
        version: Some("1.0.0".to_string()),
        source: Some(SOURCE.to_string()),
        target: Some("~1.0.0".to_string()),
        ..PackageMeta::named("widget")
    };

    let mut handles = Vec::new();
    for worker in 0..8 {
        let staging = root.join("staging").join(worker.to_string());
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("index.js"), "module.exports = 1;").unwrap();
        meta.write_sidecar(&staging).unwrap();

        // Separate instances stand in for separate processes
        let cache = cache(&root);
        let meta = meta.clone();
        handles.push(tokio::spawn(async move { cache.store(&staging, &meta).await }));
    }

    let mut stored = Vec::new();
    for handle in handles {
        stored.push(handle.await.unwrap().unwrap());
    }

    let source_dir = cache(&root).root().join(source_id(SOURCE));
    let entries: Vec<_> = fs::read_dir(&source_dir).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("1.0.0")]);
    assert!(stored.iter().all(|dest| *dest == source_dir.join("1.0.0")));

    let release = source_dir.join("1.0.0");
    let mut files: Vec<_> = fs::read_dir(&release).unwrap().map(|e| e.unwrap().file_name()).collect();
    files.sort();
    assert_eq!(files, vec![std::ffi::OsString::from(SIDECAR_META_FILE), std::ffi::OsString::from("index.js")]);
    assert_eq!(fs::read_to_string(release.join("index.js")).unwrap(), "module.exports = 1;");
}
