//! Subversion sources end to end, against a `file://` repository built with
//! the real `svn`.

use pkgplan_cli::cache::CacheEntry;
use pkgplan_cli::core::{Logger, error_code};
use pkgplan_cli::endpoint::Endpoint;
use pkgplan_cli::metadata::{PackageMeta, Resolution};
use pkgplan_cli::repository::PackageRepository;
use pkgplan_cli::test_utils::MemoryLogger;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use crate::common::{TestSvn, has_svn, test_config};

/// Revisions: 2 and 4 commit 1.0.0 and 1.1.0, 3 and 5 tag them, 6 moves trunk on.
fn gadget_repo(root: &Path) -> TestSvn {
    let svn = TestSvn::create(root).unwrap();
    svn.write("package.json", &json!({"name": "gadget", "version": "1.0.0"}).to_string()).unwrap();
    svn.write("index.js", "v1").unwrap();
    svn.commit("v1").unwrap();
    svn.tag("1.0.0").unwrap();

    svn.write("package.json", &json!({"name": "gadget", "version": "1.1.0"}).to_string()).unwrap();
    svn.write("index.js", "v1.1").unwrap();
    svn.commit("v1.1").unwrap();
    svn.tag("1.1.0").unwrap();

    svn.write("index.js", "trunk").unwrap();
    svn.commit("trunk").unwrap();
    svn
}

fn repository(root: &Path) -> PackageRepository {
    let logger: Arc<dyn Logger> = Arc::new(MemoryLogger::default());
    PackageRepository::new(Arc::new(test_config(root)), logger).unwrap()
}

fn read(dir: &Path, file: &str) -> String {
    fs::read_to_string(dir.join(file)).unwrap()
}

#[tokio::test]
async fn test_tags_trunk_and_revisions() {
    if !has_svn() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let svn = gadget_repo(&temp.path().join("svn"));
    let source = format!("svn+{}", svn.url);
    let repository = repository(temp.path());

    let tagged = repository.fetch(&Endpoint::new(None, &source, "~1.0.0")).await.unwrap();
    assert_eq!(tagged.name, "gadget");
    assert_eq!(tagged.pkg_meta.version.as_deref(), Some("1.0.0"));
    assert!(matches!(
        tagged.pkg_meta.resolution,
        Some(Resolution::Version { ref tag, ref commit }) if tag == "1.0.0" && commit == "3"
    ));
    assert_eq!(read(&tagged.canonical_dir, "index.js"), "v1");
    assert!(!tagged.canonical_dir.join(".svn").exists());

    let latest = repository.fetch(&Endpoint::new(None, &source, "*")).await.unwrap();
    assert_eq!(latest.pkg_meta.version.as_deref(), Some("1.1.0"));
    assert_eq!(read(&latest.canonical_dir, "index.js"), "v1.1");

    // Trunk's revision comes from `svn info`
    let trunk = repository.fetch(&Endpoint::new(None, &source, "trunk")).await.unwrap();
    assert!(matches!(
        trunk.pkg_meta.resolution,
        Some(Resolution::Branch { ref branch, ref commit }) if branch == "trunk" && commit == "6"
    ));
    assert_eq!(trunk.pkg_meta.version, None);
    assert_eq!(read(&trunk.canonical_dir, "index.js"), "trunk");

    let pinned = repository.fetch(&Endpoint::new(None, &source, "r2")).await.unwrap();
    assert!(matches!(pinned.pkg_meta.resolution, Some(Resolution::Commit { ref commit }) if commit == "2"));
    assert_eq!(read(&pinned.canonical_dir, "index.js"), "v1");

    let err = repository.fetch(&Endpoint::new(None, &source, "~5.0.0")).await.unwrap_err();
    assert_eq!(error_code(&err), Some("NO_RESOLVE_TARGET"));
    assert!(format!("{err:#}").contains("no tag, branch or revision matches"));
}

#[tokio::test]
async fn test_has_new_compares_revisions() {
    if !has_svn() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let svn = gadget_repo(&temp.path().join("svn"));
    let source = format!("svn+{}", svn.url);
    let repository = repository(temp.path());

    let entry = |resolution: Resolution| CacheEntry {
        canonical_dir: temp.path().join("cached"),
        pkg_meta: PackageMeta {
            resolution: Some(resolution),
            ..PackageMeta::named("gadget")
        },
    };

    let tagged = repository.factory().create(&Endpoint::new(None, &source, "~1.0.0")).await.unwrap();
    let same_tag = entry(Resolution::Version {
        tag: "1.0.0".into(),
        commit: "3".into(),
    });
    assert!(!tagged.has_new(&same_tag).await.unwrap());

    let trunk = repository.factory().create(&Endpoint::new(None, &source, "trunk")).await.unwrap();
    let stale_trunk = entry(Resolution::Branch {
        branch: "trunk".into(),
        commit: "4".into(),
    });
    assert!(trunk.has_new(&stale_trunk).await.unwrap());
    let current_trunk = entry(Resolution::Branch {
        branch: "trunk".into(),
        commit: "6".into(),
    });
    assert!(!trunk.has_new(&current_trunk).await.unwrap());
}
