//! Filesystem sources through the repository.

use pkgplan_cli::core::{Logger, error_code};
use pkgplan_cli::endpoint::Endpoint;
use pkgplan_cli::repository::PackageRepository;
use pkgplan_cli::test_utils::MemoryLogger;
use serde_json::json;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use crate::common::{test_config, write_meta};

fn repository(root: &Path) -> PackageRepository {
    let logger: Arc<dyn Logger> = Arc::new(MemoryLogger::default());
    PackageRepository::new(Arc::new(test_config(root)), logger).unwrap()
}

#[tokio::test]
async fn test_directory_is_copied_without_ignored_files() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("project");
    let pkg = project.join("vendor/gadget");
    write_meta(&pkg, &json!({"name": "gadget", "version": "0.3.0", "ignore": ["tests", "*.log"]})).unwrap();
    fs::write(pkg.join("gadget.js"), "gadget").unwrap();
    fs::write(pkg.join("debug.log"), "noise").unwrap();
    fs::create_dir_all(pkg.join("tests")).unwrap();
    fs::write(pkg.join("tests/spec.js"), "spec").unwrap();

    let repository = repository(temp.path());
    let fetched = repository.fetch(&Endpoint::decompose("./vendor/gadget").unwrap()).await.unwrap();
    assert_eq!(fetched.name, "gadget");
    assert!(!fetched.targetable);
    assert_eq!(fetched.pkg_meta.version.as_deref(), Some("0.3.0"));
    assert!(fetched.pkg_meta.source.as_deref().unwrap().ends_with("vendor/gadget"));
    assert!(fetched.canonical_dir.join("gadget.js").is_file());
    assert!(!fetched.canonical_dir.join("debug.log").exists());
    assert!(!fetched.canonical_dir.join("tests").exists());
    // The source is left alone
    assert!(pkg.join("debug.log").is_file());
    assert!(repository.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_single_file_and_zip_archive() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("project");
    fs::create_dir_all(&project).unwrap();
    fs::write(project.join("helper.css"), "body {}").unwrap();

    let archive = project.join("kit.zip");
    let mut zip = zip::ZipWriter::new(fs::File::create(&archive).unwrap());
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("kit/package.json", options).unwrap();
    zip.write_all(br#"{"name": "kit"}"#).unwrap();
    zip.start_file("kit/kit.js", options).unwrap();
    zip.write_all(b"kit").unwrap();
    zip.finish().unwrap();

    let repository = repository(temp.path());
    let helper = repository.fetch(&Endpoint::decompose("./helper.css").unwrap()).await.unwrap();
    assert_eq!(helper.name, "helper");
    assert_eq!(fs::read_to_string(helper.canonical_dir.join("index.css")).unwrap(), "body {}");
    assert_eq!(helper.pkg_meta.main.as_ref().and_then(|m| m.as_str()), Some("index.css"));

    let absolute = archive.display().to_string();
    let kit = repository.fetch(&Endpoint::new(None, &absolute, "*")).await.unwrap();
    assert_eq!(kit.name, "kit");
    assert_eq!(fs::read_to_string(kit.canonical_dir.join("kit.js")).unwrap(), "kit");
}

#[tokio::test]
async fn test_path_errors() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("project");
    write_meta(&project.join("present"), &json!({"name": "present"})).unwrap();
    let repository = repository(temp.path());

    let err = repository.fetch(&Endpoint::decompose("./absent").unwrap()).await.unwrap_err();
    assert_eq!(error_code(&err), Some("NO_RESOLVER"));

    let err = repository.fetch(&Endpoint::decompose("./present#1.0.0").unwrap()).await.unwrap_err();
    assert_eq!(error_code(&err), Some("NO_RESOLVE_TARGET"));
    assert!(format!("{err:#}").contains("./present#1.0.0"));
}
