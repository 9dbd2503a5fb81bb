//! The `pkgplan` binary, driven through `assert_cmd`.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::common::write_meta;

/// Writes a config keeping every directory under `root` and returns its path.
fn write_config(root: &Path) -> PathBuf {
    let path = root.join("config.toml");
    let content = format!(
        "fail_fast_grace_secs = 1\n\n[storage]\npackages = \"{}\"\ntmp = \"{}\"\n",
        root.join("packages").display(),
        root.join("tmp").display()
    );
    fs::write(&path, content).unwrap();
    path
}

fn pkgplan(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pkgplan").unwrap();
    cmd.current_dir(root.join("project"))
        .env("NO_COLOR", "1")
        .env("PKGPLAN_CONFIG", write_config(root))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("pkgplan")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("cache"));
}

#[test]
fn test_resolve_local_package_as_json() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("project");
    write_meta(&project.join("vendor/gadget"), &json!({"name": "gadget", "version": "0.3.0"})).unwrap();

    let output = pkgplan(temp.path()).args(["--quiet", "resolve", "./vendor/gadget", "--json"]).output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let plan: Value = serde_json::from_slice(&output.stdout).unwrap();
    let gadget = &plan["gadget"];
    assert_eq!(gadget["endpoint"]["source"], "./vendor/gadget");
    assert_eq!(gadget["pkgMeta"]["version"], "0.3.0");
    assert!(Path::new(gadget["canonicalDir"].as_str().unwrap()).join("package.json").is_file());
}

#[test]
fn test_explicit_config_flag() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("project");
    write_meta(&project.join("gadget"), &json!({"name": "gadget"})).unwrap();
    let config = write_config(temp.path());

    Command::cargo_bin("pkgplan")
        .unwrap()
        .current_dir(&project)
        .env("NO_COLOR", "1")
        .env_remove("PKGPLAN_CONFIG")
        .args(["--config", config.to_str().unwrap(), "-q", "resolve", "./gadget"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Install plan:"))
        .stdout(predicate::str::contains("gadget"));
}

#[test]
fn test_missing_path_reports_error_code() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("project")).unwrap();

    pkgplan(temp.path())
        .args(["-q", "resolve", "./nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NO_RESOLVER"))
        .stderr(predicate::str::contains("./nowhere"));
}

#[test]
fn test_cache_list_and_clean() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("project")).unwrap();

    pkgplan(temp.path())
        .args(["cache", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cache is empty"));

    pkgplan(temp.path())
        .args(["cache", "clean"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cache cleared"));
}
