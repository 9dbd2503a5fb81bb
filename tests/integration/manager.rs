//! Whole resolve runs over local packages and git repositories.

use pkgplan_cli::config::Config;
use pkgplan_cli::core::{Logger, ResolveError, error_code};
use pkgplan_cli::endpoint::Endpoint;
use pkgplan_cli::manager::{Manager, Setup, installed_meta};
use pkgplan_cli::repository::PackageRepository;
use pkgplan_cli::test_utils::{MemoryLogger, ScriptedPrompter};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use crate::common::{TestGit, has_git, test_config, write_meta};

/// A git repo `widget` with tags 1.0.0 and 1.1.0 and a `develop` branch,
/// plus two plain packages depending on it with the given targets.
fn workspace(root: &Path, app_target: &str, tool_target: &str) -> String {
    let widget = root.join("widget");
    let git = TestGit::new(&widget);
    git.init().unwrap();
    for version in ["1.0.0", "1.1.0"] {
        git.write("package.json", &json!({"name": "widget", "version": version}).to_string()).unwrap();
        git.commit(version).unwrap();
        git.tag(version).unwrap();
    }
    git.branch("develop").unwrap();

    let widget_source = widget.display().to_string();
    let project = root.join("project");
    write_meta(
        &project.join("app"),
        &json!({"name": "app", "dependencies": {"widget": format!("{widget_source}#{app_target}")}}),
    )
    .unwrap();
    write_meta(
        &project.join("tool"),
        &json!({"name": "tool", "dependencies": {"widget": format!("{widget_source}#{tool_target}")}}),
    )
    .unwrap();
    widget_source
}

fn manager(config: Config) -> (Manager, Arc<MemoryLogger>) {
    let config = Arc::new(config);
    let logger = Arc::new(MemoryLogger::default());
    let shared: Arc<dyn Logger> = logger.clone();
    let repository = Arc::new(PackageRepository::new(Arc::clone(&config), Arc::clone(&shared)).unwrap());
    (Manager::new(config, repository, shared), logger)
}

fn targets(inputs: &[&str]) -> Vec<Endpoint> {
    inputs
        .iter()
        .map(|input| {
            let mut endpoint = Endpoint::decompose(input).unwrap();
            endpoint.newly = true;
            endpoint
        })
        .collect()
}

#[tokio::test]
async fn test_shared_dependency_is_elected_once() {
    if !has_git() {
        return;
    }
    let temp = TempDir::new().unwrap();
    workspace(temp.path(), "~1.0.0", "^1.0.0");
    let (manager, _) = manager(test_config(temp.path()));
    manager
        .configure(Setup {
            targets: targets(&["./app", "./tool"]),
            ..Setup::default()
        })
        .unwrap();

    let plan = manager.resolve().await.unwrap();
    assert_eq!(plan.keys().collect::<Vec<_>>(), vec!["app", "tool", "widget"]);
    let widget = &plan["widget"];
    assert_eq!(widget.version(), Some("1.0.0"));
    assert!(!widget.dependants.is_empty());
    assert!(plan["app"].untargetable);
    assert!(manager.resolutions().is_empty());
}

#[tokio::test]
async fn test_version_and_branch_conflict() {
    if !has_git() {
        return;
    }
    let temp = TempDir::new().unwrap();
    workspace(temp.path(), "~1.0.0", "develop");
    let (manager, _) = manager(test_config(temp.path()));
    manager
        .configure(Setup {
            targets: targets(&["./app", "./tool"]),
            ..Setup::default()
        })
        .unwrap();

    let err = manager.resolve().await.unwrap_err();
    assert_eq!(error_code(&err), Some("CONFLICT"));
    let Some(ResolveError::Conflict { name, picks }) = err.downcast_ref::<ResolveError>() else {
        panic!("expected a conflict: {err:#}");
    };
    assert_eq!(name, "widget");
    assert_eq!(picks.len(), 2);
    // Unversioned picks sort below versioned ones
    assert_eq!(picks[0].version, None);
    assert_eq!(picks[1].version.as_deref(), Some("1.0.0"));
    assert_eq!(picks[1].dependants, vec!["app".to_string()]);
}

#[tokio::test]
async fn test_conflict_settled_by_force_latest_then_by_resolution() {
    if !has_git() {
        return;
    }
    let temp = TempDir::new().unwrap();
    workspace(temp.path(), "~1.0.0", "develop");
    let mut config = test_config(temp.path());
    config.force_latest = true;
    let (forced, logger) = manager(config);
    forced
        .configure(Setup {
            targets: targets(&["./app", "./tool"]),
            ..Setup::default()
        })
        .unwrap();

    let plan = forced.resolve().await.unwrap();
    assert_eq!(plan["widget"].version(), Some("1.0.0"));
    let resolutions = forced.resolutions();
    assert_eq!(resolutions.get("widget").map(String::as_str), Some("~1.0.0"));
    assert!(logger.ids().contains(&"solved".to_string()));

    // Saved resolutions only apply when no pick descends from a fresh request
    let (resolved, _) = manager(test_config(temp.path()));
    resolved
        .configure(Setup {
            targets: vec![Endpoint::decompose("./app").unwrap(), Endpoint::decompose("./tool").unwrap()],
            resolutions,
            ..Setup::default()
        })
        .unwrap();
    let plan = resolved.resolve().await.unwrap();
    assert_eq!(plan["widget"].version(), Some("1.0.0"));
}

#[tokio::test]
async fn test_interactive_pick() {
    if !has_git() {
        return;
    }
    let temp = TempDir::new().unwrap();
    workspace(temp.path(), "~1.0.0", "develop");
    let mut config = test_config(temp.path());
    config.interactive = true;
    let (manager, _) = manager(config);
    let manager = manager.with_prompter(Arc::new(ScriptedPrompter::new(["1"])));
    manager
        .configure(Setup {
            targets: targets(&["./app", "./tool"]),
            ..Setup::default()
        })
        .unwrap();

    let plan = manager.resolve().await.unwrap();
    assert_eq!(plan["widget"].target, "develop");
    assert!(manager.resolutions().is_empty());
}

#[tokio::test]
async fn test_direct_wildcard_is_promoted_and_installed_is_skipped() {
    if !has_git() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let widget = workspace(temp.path(), "~1.0.0", "^1.0.0");
    let (manager, _) = manager(test_config(temp.path()));
    manager
        .configure(Setup {
            targets: targets(&[&widget]),
            ..Setup::default()
        })
        .unwrap();

    let plan = manager.resolve().await.unwrap();
    let endpoint = &plan["widget"];
    assert_eq!(endpoint.target, "^1.1.0");
    assert_eq!(endpoint.original_target.as_deref(), Some("*"));

    let mut installed = BTreeMap::new();
    installed.insert("widget".to_string(), installed_meta(endpoint).unwrap());
    let mut again = targets(&[&format!("{widget}#^1.1.0")]);
    again[0].name = Some("widget".to_string());
    manager
        .configure(Setup {
            targets: again,
            installed,
            ..Setup::default()
        })
        .unwrap();
    assert!(manager.resolve().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failure_aborts_the_run() {
    let temp = TempDir::new().unwrap();
    write_meta(&temp.path().join("project/app"), &json!({"name": "app"})).unwrap();
    let (manager, _) = manager(test_config(temp.path()));
    manager
        .configure(Setup {
            targets: targets(&["./app", "./missing"]),
            ..Setup::default()
        })
        .unwrap();

    let err = manager.resolve().await.unwrap_err();
    assert_eq!(error_code(&err), Some("NO_RESOLVER"));
    assert!(!manager.is_working());
}
