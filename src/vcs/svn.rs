//! Subversion operations used by the svn resolver.
//!
//! Repositories are expected in the standard `trunk/`, `tags/`, `branches/`
//! layout. Refs map to the revision they were last changed in.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

use super::RefSet;
use super::command::{ExecPool, VcsCommand};
use crate::metadata::Resolution;

/// Parses `svn list --verbose` output into name to revision.
pub fn parse_list(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let revision = parts.next()?;
            let name = parts.last()?.trim_end_matches('/');
            if name.is_empty() || name == "." || !revision.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            Some((name.to_string(), revision.to_string()))
        })
        .collect()
}

async fn list_dir(source: &str, dir: &str, pool: &ExecPool) -> BTreeMap<String, String> {
    let url = format!("{}/{dir}", source.trim_end_matches('/'));
    match VcsCommand::svn().args(["list", "--verbose", url.as_str()]).pool(pool).execute_stdout().await {
        Ok(stdout) => parse_list(&stdout),
        Err(e) => {
            tracing::debug!(target: "vcs", "No {} listed for {}: {:#}", dir, source, e);
            BTreeMap::new()
        }
    }
}

/// Lists tags and branches, with `trunk` as a branch.
pub async fn list_refs(source: &str, pool: &ExecPool) -> Result<RefSet> {
    let tags = list_dir(source, "tags", pool).await;
    let mut branches = list_dir(source, "branches", pool).await;

    let trunk = format!("{}/trunk", source.trim_end_matches('/'));
    let revision = VcsCommand::svn()
        .args(["info", "--show-item", "last-changed-revision", trunk.as_str()])
        .with_context(source)
        .pool(pool)
        .execute_stdout()
        .await?;
    branches.insert("trunk".to_string(), revision);

    Ok(RefSet {
        tags,
        branches,
    })
}

/// Repository path a resolution exports from.
pub fn export_path(resolution: &Resolution) -> String {
    match resolution {
        Resolution::Version { tag, .. } | Resolution::Tag { tag, .. } => format!("tags/{tag}"),
        Resolution::Branch { branch, .. } if branch == "trunk" => "trunk".to_string(),
        Resolution::Branch { branch, .. } => format!("branches/{branch}"),
        Resolution::Commit { .. } => "trunk".to_string(),
    }
}

/// Exports the resolved path at its revision into `dest`.
pub async fn export(source: &str, resolution: &Resolution, dest: &Path, pool: &ExecPool) -> Result<()> {
    let url = format!("{}/{}", source.trim_end_matches('/'), export_path(resolution));
    VcsCommand::svn()
        .args(["export", "--force", "-r", resolution.commit(), url.as_str()])
        .arg(dest.display().to_string())
        .with_context(source)
        .pool(pool)
        .execute_success()
        .await
}
