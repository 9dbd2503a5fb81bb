//! Git operations used by the git resolvers.

use anyhow::Result;
use std::path::Path;

use super::RefSet;
use super::command::{ExecPool, VcsCommand};

/// Lists the tags and branches of a repository, remote or on disk.
pub async fn list_refs(source: &str, pool: &ExecPool) -> Result<RefSet> {
    let stdout = VcsCommand::git()
        .args(["ls-remote", "--tags", "--heads", source])
        .with_context(source)
        .pool(pool)
        .execute_stdout()
        .await?;
    Ok(RefSet::from_git_refs(&stdout))
}

/// Shallow clone of a single branch or tag.
pub async fn clone_ref(source: &str, reference: &str, dest: &Path, pool: &ExecPool) -> Result<()> {
    VcsCommand::git()
        .args(["clone", source, "-b", reference, "--progress", "--depth", "1", "."])
        .current_dir(dest)
        .with_context(source)
        .pool(pool)
        .execute_success()
        .await
}

/// Full clone followed by a checkout, for targets that name a commit.
pub async fn clone_commit(source: &str, commit: &str, dest: &Path, pool: &ExecPool) -> Result<()> {
    VcsCommand::git()
        .args(["clone", source, "--progress", "."])
        .current_dir(dest)
        .with_context(source)
        .pool(pool)
        .execute_success()
        .await?;
    checkout(dest, commit, pool).await
}

/// Forced checkout that also drops untracked files.
pub async fn checkout(dir: &Path, reference: &str, pool: &ExecPool) -> Result<()> {
    VcsCommand::git()
        .args(["checkout", "-f", reference])
        .current_dir(dir)
        .pool(pool)
        .execute_success()
        .await?;
    VcsCommand::git()
        .args(["clean", "-f", "-d"])
        .current_dir(dir)
        .pool(pool)
        .execute_success()
        .await
}
