//! Git sources, on disk and remote.
//!
//! Local repositories are copied into the temp directory and checked out
//! there, so the original working tree and its refs are never touched.
//! Remote repositories are cloned: shallow and single-branch for tags and
//! branches, full for commits. Either way `.git` is removed afterwards.

use anyhow::{Context, Result};
use std::path::Path;

use super::{Materialized, Resolver};
use crate::core::LogData;
use crate::metadata::Resolution;
use crate::utils::fs as fsx;
use crate::vcs::git;

impl Resolver {
    pub(super) async fn materialize_git_local(&self, path: &Path, dir: &Path) -> Result<Materialized> {
        let resolution = self.find_resolution().await?;
        self.log_checkout(&resolution);

        let (src, dst) = (path.to_path_buf(), dir.to_path_buf());
        tokio::task::spawn_blocking(move || fsx::copy_dir(&src, &dst))
            .await
            .context("spawn_blocking panicked")??;

        git::checkout(dir, resolution.reference(), &self.ctx.pool).await?;
        remove_git_dir(dir).await?;
        Ok(Materialized::vcs(resolution))
    }

    pub(super) async fn materialize_git_remote(&self, dir: &Path) -> Result<Materialized> {
        let resolution = self.find_resolution().await?;
        self.clone_resolution(&resolution, dir).await?;
        Ok(Materialized::vcs(resolution))
    }

    /// Clones the resolved ref into `dir` and strips `.git`.
    pub(super) async fn clone_resolution(&self, resolution: &Resolution, dir: &Path) -> Result<()> {
        self.log_checkout(resolution);
        match resolution {
            Resolution::Commit { commit } => {
                git::clone_commit(&self.source, commit, dir, &self.ctx.pool).await?;
            }
            _ => git::clone_ref(&self.source, resolution.reference(), dir, &self.ctx.pool).await?,
        }
        remove_git_dir(dir).await
    }

    fn log_checkout(&self, resolution: &Resolution) {
        let label = match resolution {
            Resolution::Commit { .. } => resolution.short_commit(),
            _ => resolution.reference(),
        };
        self.logger.action(
            "checkout",
            label,
            LogData::default().with_extra(serde_json::json!({ "resolution": resolution })),
        );
    }
}

async fn remove_git_dir(dir: &Path) -> Result<()> {
    let git_dir = dir.join(".git");
    tokio::task::spawn_blocking(move || fsx::remove_dir_all(&git_dir))
        .await
        .context("spawn_blocking panicked")?
}
