//! GitHub sources: tag archives over https, clone for everything else.

use anyhow::{Context, Result};
use std::path::Path;

use super::{Materialized, Resolver};
use crate::core::LogData;

impl Resolver {
    pub(super) async fn materialize_github(&self, owner: &str, repo: &str, dir: &Path) -> Result<Materialized> {
        let resolution = self.find_resolution().await?;

        if let Some(tag) = resolution.tag() {
            let base = self.ctx.config.github_archive_base.trim_end_matches('/');
            let url = format!("{base}/{owner}/{repo}/archive/{tag}.tar.gz");
            self.logger.action("download", &url, LogData::default());
            match self.download_tarball(&url, dir).await {
                Ok(()) => return Ok(Materialized::vcs(resolution)),
                Err(e) => {
                    self.logger.warn(
                        "error",
                        &format!("Download of tarball failed, trying with git: {e:#}"),
                        LogData::default().with_extra(serde_json::json!({ "url": url })),
                    );
                    reset_dir(dir).await?;
                }
            }
        }

        self.clone_resolution(&resolution, dir).await?;
        Ok(Materialized::vcs(resolution))
    }

    async fn download_tarball(&self, url: &str, dir: &Path) -> Result<()> {
        let download = self.download(url, dir).await?;
        if !self.extract_download(&download, dir).await? {
            anyhow::bail!("{} is not an archive", download.path.display());
        }
        Ok(())
    }
}

/// Empties `dir` after a failed download so the clone starts clean.
async fn reset_dir(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        crate::utils::fs::remove_dir_all(&dir)?;
        std::fs::create_dir_all(&dir).with_context(|| format!("Failed to recreate {}", dir.display()))
    })
    .await
    .context("spawn_blocking panicked")?
}
