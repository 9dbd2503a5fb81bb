//! Filesystem sources: a directory or a single (possibly archived) file.

use anyhow::{Context, Result};
use std::path::Path;

use super::archive::{self, ArchiveKind};
use super::{Materialized, Resolver, base};
use crate::core::LogData;
use crate::metadata::PackageMeta;
use crate::utils::fs as fsx;

impl Resolver {
    pub(super) async fn materialize_fs(&self, path: &Path, dir: &Path) -> Result<Materialized> {
        self.logger.action("copy", &path.display().to_string(), LogData::default());
        let (src, dst) = (path.to_path_buf(), dir.to_path_buf());
        let single_file = tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let metadata = std::fs::metadata(&src)
                .with_context(|| format!("Failed to read {}", src.display()))?;
            if metadata.is_dir() {
                fsx::copy_dir(&src, &dst)?;
                // Honour the source's own ignore list before deciding on a rename
                if let Ok(Some(meta)) = PackageMeta::read_embedded(&src) {
                    base::prune_ignored(&dst, &meta.ignore)?;
                }
            } else {
                let file_name = src
                    .file_name()
                    .ok_or_else(|| anyhow::anyhow!("Invalid file source {}", src.display()))?;
                let copied = dst.join(file_name);
                std::fs::copy(&src, &copied)
                    .with_context(|| format!("Failed to copy {}", src.display()))?;
                if let Some(kind) = ArchiveKind::detect(&copied, None) {
                    archive::extract(&copied, &dst, kind)?;
                    std::fs::remove_file(&copied)?;
                    archive::move_single_dir_up(&dst)?;
                }
            }
            base::rename_single_file(&dst)
        })
        .await
        .context("spawn_blocking panicked")??;

        Ok(Materialized {
            single_file,
            ..Materialized::default()
        })
    }
}
