//! Cross-process locks guarding cache stores.
//!
//! One lock file exists per `(source hash, release)` pair while a store for
//! that pair is in progress, so stores of different pairs never wait on each
//! other. Acquisition polls `try_lock_exclusive` at a fixed interval for a
//! bounded number of attempts; the lock file is unlocked and deleted on drop.
//!
//! All file operations run in `spawn_blocking` to keep the runtime free.

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_retry::strategy::FixedInterval;
use tracing::debug;

use crate::core::ResolveError;

/// Exclusive hold on one cache entry's lock file.
#[derive(Debug)]
pub struct StoreLock {
    file: Arc<File>,
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        #[allow(unstable_name_collisions)]
        if let Err(e) = FileExt::unlock(self.file.as_ref()) {
            debug!(target: "cache", path = %self.path.display(), error = %e, "Failed to unlock");
        }
        // A waiter may now hold the unlinked inode while a newcomer locks a
        // fresh file; `ResolveCache::store` re-checks the entry after locking.
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(target: "cache", path = %self.path.display(), error = %e, "Failed to remove lock file");
            }
        }
        debug!(target: "cache", path = %self.path.display(), "Store lock released");
    }
}

impl StoreLock {
    /// Takes the lock `<locks_dir>/<name>.lock`, polling every `wait` up to `retries` times.
    ///
    /// # Errors
    ///
    /// [`ResolveError::LockTimeout`] when every attempt found the lock held.
    pub async fn acquire(locks_dir: &Path, name: &str, wait: Duration, retries: usize) -> Result<Self> {
        tokio::fs::create_dir_all(locks_dir)
            .await
            .with_context(|| format!("Failed to create locks directory: {}", locks_dir.display()))?;

        let path = locks_dir.join(format!("{name}.lock"));
        let open_path = path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().create(true).write(true).truncate(false).open(&open_path)
        })
        .await
        .context("spawn_blocking panicked")?
        .with_context(|| format!("Failed to open lock file: {}", path.display()))?;
        let file = Arc::new(file);

        let attempts = std::iter::once(Duration::ZERO).chain(FixedInterval::new(wait).take(retries));
        for delay in attempts {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let handle = Arc::clone(&file);
            let locked = tokio::task::spawn_blocking(move || handle.try_lock_exclusive())
                .await
                .context("spawn_blocking panicked")?;
            if matches!(locked, Ok(true)) {
                debug!(target: "cache", path = %path.display(), "Store lock acquired");
                return Ok(Self {
                    file,
                    path,
                });
            }
        }

        Err(ResolveError::LockTimeout {
            path: path.display().to_string(),
        }
        .into())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Deletes `.lock` files older than `ttl`, returning how many were removed.
pub async fn cleanup_stale_locks(locks_dir: &Path, ttl: Duration) -> Result<usize> {
    if !locks_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    let now = SystemTime::now();
    let mut entries = tokio::fs::read_dir(locks_dir)
        .await
        .with_context(|| format!("Failed to read locks directory: {}", locks_dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("lock") {
            continue;
        }
        let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
            continue;
        };
        let stale = now.duration_since(modified).is_ok_and(|age| age > ttl);
        if stale && tokio::fs::remove_file(&path).await.is_ok() {
            removed += 1;
        }
    }

    Ok(removed)
}
