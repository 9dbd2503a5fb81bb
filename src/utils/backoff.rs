//! Exponential backoff utilities for retry operations.

use crate::constants::{MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS};
use std::path::Path;
use std::time::Duration;

/// Sleeps for the backoff delay of `attempt` (10ms, 20ms, 40ms... capped at
/// 500ms) and returns the next attempt number.
pub async fn exponential_backoff_with_delay(attempt: u32) -> u32 {
    let delay = std::cmp::min(
        STARTING_BACKOFF_DELAY_MS.saturating_mul(1 << attempt.min(16)),
        MAX_BACKOFF_DELAY_MS,
    );
    tokio::time::sleep(Duration::from_millis(delay)).await;
    attempt.saturating_add(1)
}

/// Removes a directory tree, retrying a few times when the removal races
/// with another process still releasing files in it.
pub async fn remove_dir_with_retry(path: &Path) -> anyhow::Result<()> {
    let mut attempt = 0;
    loop {
        let target = path.to_path_buf();
        let result =
            tokio::task::spawn_blocking(move || super::fs::remove_dir_all(&target)).await?;
        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= 3 => return Err(e),
            Err(e) => {
                tracing::debug!(target: "fs", "Retrying removal of {}: {}", path.display(), e);
                attempt = exponential_backoff_with_delay(attempt).await;
            }
        }
    }
}
