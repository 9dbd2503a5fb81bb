//! Global constants used throughout the engine.
//!
//! Timeouts, retry parameters, cache sizes and the fixed file and token names
//! that make up the on-disk cache format.

use std::time::Duration;

/// How long the manager keeps waiting for outstanding fetches after the first failure.
pub const FAIL_FAST_GRACE: Duration = Duration::from_secs(20);

/// Delay between attempts to take a store lock.
pub const LOCK_WAIT: Duration = Duration::from_millis(250);

/// Attempts to take a store lock before giving up.
pub const LOCK_RETRIES: usize = 25;

/// Lock files older than this are considered abandoned.
pub const STALE_LOCK_TTL: Duration = Duration::from_secs(3600);

/// Timeout for a single git or svn invocation.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Number of git/svn processes allowed to run at once.
pub const DEFAULT_EXEC_CONCURRENCY: usize = 5;

/// Version lists kept in memory per cache root.
pub const SOURCE_INDEX_CAPACITY: usize = 100;

/// Version lists older than this are re-read from disk.
pub const SOURCE_INDEX_TTL: Duration = Duration::from_secs(5 * 60);

/// Cache roots tracked at once.
pub const ROOT_INDEX_CAPACITY: usize = 5;

/// Cache roots not touched for this long are dropped from memory.
pub const ROOT_INDEX_TTL: Duration = Duration::from_secs(30 * 60);

/// Release directory name used for wildcard targets without a version.
pub const WILDCARD_RELEASE: &str = "_wildcard";

/// Length of the commit prefix used in release labels.
pub const SHORT_COMMIT_LEN: usize = 10;

/// Maximum backoff delay for exponential backoff (500ms).
pub const MAX_BACKOFF_DELAY_MS: u64 = 500;

/// Starting delay for exponential backoff (10ms).
pub const STARTING_BACKOFF_DELAY_MS: u64 = 10;
