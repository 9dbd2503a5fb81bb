//! Cross-cutting helpers: file system operations and retry backoff.

pub mod backoff;
pub mod fs;

pub use backoff::{exponential_backoff_with_delay, remove_dir_with_retry};
pub use fs::{copy_dir, copy_dir_filtered, ensure_dir, move_dir, normalize_path, remove_dir_all};
