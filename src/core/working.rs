//! Busy flag for single-use-at-a-time engine objects.
//!
//! Resolvers and the manager reject a call that arrives while a previous one
//! is still running. [`WorkingFlag::begin`] sets the flag and hands back a
//! guard that clears it when dropped, on success and error paths alike.

use std::sync::atomic::{AtomicBool, Ordering};

use super::error::ResolveError;

#[derive(Debug, Default)]
pub struct WorkingFlag {
    busy: AtomicBool,
}

impl WorkingFlag {
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    /// Marks the owner busy.
    ///
    /// # Errors
    ///
    /// [`ResolveError::Working`] naming `what` if the owner is already busy.
    pub fn begin(&self, what: &str) -> Result<WorkingGuard<'_>, ResolveError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ResolveError::working(what))?;
        Ok(WorkingGuard {
            flag: self,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Clears the owning [`WorkingFlag`] on drop.
#[derive(Debug)]
pub struct WorkingGuard<'a> {
    flag: &'a WorkingFlag,
}

impl Drop for WorkingGuard<'_> {
    fn drop(&mut self) {
        self.flag.busy.store(false, Ordering::Release);
    }
}
