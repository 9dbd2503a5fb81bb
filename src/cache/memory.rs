//! Process-wide in-memory indexes.
//!
//! [`RuntimeCache`] is created once per process run and handed to every
//! cache, repository and resolver by `Arc`. It holds:
//!
//! - per cache root, an LRU of `source hash -> sorted release list` so that
//!   several [`ResolveCache`](super::ResolveCache) instances on the same root
//!   share one view;
//! - per VCS source, the refs last listed from the remote.
//!
//! Entries expire after a TTL and everything can be dropped at once with
//! [`RuntimeCache::clear`].

use dashmap::DashMap;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::constants::{
    ROOT_INDEX_CAPACITY, ROOT_INDEX_TTL, SOURCE_INDEX_CAPACITY, SOURCE_INDEX_TTL,
};
use crate::vcs::RefSet;

struct Timed<T> {
    stored_at: Instant,
    value: T,
}

/// An LRU whose entries also expire after a fixed age.
pub struct TimedLru<K: std::hash::Hash + Eq, V> {
    inner: Mutex<LruCache<K, Timed<V>>>,
    ttl: Duration,
}

impl<K: std::hash::Hash + Eq, V: Clone> TimedLru<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let expired = match inner.get(key) {
            None => return None,
            Some(entry) => entry.stored_at.elapsed() > self.ttl,
        };
        if expired {
            inner.pop(key);
            return None;
        }
        inner.get(key).map(|entry| entry.value.clone())
    }

    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.put(
            key,
            Timed {
                stored_at: Instant::now(),
                value,
            },
        );
    }

    /// Applies `f` to the entry in place, if present and fresh.
    pub fn update<F: FnOnce(&mut V)>(&self, key: &K, f: F) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get_mut(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => {
                f(&mut entry.value);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, key: &K) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pop(key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Release lists for the sources under one cache root.
pub type SourceIndex = TimedLru<String, Vec<String>>;

/// Shared in-memory state for one process run.
pub struct RuntimeCache {
    roots: TimedLru<PathBuf, Arc<SourceIndex>>,
    refs: DashMap<String, Arc<RefSet>>,
}

impl Default for RuntimeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeCache {
    pub fn new() -> Self {
        Self {
            roots: TimedLru::new(ROOT_INDEX_CAPACITY, ROOT_INDEX_TTL),
            refs: DashMap::new(),
        }
    }

    /// The source index for a cache root, created on first use.
    pub fn source_index(&self, root: &Path) -> Arc<SourceIndex> {
        let key = root.to_path_buf();
        if let Some(index) = self.roots.get(&key) {
            return index;
        }
        let index = Arc::new(SourceIndex::new(SOURCE_INDEX_CAPACITY, SOURCE_INDEX_TTL));
        self.roots.put(key, Arc::clone(&index));
        index
    }

    /// Refs last listed for a VCS source.
    pub fn refs(&self, source: &str) -> Option<Arc<RefSet>> {
        self.refs.get(source).map(|entry| Arc::clone(entry.value()))
    }

    pub fn store_refs(&self, source: &str, refs: RefSet) -> Arc<RefSet> {
        let refs = Arc::new(refs);
        self.refs.insert(source.to_string(), Arc::clone(&refs));
        refs
    }

    /// Drops every in-memory index.
    pub fn clear(&self) {
        self.roots.clear();
        self.refs.clear();
        tracing::debug!(target: "cache", "Runtime cache cleared");
    }
}
