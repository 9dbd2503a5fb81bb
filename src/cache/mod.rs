//! Version-indexed store of resolved packages.
//!
//! Each resolved package is kept as a directory keyed by the md5 of its
//! source locator and its release label:
//!
//! ```text
//! ~/.pkgplan/packages/
//! ├── 0a1b2c.../                  # md5("https://github.com/jquery/jquery.git")
//! │   ├── 2.0.3/                  # release = version
//! │   │   ├── .package.json
//! │   │   └── jquery.js
//! │   └── master/                 # release = raw target
//! └── 9f8e7d.../
//!     └── _wildcard/              # wildcard target, no version
//! ~/.pkgplan/packages.locks/
//! └── 0a1b2c...-2.0.3.lock        # present only while a store is running
//! ```
//!
//! Release labels are percent-encoded the way `encodeURIComponent` does.
//!
//! # Memory index
//!
//! Listing a source's releases reads the directory once and keeps the sorted
//! list in the [`RuntimeCache`] source index for the cache root. Every
//! [`ResolveCache`] built on the same root shares that index. Disk changes
//! made by this process update or invalidate it; a corrupt entry found on
//! read invalidates both the entry and the memory view.
//!
//! # Concurrency
//!
//! [`ResolveCache::store`] moves a directory into place under a per-entry
//! [`StoreLock`], so concurrent stores of the same release from different
//! processes produce one entry, while different releases proceed in parallel.

pub mod lock;
pub mod memory;

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

pub use lock::{StoreLock, cleanup_stale_locks};
pub use memory::{RuntimeCache, SourceIndex};

use crate::config::Config;
use crate::constants::{LOCK_RETRIES, LOCK_WAIT, WILDCARD_RELEASE};
use crate::endpoint::{WILDCARD, is_wildcard};
use crate::metadata::PackageMeta;
use crate::utils::fs as fsx;
use crate::utils::remove_dir_with_retry;
use crate::version::{Range, is_valid_version, parse_version, sort_releases};

/// Characters `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Directory name for a source: the hex md5 of the locator.
pub fn source_id(source: &str) -> String {
    hex::encode(Md5::digest(source.as_bytes()))
}

pub fn encode_release(release: &str) -> String {
    utf8_percent_encode(release, COMPONENT).to_string()
}

pub fn decode_release(encoded: &str) -> String {
    percent_decode_str(encoded).decode_utf8_lossy().into_owned()
}

/// Release label a package is stored under: version, else `_wildcard` for
/// wildcard targets, else the raw target.
pub fn release_for(meta: &PackageMeta) -> String {
    if let Some(version) = &meta.version {
        return version.clone();
    }
    match meta.target.as_deref() {
        None => WILDCARD_RELEASE.to_string(),
        Some(target) if is_wildcard(target) => WILDCARD_RELEASE.to_string(),
        Some(target) => target.to_string(),
    }
}

/// One stored package.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub canonical_dir: PathBuf,
    pub pkg_meta: PackageMeta,
}

/// The package cache rooted at one directory.
pub struct ResolveCache {
    root: PathBuf,
    locks_dir: PathBuf,
    lock_wait: Duration,
    lock_retries: usize,
    index: Arc<SourceIndex>,
    runtime: Arc<RuntimeCache>,
}

impl ResolveCache {
    pub fn new(config: &Config, runtime: Arc<RuntimeCache>) -> Self {
        let mut cache = Self::with_dirs(&config.storage.packages, &config.locks_dir(), runtime);
        cache.lock_wait = config.lock_wait();
        cache.lock_retries = config.lock.retries;
        cache
    }

    pub fn with_dirs(root: &Path, locks_dir: &Path, runtime: Arc<RuntimeCache>) -> Self {
        Self {
            root: root.to_path_buf(),
            locks_dir: locks_dir.to_path_buf(),
            lock_wait: LOCK_WAIT,
            lock_retries: LOCK_RETRIES,
            index: runtime.source_index(root),
            runtime,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks_dir(&self) -> &Path {
        &self.locks_dir
    }

    /// Finds the cached entry best matching `target` for a source.
    ///
    /// Ranges pick the highest satisfying version, `*` falls back to the
    /// `_wildcard` entry, anything else must match a release exactly. An
    /// entry whose sidecar cannot be read is removed and the lookup retried once.
    pub async fn retrieve(&self, source: &str, target: &str) -> Result<Option<CacheEntry>> {
        let target = if is_wildcard(target) { WILDCARD } else { target };
        let id = source_id(source);

        for attempt in 0..2 {
            let releases = self.releases(&id).await?;
            let Some(release) = select_release(&releases, target) else {
                return Ok(None);
            };
            let canonical_dir = self.root.join(&id).join(encode_release(&release));
            let read_dir = canonical_dir.clone();
            let read = tokio::task::spawn_blocking(move || PackageMeta::read_sidecar(&read_dir))
                .await
                .context("spawn_blocking panicked")?;
            match read {
                Ok(pkg_meta) => {
                    return Ok(Some(CacheEntry {
                        canonical_dir,
                        pkg_meta,
                    }));
                }
                Err(e) => {
                    tracing::warn!(
                        target: "cache",
                        "Invalidating corrupt cache entry {} (attempt {}): {:#}",
                        canonical_dir.display(),
                        attempt + 1,
                        e
                    );
                    self.eliminate_release(source, &release).await?;
                }
            }
        }

        Ok(None)
    }

    /// Moves a resolved package directory into the cache, returning its new location.
    ///
    /// Storing a release that already exists leaves the existing entry in place.
    pub async fn store(&self, dir: &Path, meta: &PackageMeta) -> Result<PathBuf> {
        let source = meta
            .source
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Cannot store package without _source"))?;
        let id = source_id(source);
        let release = release_for(meta);
        let dest = self.root.join(&id).join(encode_release(&release));

        if fs::try_exists(&dest).await.unwrap_or(false) {
            tracing::debug!(target: "cache", "{} already cached at {}", source, dest.display());
        } else {
            let parent = self.root.join(&id);
            fs::create_dir_all(&parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;

            let lock_name = format!("{id}-{}", encode_release(&release));
            let _lock =
                StoreLock::acquire(&self.locks_dir, &lock_name, self.lock_wait, self.lock_retries)
                    .await?;

            // Another process may have stored it while we waited
            if !fs::try_exists(&dest).await.unwrap_or(false) {
                let (from, to) = (dir.to_path_buf(), dest.clone());
                let moved = tokio::task::spawn_blocking(move || fsx::move_dir(&from, &to))
                    .await
                    .context("spawn_blocking panicked")?;
                if let Err(e) = moved {
                    if !fs::try_exists(&dest).await.unwrap_or(false) {
                        return Err(e);
                    }
                }
            }
        }

        self.index.update(&id, |releases| {
            if !releases.contains(&release) {
                releases.push(release.clone());
                sort_releases(releases);
            }
        });

        Ok(dest)
    }

    /// Removes one stored release, and the source directory once it is empty.
    pub async fn eliminate(&self, meta: &PackageMeta) -> Result<()> {
        let source = meta
            .source
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Cannot eliminate package without _source"))?;
        self.eliminate_release(source, &release_for(meta)).await
    }

    async fn eliminate_release(&self, source: &str, release: &str) -> Result<()> {
        let id = source_id(source);
        let source_dir = self.root.join(&id);
        let dir = source_dir.join(encode_release(release));
        remove_dir_with_retry(&dir).await?;

        let mut remaining = 0;
        self.index.update(&id, |releases| {
            releases.retain(|r| r != release);
            remaining = releases.len();
        });
        if remaining == 0 {
            self.index.remove(&id);
            // Trust the disk, another process may have just stored a release
            if self.releases(&id).await?.is_empty() {
                self.index.remove(&id);
                remove_dir_with_retry(&source_dir).await?;
            }
        }

        tracing::debug!(target: "cache", "Eliminated {}#{}", source, release);
        Ok(())
    }

    /// Deletes every entry under the cache root.
    pub async fn clear(&self) -> Result<()> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            fsx::remove_dir_all(&root)?;
            fsx::ensure_dir(&root)
        })
        .await
        .context("spawn_blocking panicked")??;
        self.reset();
        Ok(())
    }

    /// Forgets the in-memory index for this root.
    pub fn reset(&self) {
        self.index.clear();
    }

    /// Valid semantic versions cached for a source, highest first.
    pub async fn versions(&self, source: &str) -> Result<Vec<String>> {
        let releases = self.releases(&source_id(source)).await?;
        Ok(releases.into_iter().filter(|r| is_valid_version(r)).collect())
    }

    /// Every cached entry, sorted by name, then version ascending (versioned
    /// entries first), then target. Stray files and unreadable entries are removed.
    pub async fn list(&self) -> Result<Vec<CacheEntry>> {
        let mut dirs = Vec::new();
        let mut sources = match fs::read_dir(&self.root).await {
            Ok(sources) => sources,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read cache root {}", self.root.display()));
            }
        };
        while let Some(source) = sources.next_entry().await? {
            let path = source.path();
            if !source.file_type().await?.is_dir() {
                tracing::debug!(target: "cache", "Removing stray file {}", path.display());
                let _ = fs::remove_file(&path).await;
                continue;
            }
            let mut releases = fs::read_dir(&path).await?;
            while let Some(release) = releases.next_entry().await? {
                if release.file_type().await?.is_dir() {
                    dirs.push(release.path());
                }
            }
        }

        let mut entries = Vec::with_capacity(dirs.len());
        for dir in dirs {
            match PackageMeta::read_sidecar(&dir) {
                Ok(pkg_meta) => entries.push(CacheEntry {
                    canonical_dir: dir,
                    pkg_meta,
                }),
                Err(e) => {
                    tracing::warn!(target: "cache", "Removing unreadable entry {}: {:#}", dir.display(), e);
                    if let Some(id) = dir.parent().and_then(Path::file_name) {
                        self.index.remove(&id.to_string_lossy().into_owned());
                    }
                    let _ = fsx::remove_dir_all(&dir);
                }
            }
        }

        entries.sort_by(|a, b| compare_entries(&a.pkg_meta, &b.pkg_meta));
        Ok(entries)
    }

    /// Sorted releases for a source id, from memory or disk.
    async fn releases(&self, id: &str) -> Result<Vec<String>> {
        let key = id.to_string();
        if let Some(releases) = self.index.get(&key) {
            return Ok(releases);
        }

        let dir = self.root.join(id);
        let mut releases = Vec::new();
        match fs::read_dir(&dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_dir() {
                        releases.push(decode_release(&entry.file_name().to_string_lossy()));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", dir.display()));
            }
        }
        sort_releases(&mut releases);
        self.index.put(key, releases.clone());
        Ok(releases)
    }

    pub fn runtime(&self) -> &Arc<RuntimeCache> {
        &self.runtime
    }
}

fn select_release(releases: &[String], target: &str) -> Option<String> {
    if let Ok(range) = Range::parse(target) {
        let versions: Vec<_> = releases.iter().filter_map(|r| parse_version(r)).collect();
        if let Some(best) = range.max_satisfying(&versions) {
            let best = best.to_string();
            return releases.iter().find(|r| parse_version(r).is_some_and(|v| v.to_string() == best)).cloned();
        }
    }
    if target == WILDCARD {
        return releases.iter().find(|r| r.as_str() == WILDCARD_RELEASE).cloned();
    }
    releases.iter().find(|r| r.as_str() == target).cloned()
}

fn compare_entries(a: &PackageMeta, b: &PackageMeta) -> Ordering {
    let name_a = a.name.as_deref().unwrap_or("");
    let name_b = b.name.as_deref().unwrap_or("");
    name_a
        .cmp(name_b)
        .then_with(|| {
            match (
                a.version.as_deref().and_then(parse_version),
                b.version.as_deref().and_then(parse_version),
            ) {
                (Some(va), Some(vb)) => va.cmp(&vb),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        })
        .then_with(|| a.target.as_deref().unwrap_or("").cmp(b.target.as_deref().unwrap_or("")))
}
