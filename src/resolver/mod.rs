//! Resolvers: materialize one endpoint's content from its source.
//!
//! A [`Resolver`] is built by the [`ResolverFactory`] for one endpoint and
//! one source kind ([`ResolverKind`]). Every kind follows the same pipeline:
//!
//! 1. **Materialize** the content into a fresh temp directory. Filesystem
//!    sources are copied, URLs downloaded (and extracted), git sources cloned
//!    or copied and checked out, svn sources exported.
//! 2. **Read metadata** from the embedded `package.json`, or synthesize
//!    `{ "name": <inferred> }` when the package ships none.
//! 3. **Post-process**: prune `ignore` patterns and, for filesystem and URL
//!    sources, rename a lone file to `index<ext>`.
//! 4. **Save** the sidecar with `_source`, `_target`, `_release` and, for
//!    VCS sources, `_resolution`.
//!
//! # Targets
//!
//! Filesystem and URL sources cannot address versions and only accept `*`;
//! VCS sources match targets against their refs (see [`crate::vcs`]).
//!
//! # Re-entrancy
//!
//! [`Resolver::resolve`] and [`Resolver::has_new`] fail with `WORKING` when
//! called while another call on the same resolver is running.

pub mod archive;
mod base;
pub mod factory;
mod fs;
mod git;
mod github;
mod svn;
mod url;

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

pub use factory::ResolverFactory;

use crate::cache::{CacheEntry, RuntimeCache};
use crate::config::Config;
use crate::core::{LogData, Logger, ResolveError, WorkingFlag};
use crate::endpoint::{Endpoint, is_wildcard};
use crate::metadata::{PackageMeta, Resolution, ResolutionKind};
use crate::vcs::{self, ExecPool, RefSet, VcsFlavor};
use crate::version::{clean_version, parse_version};

/// Sources on the local disk are never cached.
static LOCAL_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:file:[/\\]{2}|[A-Za-z]:)?~?\.?\.?[/\\]").expect("local source pattern is valid")
});

/// Shared services every resolver uses.
#[derive(Clone)]
pub struct ResolverContext {
    pub config: Arc<Config>,
    pub logger: Arc<dyn Logger>,
    pub runtime: Arc<RuntimeCache>,
    pub pool: ExecPool,
    pub http: reqwest::Client,
}

impl ResolverContext {
    pub fn new(config: Arc<Config>, logger: Arc<dyn Logger>, runtime: Arc<RuntimeCache>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        let pool = ExecPool::new(config.exec_concurrency);
        Ok(Self {
            config,
            logger,
            runtime,
            pool,
            http,
        })
    }
}

/// Source kinds, one per concrete resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverKind {
    /// A directory or file on disk
    Fs { path: PathBuf },
    /// A file downloaded over http(s)
    Url,
    /// A git repository on disk
    GitLocal { path: PathBuf },
    /// A git repository reached over the network
    GitRemote,
    /// A GitHub repository, fetched as a tarball when possible
    GitHub { owner: String, repo: String },
    /// A subversion repository
    Svn,
}

impl ResolverKind {
    /// Identifier used in logs and error annotations.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Fs { .. } => "fs",
            Self::Url => "url",
            Self::GitLocal { .. } => "git-fs",
            Self::GitRemote => "git-remote",
            Self::GitHub { .. } => "github",
            Self::Svn => "svn",
        }
    }

    /// Whether the kind can address a specific version or ref.
    pub fn is_targetable(&self) -> bool {
        !matches!(self, Self::Fs { .. } | Self::Url)
    }

    fn flavor(&self) -> Option<VcsFlavor> {
        match self {
            Self::GitLocal { .. } | Self::GitRemote | Self::GitHub { .. } => Some(VcsFlavor::Git),
            Self::Svn => Some(VcsFlavor::Svn),
            Self::Fs { .. } | Self::Url => None,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Fs { .. } => "File system",
            Self::Url => "URL",
            Self::GitLocal { .. } | Self::GitRemote | Self::GitHub { .. } => "Git",
            Self::Svn => "Subversion",
        }
    }
}

/// A materialized package in its temp directory.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub dir: PathBuf,
    pub pkg_meta: PackageMeta,
}

/// What materialization learned beyond the files themselves.
#[derive(Debug, Default)]
struct Materialized {
    resolution: Option<Resolution>,
    /// Name a lone file was renamed to
    single_file: Option<String>,
    cache_headers: Option<BTreeMap<String, String>>,
    release: Option<String>,
}

impl Materialized {
    fn vcs(resolution: Resolution) -> Self {
        Self {
            resolution: Some(resolution),
            ..Self::default()
        }
    }
}

pub struct Resolver {
    kind: ResolverKind,
    source: String,
    target: String,
    name: Mutex<String>,
    guessed_name: bool,
    registry: bool,
    ctx: ResolverContext,
    logger: Arc<dyn Logger>,
    working: WorkingFlag,
    pkg_meta: Mutex<Option<PackageMeta>>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// Builds a resolver for `endpoint` reading from `source`.
    ///
    /// # Errors
    ///
    /// [`ResolveError::NoResolveTarget`] when the kind cannot address versions
    /// and the target is not the wildcard.
    pub fn new(kind: ResolverKind, source: &str, endpoint: &Endpoint, ctx: ResolverContext) -> Result<Self> {
        if !kind.is_targetable() && !is_wildcard(&endpoint.target) {
            return Err(ResolveError::NoResolveTarget {
                reason: format!("{} sources can't resolve targets", kind.describe()),
                locator: source.to_string(),
                target: endpoint.target.clone(),
            }
            .into());
        }

        let (name, guessed_name) = match &endpoint.name {
            Some(name) => (name.clone(), false),
            None => (guess_name(&kind, source), true),
        };
        let logger = Arc::clone(&ctx.logger);
        Ok(Self {
            kind,
            source: source.to_string(),
            target: endpoint.target.clone(),
            name: Mutex::new(name),
            guessed_name,
            registry: false,
            ctx,
            logger,
            working: WorkingFlag::new(),
            pkg_meta: Mutex::new(None),
        })
    }

    /// Routes this resolver's events through `logger`.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Marks the resolver as built from a registry entry.
    #[must_use]
    pub fn from_registry(mut self, registry: bool) -> Self {
        self.registry = registry;
        self
    }

    pub fn is_registry(&self) -> bool {
        self.registry
    }

    pub fn kind(&self) -> &ResolverKind {
        &self.kind
    }

    pub fn id(&self) -> &'static str {
        self.kind.id()
    }

    /// The locator this resolver fetches from (after shorthand expansion).
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// The package name, inferred from the source until metadata says otherwise.
    pub fn name(&self) -> String {
        self.name.lock().map(|n| n.clone()).unwrap_or_default()
    }

    /// Whether the name was inferred from the source rather than requested.
    pub fn is_name_guessed(&self) -> bool {
        self.guessed_name
    }

    pub fn is_targetable(&self) -> bool {
        self.kind.is_targetable()
    }

    /// Metadata from the last successful [`resolve`](Self::resolve).
    pub fn pkg_meta(&self) -> Option<PackageMeta> {
        self.pkg_meta.lock().ok().and_then(|m| m.clone())
    }

    /// False for local sources and for branch resolutions.
    pub fn is_cacheable(&self) -> bool {
        if LOCAL_SOURCE.is_match(&self.source) {
            return false;
        }
        let moving = self
            .pkg_meta
            .lock()
            .ok()
            .and_then(|m| m.as_ref().and_then(|m| m.resolution.as_ref().map(Resolution::kind)))
            == Some(ResolutionKind::Branch);
        !moving
    }

    /// Materializes the package into a new temp directory.
    pub async fn resolve(&self) -> Result<Resolved> {
        let _working = self.working.begin(&format!("Resolver for {}", self.source))?;
        let dir = self.create_temp_dir().await?;
        match self.resolve_into(&dir).await {
            Ok(resolved) => Ok(resolved),
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&dir).await;
                Err(e)
            }
        }
    }

    async fn resolve_into(&self, dir: &Path) -> Result<Resolved> {
        let materialized = match &self.kind {
            ResolverKind::Fs { path } => self.materialize_fs(path, dir).await?,
            ResolverKind::Url => self.materialize_url(dir).await?,
            ResolverKind::GitLocal { path } => self.materialize_git_local(path, dir).await?,
            ResolverKind::GitRemote => self.materialize_git_remote(dir).await?,
            ResolverKind::GitHub { owner, repo } => self.materialize_github(owner, repo, dir).await?,
            ResolverKind::Svn => self.materialize_svn(dir).await?,
        };

        let mut meta = base::read_meta(dir, &self.name()).await?;
        self.apply_name(&mut meta);
        if let Some(invalid) = meta.normalize_version() {
            self.logger.warn(
                "invalid-meta",
                &format!("Ignoring invalid version '{invalid}' declared by {}", self.name()),
                LogData::default(),
            );
        }
        base::apply_ignore(dir, &meta.ignore).await?;
        self.save_pkg_meta(&mut meta, materialized);

        let write_dir = dir.to_path_buf();
        let write_meta = meta.clone();
        tokio::task::spawn_blocking(move || write_meta.write_sidecar(&write_dir))
            .await
            .context("spawn_blocking panicked")??;

        if let Ok(mut slot) = self.pkg_meta.lock() {
            *slot = Some(meta.clone());
        }
        Ok(Resolved {
            dir: dir.to_path_buf(),
            pkg_meta: meta,
        })
    }

    /// Whether the source has content newer than a cached entry.
    pub async fn has_new(&self, cached: &CacheEntry) -> Result<bool> {
        let _working = self.working.begin(&format!("Resolver for {}", self.source))?;
        match &self.kind {
            ResolverKind::Fs { .. } => Ok(true),
            ResolverKind::Url => Ok(self.url_has_new(&cached.pkg_meta).await),
            _ => {
                let resolution = self.find_resolution().await?;
                Ok(resolution_changed(cached.pkg_meta.resolution.as_ref(), &resolution))
            }
        }
    }

    /// Matches the target against the source's refs.
    async fn find_resolution(&self) -> Result<Resolution> {
        let flavor = self.kind.flavor().ok_or_else(|| ResolveError::NotImplemented {
            operation: format!("{} target resolution", self.kind.id()),
        })?;
        let refs = self.refs().await?;
        Ok(vcs::find_resolution(flavor, &self.source, &self.target, &refs)?)
    }

    /// Refs of the source, listed once per process run.
    async fn refs(&self) -> Result<Arc<RefSet>> {
        if let Some(refs) = self.ctx.runtime.refs(&self.source) {
            return Ok(refs);
        }
        let pool = &self.ctx.pool;
        let refs = match &self.kind {
            ResolverKind::GitLocal { path } => vcs::git::list_refs(&path.display().to_string(), pool).await?,
            ResolverKind::GitRemote | ResolverKind::GitHub { .. } => {
                vcs::git::list_refs(&self.source, pool).await?
            }
            ResolverKind::Svn => vcs::svn::list_refs(&self.source, pool).await?,
            ResolverKind::Fs { .. } | ResolverKind::Url => {
                return Err(ResolveError::NotImplemented {
                    operation: format!("{} ref listing", self.kind.id()),
                }
                .into());
            }
        };
        Ok(self.ctx.runtime.store_refs(&self.source, refs))
    }

    async fn create_temp_dir(&self) -> Result<PathBuf> {
        let tmp = self.ctx.config.storage.tmp.clone();
        let prefix = format!("{}-", self.name());
        tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            std::fs::create_dir_all(&tmp)
                .with_context(|| format!("Failed to create temp root {}", tmp.display()))?;
            let dir = tempfile::Builder::new()
                .prefix(&prefix)
                .tempdir_in(&tmp)
                .with_context(|| format!("Failed to create temp dir in {}", tmp.display()))?;
            Ok(dir.keep())
        })
        .await
        .context("spawn_blocking panicked")?
    }

    /// Unnamed endpoints adopt the name declared in metadata; metadata
    /// without a name takes the resolver's.
    fn apply_name(&self, meta: &mut PackageMeta) {
        match &meta.name {
            Some(declared) if self.guessed_name => {
                if let Ok(mut name) = self.name.lock() {
                    name.clone_from(declared);
                }
            }
            Some(_) => {}
            None => meta.name = Some(self.name()),
        }
    }

    fn save_pkg_meta(&self, meta: &mut PackageMeta, materialized: Materialized) {
        match materialized.resolution {
            Some(resolution) => {
                if resolution.kind() == ResolutionKind::Version {
                    let version = resolution.tag().and_then(clean_version);
                    let declared = meta.version.as_deref().and_then(parse_version);
                    let resolved = version.as_deref().and_then(parse_version);
                    if let (Some(declared), Some(resolved)) = (declared, resolved) {
                        if declared != resolved {
                            self.logger.warn(
                                "mismatch",
                                &format!(
                                    "Version declared in the json ({declared}) is different than the resolved one ({resolved})"
                                ),
                                LogData::default().with_extra(serde_json::json!({
                                    "resolution": resolution,
                                    "pkgMeta": { "version": declared.to_string() },
                                })),
                            );
                        }
                    }
                    meta.version = version;
                } else {
                    meta.version = None;
                }
                let release = meta
                    .version
                    .clone()
                    .or_else(|| resolution.tag().map(str::to_string))
                    .unwrap_or_else(|| resolution.short_commit().to_string());
                meta.release = Some(release);
                meta.resolution = Some(resolution);
            }
            None => {
                if let Some(main) = materialized.single_file {
                    if meta.main.is_none() {
                        meta.main = Some(serde_json::Value::String(main));
                    }
                }
                meta.cache_headers = materialized.cache_headers;
                meta.release = materialized
                    .release
                    .or_else(|| meta.version.clone())
                    .or_else(|| Some(self.target.clone()));
            }
        }
        meta.source = Some(self.source.clone());
        meta.target = Some(self.target.clone());
    }
}

/// Whether a fresh resolution differs from the one a cache entry was stored with.
fn resolution_changed(old: Option<&Resolution>, new: &Resolution) -> bool {
    let Some(old) = old else {
        return true;
    };
    if old.kind() != new.kind() {
        return true;
    }
    if new.kind() == ResolutionKind::Version {
        let old_version = old.tag().and_then(parse_version);
        let new_version = new.tag().and_then(parse_version);
        if old_version != new_version {
            return true;
        }
    }
    old.commit() != new.commit()
}

/// Name inferred from a source: its last path segment, minus `.git`, any
/// query string and, for files, the extension.
fn guess_name(kind: &ResolverKind, source: &str) -> String {
    let trimmed = source.split(['?', '#']).next().unwrap_or(source);
    let trimmed = trimmed.trim_end_matches(['/', '\\']);
    let base = trimmed.rsplit(['/', '\\', ':']).next().unwrap_or(trimmed);
    let name = match kind {
        ResolverKind::GitLocal { .. } | ResolverKind::GitRemote | ResolverKind::GitHub { .. } => {
            base.strip_suffix(".git").unwrap_or(base)
        }
        ResolverKind::Svn => base,
        ResolverKind::Fs { .. } | ResolverKind::Url => strip_extension(base),
    };
    if name.is_empty() { "package".to_string() } else { name.to_string() }
}

fn strip_extension(name: &str) -> &str {
    for compound in [".tar.gz", ".tar.bz2"] {
        if let Some(stripped) = name.strip_suffix(compound) {
            return stripped;
        }
    }
    match name.rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    }
}
