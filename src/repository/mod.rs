//! Fetching one endpoint through the cache.
//!
//! [`PackageRepository::fetch`] builds a resolver for the endpoint and takes
//! one of four paths:
//!
//! 1. The resolver is not cacheable (local sources): resolve fresh.
//! 2. `force` is set: resolve fresh, then store if cacheable.
//! 3. Nothing cached: fail with `NO_CACHE` when offline, else resolve fresh.
//! 4. A cached entry matches: offline returns it as is, otherwise the
//!    resolver is asked whether the source moved on since, and the entry is
//!    returned unless it did.
//!
//! Events are logged through a [`ContextLogger`] carrying the endpoint and
//! resolver, plus the cache entry once one is found. Errors carry the same
//! information as a [`FetchFailure`] context.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{CacheEntry, ResolveCache, RuntimeCache, encode_release, release_for, source_id};
use crate::config::Config;
use crate::core::{ContextLogger, FetchFailure, LogData, Logger, ResolveError};
use crate::endpoint::Endpoint;
use crate::metadata::PackageMeta;
use crate::registry::{ChainRegistry, Registry};
use crate::resolver::{Resolver, ResolverContext, ResolverFactory};

/// The outcome of a successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    /// Requested name, else the name the package declares
    pub name: String,
    pub canonical_dir: PathBuf,
    pub pkg_meta: PackageMeta,
    /// Whether the resolver can address versions
    pub targetable: bool,
    /// Whether the source came from a registry lookup
    pub registry: bool,
}

/// Anything that can turn an endpoint into a materialized package.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, endpoint: &Endpoint) -> Result<Fetched>;
}

pub struct PackageRepository {
    config: Arc<Config>,
    factory: ResolverFactory,
    cache: ResolveCache,
    logger: Arc<dyn Logger>,
}

impl PackageRepository {
    /// A repository with a fresh runtime cache and the configured registries.
    pub fn new(config: Arc<Config>, logger: Arc<dyn Logger>) -> Result<Self> {
        let runtime = Arc::new(RuntimeCache::new());
        let ctx = ResolverContext::new(Arc::clone(&config), Arc::clone(&logger), runtime)?;
        let registry = Arc::new(ChainRegistry::from_config(&config, &ctx.http));
        Ok(Self::from_parts(ctx, registry))
    }

    /// A repository over an existing context and registry.
    pub fn from_parts(ctx: ResolverContext, registry: Arc<dyn Registry>) -> Self {
        let config = Arc::clone(&ctx.config);
        let logger = Arc::clone(&ctx.logger);
        let cache = ResolveCache::new(&config, Arc::clone(&ctx.runtime));
        Self {
            config,
            factory: ResolverFactory::new(ctx, registry),
            cache,
            logger,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn cache(&self) -> &ResolveCache {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        self.factory.registry()
    }

    pub fn factory(&self) -> &ResolverFactory {
        &self.factory
    }

    /// Fetches an endpoint, from the cache when possible.
    pub async fn fetch(&self, endpoint: &Endpoint) -> Result<Fetched> {
        let label = endpoint.to_string();
        let resolver = self.factory.create(endpoint).await.with_context(|| FetchFailure {
            endpoint: label.clone(),
            resolver: None,
            canonical_dir: None,
        })?;

        let logger = ContextLogger::new(
            Arc::clone(&self.logger),
            LogData::endpoint(&label).with_resolver(resolver.id()),
        );
        let resolver = resolver.with_logger(Arc::new(logger.clone()));

        self.fetch_with(&resolver, &logger).await.map_err(|e| {
            if e.downcast_ref::<FetchFailure>().is_some() {
                e
            } else {
                e.context(FetchFailure {
                    endpoint: label.clone(),
                    resolver: Some(format!("{} {}", resolver.id(), resolver.source())),
                    canonical_dir: None,
                })
            }
        })
    }

    async fn fetch_with(&self, resolver: &Resolver, logger: &ContextLogger) -> Result<Fetched> {
        let locator = format!("{}#{}", resolver.source(), resolver.target());

        if !resolver.is_cacheable() {
            logger.info("not-cached", &locator, LogData::default());
            return self.resolve_fresh(resolver, logger).await;
        }

        if self.config.force {
            logger.info("resolve", &format!("{locator} (forced)"), LogData::default());
            return self.resolve_fresh(resolver, logger).await;
        }

        let Some(entry) = self.cache.retrieve(resolver.source(), resolver.target()).await? else {
            if self.config.offline {
                return Err(ResolveError::NoCache {
                    locator: resolver.source().to_string(),
                    target: resolver.target().to_string(),
                }
                .into());
            }
            logger.info("resolve", &locator, LogData::default());
            return self.resolve_fresh(resolver, logger).await;
        };

        let logger = logger.with_canonical(&entry.canonical_dir, Some(entry.pkg_meta.to_value()));
        let release = entry.pkg_meta.release_label().unwrap_or("*").to_string();
        logger.info("cached", &format!("{}#{}", resolver.source(), release), LogData::default());

        if self.config.offline {
            return Ok(self.from_cache(resolver, entry));
        }

        logger.action("validate", &format!("{release} against {locator}"), LogData::default());
        let has_new = resolver.has_new(&entry).await.with_context(|| FetchFailure {
            endpoint: logger.base().endpoint.clone().unwrap_or_default(),
            resolver: Some(format!("{} {}", resolver.id(), resolver.source())),
            canonical_dir: Some(entry.canonical_dir.clone()),
        })?;
        if !has_new {
            return Ok(self.from_cache(resolver, entry));
        }

        logger.action("new", &format!("Version or commit of {} changed", resolver.source()), LogData::default());
        self.resolve_fresh(resolver, &logger).await
    }

    async fn resolve_fresh(&self, resolver: &Resolver, logger: &ContextLogger) -> Result<Fetched> {
        let resolved = resolver.resolve().await?;
        let mut canonical_dir = resolved.dir;

        if resolver.is_cacheable() {
            self.replace_stale(&resolved.pkg_meta).await?;
            let stored = self.cache.store(&canonical_dir, &resolved.pkg_meta).await?;
            if stored != canonical_dir && tokio::fs::try_exists(&canonical_dir).await.unwrap_or(false) {
                let _ = tokio::fs::remove_dir_all(&canonical_dir).await;
            }
            canonical_dir = stored;
        }

        let release = resolved.pkg_meta.release_label().unwrap_or("*").to_string();
        logger.info(
            "resolved",
            &format!("{}#{}", resolver.source(), release),
            LogData::default().with_canonical_dir(&canonical_dir).with_pkg_meta(resolved.pkg_meta.to_value()),
        );

        Ok(Fetched {
            name: resolver.name(),
            canonical_dir,
            pkg_meta: resolved.pkg_meta,
            targetable: resolver.is_targetable(),
            registry: resolver.is_registry(),
        })
    }

    /// Drops an entry stored under the same release so fresh content replaces it.
    async fn replace_stale(&self, meta: &PackageMeta) -> Result<()> {
        let Some(source) = meta.source.as_deref() else {
            return Ok(());
        };
        let dest = self.cache.root().join(source_id(source)).join(encode_release(&release_for(meta)));
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            tracing::debug!(target: "repository", "Replacing stale entry {}", dest.display());
            self.cache.eliminate(meta).await?;
        }
        Ok(())
    }

    fn from_cache(&self, resolver: &Resolver, entry: CacheEntry) -> Fetched {
        let name = match (&entry.pkg_meta.name, resolver.is_name_guessed()) {
            (Some(declared), true) => declared.clone(),
            _ => resolver.name(),
        };
        Fetched {
            name,
            canonical_dir: entry.canonical_dir,
            pkg_meta: entry.pkg_meta,
            targetable: resolver.is_targetable(),
            registry: resolver.is_registry(),
        }
    }

    /// Cached versions of a source, highest first.
    ///
    /// The source goes through the factory first, so shorthands and registry
    /// names list the versions of the locator they expand to.
    pub async fn versions(&self, source: &str) -> Result<Vec<String>> {
        let endpoint = Endpoint::new(None, source, "*");
        let resolver = self.factory.create(&endpoint).await?;
        self.cache.versions(resolver.source()).await
    }

    pub async fn eliminate(&self, meta: &PackageMeta) -> Result<()> {
        self.cache.eliminate(meta).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.cache.clear().await
    }

    /// Forgets everything held in memory: the cache index and listed refs.
    pub fn reset(&self) {
        self.cache.reset();
        self.cache.runtime().clear();
    }

    pub async fn list(&self) -> Result<Vec<CacheEntry>> {
        self.cache.list().await
    }
}

#[async_trait]
impl Fetcher for PackageRepository {
    async fn fetch(&self, endpoint: &Endpoint) -> Result<Fetched> {
        PackageRepository::fetch(self, endpoint).await
    }
}
