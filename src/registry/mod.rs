//! Package name lookups.
//!
//! When a source is neither a locator nor a shorthand, the factory asks the
//! [`Registry`] for the URL registered under that name. Lookups consult the
//! static `[registry.packages]` table from the config first, then each HTTP
//! registry in `[registry] search` order. An HTTP registry answers
//! `GET <base>/packages/<name>` with `{ "name": ..., "url": ... }` or 404.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;

#[async_trait]
pub trait Registry: Send + Sync {
    /// The source URL registered under `name`, `None` when unknown.
    async fn lookup(&self, name: &str) -> Result<Option<String>>;
}

/// Fixed name to URL table.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    packages: BTreeMap<String, String>,
}

impl StaticRegistry {
    pub fn new(packages: BTreeMap<String, String>) -> Self {
        Self {
            packages,
        }
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn lookup(&self, name: &str) -> Result<Option<String>> {
        Ok(self.packages.get(name).cloned())
    }
}

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    url: String,
}

/// A registry served over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    base: String,
    http: reqwest::Client,
}

impl HttpRegistry {
    pub fn new(base: &str, http: reqwest::Client) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn lookup(&self, name: &str) -> Result<Option<String>> {
        let url = format!("{}/packages/{}", self.base, name);
        tracing::debug!(target: "registry", "Looking up {} at {}", name, url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to query registry {}", self.base))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .with_context(|| format!("Registry {} rejected lookup of {}", self.base, name))?;
        let entry: RegistryEntry = response
            .json()
            .await
            .with_context(|| format!("Invalid registry response for {name}"))?;
        Ok(Some(entry.url))
    }
}

/// Asks each registry in turn; the first hit wins.
#[derive(Clone, Default)]
pub struct ChainRegistry {
    registries: Vec<Arc<dyn Registry>>,
}

impl ChainRegistry {
    pub fn new(registries: Vec<Arc<dyn Registry>>) -> Self {
        Self {
            registries,
        }
    }

    /// Static table first, then every configured HTTP registry.
    pub fn from_config(config: &Config, http: &reqwest::Client) -> Self {
        let mut registries: Vec<Arc<dyn Registry>> =
            vec![Arc::new(StaticRegistry::new(config.registry.packages.clone()))];
        registries.extend(
            config
                .registry
                .search
                .iter()
                .map(|base| Arc::new(HttpRegistry::new(base, http.clone())) as Arc<dyn Registry>),
        );
        Self::new(registries)
    }
}

#[async_trait]
impl Registry for ChainRegistry {
    async fn lookup(&self, name: &str) -> Result<Option<String>> {
        for registry in &self.registries {
            if let Some(url) = registry.lookup(name).await? {
                return Ok(Some(url));
            }
        }
        Ok(None)
    }
}
