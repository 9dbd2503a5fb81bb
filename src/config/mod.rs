//! Configuration for the resolution engine.
//!
//! Settings are read from a TOML file (`~/.pkgplan/config.toml` by default,
//! `PKGPLAN_CONFIG` overrides the path). Every field has a default, so a
//! missing file or a partial file is fine.
//!
//! ```toml
//! shorthand_resolver = "https://github.com/{{owner}}/{{package}}.git"
//! offline = false
//! wildcard_promotion = "caret"
//! fail_fast_grace_secs = 20
//!
//! [storage]
//! packages = "~/.pkgplan/packages"
//!
//! [hosts]
//! gitlab = "https://gitlab.com/{{owner}}/{{package}}.git"
//!
//! [registry]
//! search = ["https://registry.example.com"]
//!
//! [registry.packages]
//! jquery = "https://github.com/jquery/jquery-dist.git"
//! ```
//!
//! `PKGPLAN_CACHE_DIR` overrides the package cache location.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::constants::{
    COMMAND_TIMEOUT, DEFAULT_EXEC_CONCURRENCY, FAIL_FAST_GRACE, LOCK_RETRIES, LOCK_WAIT,
};
use crate::version::WildcardPromotion;

/// Where packages and scratch files live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Cache root
    pub packages: PathBuf,
    /// Parent of the temp directories resolvers materialize into
    pub tmp: PathBuf,
    /// Store lock directory, defaults to `<packages>.locks`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locks: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            packages: get_cache_dir().unwrap_or_else(|_| PathBuf::from(".pkgplan/packages")),
            tmp: std::env::temp_dir().join("pkgplan"),
            locks: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub wait_ms: u64,
    pub retries: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_ms: LOCK_WAIT.as_millis() as u64,
            retries: LOCK_RETRIES,
        }
    }
}

/// Name lookups for sources that are not locators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Fixed name to URL table, consulted first
    pub packages: BTreeMap<String, String>,
    /// HTTP registries queried in order
    pub search: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working directory relative sources resolve against
    pub cwd: PathBuf,
    /// Install directory, relative to `cwd`
    pub directory: PathBuf,
    pub storage: StorageConfig,
    /// Template for `owner/package` shorthands
    pub shorthand_resolver: String,
    /// Templates for `@host:owner/package` shorthands
    pub hosts: BTreeMap<String, String>,
    /// Base URL GitHub tag tarballs are downloaded from
    pub github_archive_base: String,
    pub registry: RegistryConfig,
    /// Never touch the network, serve from cache only
    pub offline: bool,
    /// Ignore the cache and reinstall
    pub force: bool,
    /// Settle conflicts by picking the highest candidate
    pub force_latest: bool,
    /// Ask the user to settle conflicts
    pub interactive: bool,
    pub wildcard_promotion: WildcardPromotion,
    pub fail_fast_grace_secs: u64,
    pub lock: LockConfig,
    /// git/svn processes allowed at once
    pub exec_concurrency: usize,
    pub command_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        let mut hosts = BTreeMap::new();
        hosts.insert(
            "github".to_string(),
            "https://github.com/{{owner}}/{{package}}.git".to_string(),
        );
        hosts.insert(
            "gitlab".to_string(),
            "https://gitlab.com/{{owner}}/{{package}}.git".to_string(),
        );
        hosts.insert(
            "bitbucket".to_string(),
            "https://bitbucket.org/{{owner}}/{{package}}.git".to_string(),
        );
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            directory: PathBuf::from("components"),
            storage: StorageConfig::default(),
            shorthand_resolver: "https://github.com/{{owner}}/{{package}}.git".to_string(),
            hosts,
            github_archive_base: "https://github.com".to_string(),
            registry: RegistryConfig::default(),
            offline: false,
            force: false,
            force_latest: false,
            interactive: false,
            wildcard_promotion: WildcardPromotion::default(),
            fail_fast_grace_secs: FAIL_FAST_GRACE.as_secs(),
            lock: LockConfig::default(),
            exec_concurrency: DEFAULT_EXEC_CONCURRENCY,
            command_timeout_secs: COMMAND_TIMEOUT.as_secs(),
            user_agent: format!("pkgplan/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Loads the config from the default path, falling back to defaults if absent.
    pub async fn load() -> Result<Self> {
        Self::load_with_optional(None).await
    }

    /// Loads the config from `path` (or the default path), falling back to defaults if absent.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from(&path).await
        } else {
            Ok(Self::default())
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config.expand_paths();
        Ok(config)
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// `~/.pkgplan/config.toml`, or `PKGPLAN_CONFIG` if set.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("PKGPLAN_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
            .join(".pkgplan")
            .join("config.toml"))
    }

    fn expand_paths(&mut self) {
        let expand = |path: &Path| -> PathBuf {
            let raw = path.to_string_lossy();
            PathBuf::from(shellexpand::tilde(&raw).into_owned())
        };
        self.cwd = expand(&self.cwd);
        self.storage.packages = expand(&self.storage.packages);
        self.storage.tmp = expand(&self.storage.tmp);
        self.storage.locks = self.storage.locks.as_deref().map(expand);
    }

    /// Directory holding store lock files.
    pub fn locks_dir(&self) -> PathBuf {
        self.storage.locks.clone().unwrap_or_else(|| {
            let mut name = self
                .storage
                .packages
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_default();
            name.push(".locks");
            self.storage.packages.with_file_name(name)
        })
    }

    pub fn fail_fast_grace(&self) -> Duration {
        Duration::from_secs(self.fail_fast_grace_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock.wait_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Where an installed package named `name` lives.
    pub fn install_dir(&self, name: &str) -> PathBuf {
        self.cwd.join(&self.directory).join(name)
    }

    /// Expands a shorthand through the default template or a named host's template.
    pub fn expand_shorthand(&self, host: Option<&str>, owner: &str, package: &str) -> Option<String> {
        let template = match host {
            Some(host) => self.hosts.get(host)?,
            None => &self.shorthand_resolver,
        };
        Some(
            template
                .replace("{{shorthand}}", &format!("{owner}/{package}"))
                .replace("{{owner}}", owner)
                .replace("{{package}}", package),
        )
    }
}

/// Cache root: `PKGPLAN_CACHE_DIR` if set, else `~/.pkgplan/packages`.
pub fn get_cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("PKGPLAN_CACHE_DIR") {
        return Ok(PathBuf::from(dir));
    }

    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
        .join(".pkgplan")
        .join("packages"))
}
