//! Test utilities for pkgplan
//!
//! In-memory stand-ins for the engine's seams: a [`Logger`] that records
//! events, a [`Prompter`] that replays answers and a [`Fetcher`] that serves
//! canned packages without touching the network or the cache.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};
use tokio::sync::Semaphore;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::core::{ConflictPick, LogEvent, Logger, ResolveError};
use crate::endpoint::Endpoint;
use crate::manager::Prompter;
use crate::metadata::PackageMeta;
use crate::repository::{Fetched, Fetcher};

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` if given, else `RUST_LOG`. Without either, nothing is logged.
///
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// Records every event it receives.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    events: Mutex<Vec<LogEvent>>,
}

impl MemoryLogger {
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Ids of the recorded events, in order.
    pub fn ids(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.id).collect()
    }
}

impl Logger for MemoryLogger {
    fn log(&self, event: LogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Replays scripted answers, then reports end of input.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
}

impl ScriptedPrompter {
    pub fn new<'a>(answers: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().map(str::to_string).collect()),
        }
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn ask(&self, _name: &str, _picks: &[ConflictPick]) -> Result<Option<String>> {
        Ok(self.answers.lock().ok().and_then(|mut a| a.pop_front()))
    }
}

#[derive(Debug, Clone)]
enum Script {
    Package(Fetched),
    Fail,
    Hang,
}

/// Serves canned packages keyed by `source#target`.
///
/// Unknown endpoints fail with `NOT_FOUND`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFetcher {
    scripts: Arc<Mutex<BTreeMap<String, Script>>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedFetcher {
    fn key(source: &str, target: &str) -> String {
        let endpoint = Endpoint::new(None, source, target);
        format!("{}#{}", endpoint.source, endpoint.target)
    }

    fn script(self, source: &str, target: &str, script: Script) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(Self::key(source, target), script);
        }
        self
    }

    /// Serves package `name` for `source#target`.
    #[must_use]
    pub fn package(self, name: &str, source: &str, target: &str, version: Option<&str>, deps: &[(&str, &str)]) -> Self {
        let release = version.map_or_else(|| format!("{target}-{name}"), str::to_string);
        let pkg_meta = PackageMeta {
            version: version.map(str::to_string),
            dependencies: deps.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            source: Some(source.to_string()),
            target: Some(target.to_string()),
            release: Some(release.clone()),
            ..PackageMeta::named(name)
        };
        let fetched = Fetched {
            name: name.to_string(),
            canonical_dir: PathBuf::from("/cache").join(name).join(release),
            pkg_meta,
            targetable: version.is_some(),
            registry: false,
        };
        self.script(source, target, Script::Package(fetched))
    }

    /// Moves every scripted package named `name` to `dir`.
    #[must_use]
    pub fn with_dir(self, name: &str, dir: PathBuf) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            for script in scripts.values_mut() {
                if let Script::Package(fetched) = script {
                    if fetched.name == name {
                        fetched.canonical_dir = dir.clone();
                    }
                }
            }
        }
        self
    }

    /// Fails `source` with `NOT_FOUND`, for any target.
    #[must_use]
    pub fn failing(self, source: &str) -> Self {
        self.script(source, "*", Script::Fail)
    }

    /// Never answers for `source`.
    #[must_use]
    pub fn hanging(self, source: &str) -> Self {
        self.script(source, "*", Script::Hang)
    }

    /// Holds every fetch until `gate` hands out a permit for it.
    #[must_use]
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn lookup(&self, endpoint: &Endpoint) -> Option<Script> {
        let scripts = self.scripts.lock().ok()?;
        scripts
            .get(&Self::key(&endpoint.source, &endpoint.target))
            .or_else(|| scripts.get(&Self::key(&endpoint.source, "*")))
            .cloned()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, endpoint: &Endpoint) -> Result<Fetched> {
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        match self.lookup(endpoint) {
            Some(Script::Package(fetched)) => {
                tokio::task::yield_now().await;
                Ok(fetched)
            }
            Some(Script::Hang) => std::future::pending().await,
            Some(Script::Fail) | None => Err(ResolveError::NotFound {
                name: endpoint.source.clone(),
            }
            .into()),
        }
    }
}
