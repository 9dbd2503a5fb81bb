//! Structured event logging for the resolution engine.
//!
//! The engine reports progress through the [`Logger`] trait rather than
//! writing to `tracing` directly, so callers can render or record events the
//! way they like. Every event carries an id such as `resolve` or `cached`
//! and a [`LogData`] payload describing the endpoint, resolver and cache
//! entry involved. [`TracingLogger`] forwards events to `tracing` and is what
//! the CLI uses.
//!
//! [`ContextLogger`] stamps a fixed payload onto every event it forwards,
//! which is how fetch events pick up the endpoint and resolver they belong to.

use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Event severity, in the vocabulary of a package manager's progress output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Something is being done (downloading, checking out)
    Action,
    Info,
    Warn,
    /// A version conflict needs attention
    Conflict,
    Debug,
}

/// Context payload attached to a log event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pkg_meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl LogData {
    pub fn endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: impl Into<String>) -> Self {
        self.resolver = Some(resolver.into());
        self
    }

    #[must_use]
    pub fn with_canonical_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.canonical_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_pkg_meta(mut self, meta: Value) -> Self {
        self.pkg_meta = Some(meta);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Fills fields that are unset here from `base`.
    fn inherit(mut self, base: &Self) -> Self {
        if self.endpoint.is_none() {
            self.endpoint.clone_from(&base.endpoint);
        }
        if self.resolver.is_none() {
            self.resolver.clone_from(&base.resolver);
        }
        if self.canonical_dir.is_none() {
            self.canonical_dir.clone_from(&base.canonical_dir);
        }
        if self.pkg_meta.is_none() {
            self.pkg_meta.clone_from(&base.pkg_meta);
        }
        if self.extra.is_none() {
            self.extra.clone_from(&base.extra);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub id: String,
    pub message: String,
    pub data: LogData,
}

/// Sink for engine events.
pub trait Logger: Send + Sync {
    fn log(&self, event: LogEvent);

    fn action(&self, id: &str, message: &str, data: LogData) {
        self.emit(LogLevel::Action, id, message, data);
    }

    fn info(&self, id: &str, message: &str, data: LogData) {
        self.emit(LogLevel::Info, id, message, data);
    }

    fn warn(&self, id: &str, message: &str, data: LogData) {
        self.emit(LogLevel::Warn, id, message, data);
    }

    fn conflict(&self, id: &str, message: &str, data: LogData) {
        self.emit(LogLevel::Conflict, id, message, data);
    }

    fn debug(&self, id: &str, message: &str, data: LogData) {
        self.emit(LogLevel::Debug, id, message, data);
    }

    fn emit(&self, level: LogLevel, id: &str, message: &str, data: LogData) {
        self.log(LogEvent {
            level,
            id: id.to_string(),
            message: message.to_string(),
            data,
        });
    }
}

/// Forwards events to `tracing` under the `pkgplan` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, event: LogEvent) {
        let endpoint = event.data.endpoint.as_deref().unwrap_or("");
        match event.level {
            LogLevel::Action | LogLevel::Info => {
                tracing::info!(target: "pkgplan", id = %event.id, endpoint, "{}", event.message);
            }
            LogLevel::Warn | LogLevel::Conflict => {
                tracing::warn!(target: "pkgplan", id = %event.id, endpoint, "{}", event.message);
            }
            LogLevel::Debug => {
                tracing::debug!(target: "pkgplan", id = %event.id, endpoint, "{}", event.message);
            }
        }
    }
}

/// Stamps a base payload onto every event before forwarding it.
#[derive(Clone)]
pub struct ContextLogger {
    inner: Arc<dyn Logger>,
    base: LogData,
}

impl ContextLogger {
    pub fn new(inner: Arc<dyn Logger>, base: LogData) -> Self {
        Self {
            inner,
            base,
        }
    }

    /// A copy of this logger whose base payload also carries the cache entry.
    pub fn with_canonical(&self, dir: impl Into<PathBuf>, pkg_meta: Option<Value>) -> Self {
        let mut base = self.base.clone();
        base.canonical_dir = Some(dir.into());
        base.pkg_meta = pkg_meta;
        Self {
            inner: Arc::clone(&self.inner),
            base,
        }
    }

    pub fn base(&self) -> &LogData {
        &self.base
    }
}

impl Logger for ContextLogger {
    fn log(&self, mut event: LogEvent) {
        event.data = event.data.inherit(&self.base);
        self.inner.log(event);
    }
}
