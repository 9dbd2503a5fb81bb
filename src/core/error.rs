//! Error handling for the resolution engine.
//!
//! Engine operations return [`anyhow::Result`]. Failures that callers need to
//! branch on are raised as a [`ResolveError`] variant and recovered with
//! `downcast_ref`, while [`FetchFailure`] is attached as context to annotate a
//! failed fetch with the endpoint and resolver it belongs to. The CLI turns
//! any error into an [`ErrorContext`] with a suggestion via
//! [`user_friendly_error`].
//!
//! # Error codes
//!
//! Every variant maps to a stable upper-case code through
//! [`ResolveError::code`], e.g. `WORKING`, `NO_RESOLVE_TARGET`, `CONFLICT`.

use colored::Colorize;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One candidate in a version conflict, as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictPick {
    /// Endpoint in `name=source#target` form
    pub endpoint: String,
    /// Resolved version, if the package declares one
    pub version: Option<String>,
    /// Release label of the resolved package
    pub release: Option<String>,
    /// Names of the packages that depend on this candidate
    pub dependants: Vec<String>,
    /// Where the candidate was materialized
    pub canonical_dir: Option<PathBuf>,
}

impl fmt::Display for ConflictPick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint)?;
        if let Some(release) = &self.release {
            write!(f, " which resolved to {release}")?;
        }
        if !self.dependants.is_empty() {
            write!(f, " and is required by {}", self.dependants.join(", "))?;
        }
        Ok(())
    }
}

/// Errors raised by the resolution engine.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// A resolver or manager was invoked while a previous call is still running
    #[error("{what} is already working")]
    Working { what: String },

    /// The target cannot be served by the source
    #[error("Cannot resolve '{target}' of {locator}: {reason}")]
    NoResolveTarget {
        reason: String,
        locator: String,
        target: String,
    },

    /// No resolver type matched the source
    #[error("No resolver found for {locator}")]
    NoResolver { locator: String },

    /// Registry lookup found nothing
    #[error("Package {name} not found")]
    NotFound { name: String },

    /// Offline mode and nothing cached
    #[error("No cached version for {locator}#{target}")]
    NoCache { locator: String, target: String },

    /// Version conflict that could not be settled automatically
    #[error("Unable to find suitable version for {name}")]
    Conflict { name: String, picks: Vec<ConflictPick> },

    /// A resolver kind does not implement an operation
    #[error("{operation} is not implemented")]
    NotImplemented { operation: String },

    #[error("Invalid endpoint '{input}': {reason}")]
    InvalidEndpoint { input: String, reason: String },

    #[error("Invalid range '{range}'")]
    InvalidRange { range: String },

    /// An external tool exited unsuccessfully
    #[error("{tool} {operation} failed")]
    CommandFailed {
        tool: String,
        operation: String,
        stderr: String,
    },

    #[error("{tool} {operation} timed out after {secs} seconds")]
    CommandTimeout {
        tool: String,
        operation: String,
        secs: u64,
    },

    #[error("{tool} is not installed or not found in PATH")]
    ToolNotFound { tool: String },

    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Failed to extract {path}: {reason}")]
    Extract { path: String, reason: String },

    #[error("Timed out waiting for lock {path}")]
    LockTimeout { path: String },

    /// A cache entry's sidecar metadata is missing or unreadable
    #[error("Corrupt package metadata at {path}: {reason}")]
    CorruptMeta { path: String, reason: String },

    #[error("Prompt failed: {reason}")]
    PromptFailed { reason: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{message}")]
    Other { message: String },
}

impl ResolveError {
    /// Stable code identifying the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Working { .. } => "WORKING",
            Self::NoResolveTarget { .. } => "NO_RESOLVE_TARGET",
            Self::NoResolver { .. } => "NO_RESOLVER",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NoCache { .. } => "NO_CACHE",
            Self::Conflict { .. } => "CONFLICT",
            Self::NotImplemented { .. } => "NOT_IMPLEMENTED",
            Self::InvalidEndpoint { .. } => "INVALID_ENDPOINT",
            Self::InvalidRange { .. } => "INVALID_RANGE",
            Self::CommandFailed { .. } => "COMMAND_FAILED",
            Self::CommandTimeout { .. } => "COMMAND_TIMEOUT",
            Self::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            Self::Download { .. } => "DOWNLOAD_FAILED",
            Self::Extract { .. } => "EXTRACT_FAILED",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::CorruptMeta { .. } => "CORRUPT_META",
            Self::PromptFailed { .. } => "PROMPT_FAILED",
            Self::Config { .. } => "CONFIG",
            Self::Io(_) => "IO",
            Self::Json(_) => "JSON",
            Self::Other { .. } => "OTHER",
        }
    }

    pub fn working(what: impl Into<String>) -> Self {
        Self::Working {
            what: what.into(),
        }
    }
}

/// The [`ResolveError`] code anywhere in the error's chain.
pub fn error_code(error: &anyhow::Error) -> Option<&'static str> {
    error.downcast_ref::<ResolveError>().map(ResolveError::code)
}

/// Context attached to an error raised while fetching one endpoint.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub endpoint: String,
    pub resolver: Option<String>,
    pub canonical_dir: Option<PathBuf>,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to fetch {}", self.endpoint)?;
        if let Some(resolver) = &self.resolver {
            write!(f, " ({resolver})")?;
        }
        Ok(())
    }
}

/// An error with a suggestion and details for display on the terminal.
#[derive(Debug)]
pub struct ErrorContext {
    pub message: String,
    pub code: Option<&'static str>,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl ErrorContext {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            suggestion: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Prints the error to stderr with colors.
    pub fn display(&self) {
        match self.code {
            Some(code) => eprintln!("{} {}: {}", "error".red().bold(), code.dimmed(), self.message),
            None => eprintln!("{}: {}", "error".red().bold(), self.message),
        }

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Converts any engine error into a user-facing [`ErrorContext`].
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let mut message = error.to_string();
    let chain: Vec<String> =
        error.chain().skip(1).map(std::string::ToString::to_string).collect();
    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    let Some(resolve_error) = error.downcast_ref::<ResolveError>() else {
        let denied = error
            .downcast_ref::<std::io::Error>()
            .is_some_and(|e| e.kind() == std::io::ErrorKind::PermissionDenied);
        if denied {
            return ErrorContext::new(message)
                .with_suggestion("Check the ownership of the cache and temp directories");
        }
        return ErrorContext::new(message);
    };

    let mut context = ErrorContext::new(message);
    context.code = Some(resolve_error.code());
    match resolve_error {
        ResolveError::Conflict { picks, .. } => {
            let listing = picks
                .iter()
                .enumerate()
                .map(|(i, pick)| format!("{}) {pick}", i + 1))
                .collect::<Vec<_>>()
                .join("\n");
            context
                .with_details(listing)
                .with_suggestion("Re-run with --interactive to pick a version, or --force-latest")
        }
        ResolveError::NoCache { .. } => {
            context.with_suggestion("Run without --offline to fetch the package")
        }
        ResolveError::NoResolveTarget { .. } => context.with_suggestion(
            "Filesystem and URL sources only accept the wildcard; for VCS sources check the tags and branches",
        ),
        ResolveError::NoResolver { .. } | ResolveError::NotFound { .. } => context
            .with_suggestion("Use a git URL, an http(s) URL, a local path or an owner/repo shorthand"),
        ResolveError::ToolNotFound { tool } => {
            context.with_suggestion(format!("Install {tool} and make sure it is on PATH"))
        }
        ResolveError::CommandFailed { stderr, .. } if !stderr.trim().is_empty() => {
            context.with_details(stderr.trim().to_string())
        }
        ResolveError::LockTimeout { path } => context.with_suggestion(format!(
            "Another process may be storing the same package. Remove {path} if it is stale"
        )),
        _ => context,
    }
}
