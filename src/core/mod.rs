//! Core types shared by every layer of the engine.
//!
//! - [`error`] defines [`ResolveError`], its stable codes, the
//!   [`FetchFailure`] annotation and the terminal rendering used by the CLI.
//! - [`logger`] defines the [`Logger`] collaborator that resolvers, the
//!   repository and the manager report progress through.
//! - [`working`] guards resolvers and the manager against re-entrant calls.

pub mod error;
pub mod logger;
pub mod working;

pub use error::{
    ConflictPick, ErrorContext, FetchFailure, ResolveError, error_code, user_friendly_error,
};
pub use logger::{ContextLogger, LogData, LogEvent, LogLevel, Logger, TracingLogger};
pub use working::{WorkingFlag, WorkingGuard};
