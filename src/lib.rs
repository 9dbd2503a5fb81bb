//! pkgplan - package resolution engine
//!
//! pkgplan turns a list of requested packages into an install plan: one
//! concrete, materialized version per package name, with every transitive
//! dependency resolved and conflicts settled.
//!
//! # Architecture Overview
//!
//! A request is an [`endpoint::Endpoint`], written `[<name>=]<source>[#<target>]`.
//! Resolving one goes through four layers:
//!
//! 1. [`resolver::ResolverFactory`] picks a [`resolver::Resolver`] for the
//!    source: a local directory or file, an HTTP archive, a local or remote
//!    git repository, a GitHub repository or a Subversion repository.
//!    Shorthands and registry names are expanded first.
//! 2. The resolver finds the best match for the target among the source's
//!    versions, tags and branches, and materializes it in a temp directory.
//! 3. [`repository::PackageRepository`] stores the result in the
//!    [`cache::ResolveCache`] and serves later requests from it, asking the
//!    resolver whether the source has moved on.
//! 4. [`manager::Manager`] fetches all requests concurrently, expands their
//!    dependencies, elects one endpoint per name and filters out what is
//!    already installed.
//!
//! # Core Modules
//!
//! - [`cache`] - On-disk package store, runtime caches and store locks
//! - [`cli`] - Command-line interface
//! - [`config`] - Engine configuration (`~/.pkgplan/config.toml`)
//! - [`core`] - Error codes, the event logger and the busy flag
//! - [`endpoint`] - Endpoint parsing and composition
//! - [`manager`] - Concurrent fetching, election and the install plan
//! - [`metadata`] - Package metadata and the cache sidecar
//! - [`registry`] - Name to source lookup
//! - [`repository`] - Cache-aware fetching of one endpoint
//! - [`resolver`] - Source kinds and target resolution
//! - [`utils`] - File system helpers and retry backoff
//! - [`vcs`] - Git and Subversion command wrappers
//! - [`version`] - Semantic version and range helpers
//!
//! # Example
//!
//! ```rust,no_run
//! use pkgplan_cli::config::Config;
//! use pkgplan_cli::core::{Logger, TracingLogger};
//! use pkgplan_cli::endpoint::Endpoint;
//! use pkgplan_cli::manager::{Manager, Setup};
//! use pkgplan_cli::repository::PackageRepository;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Arc::new(Config::load().await?);
//! let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
//! let repository = Arc::new(PackageRepository::new(config.clone(), logger.clone())?);
//! let manager = Manager::new(config, repository, logger);
//!
//! manager.configure(Setup {
//!     targets: vec![Endpoint::decompose("jquery#~2.0.0")?],
//!     ..Setup::default()
//! })?;
//! for (name, endpoint) in manager.resolve().await? {
//!     println!("{name}: {:?}", endpoint.canonical_dir);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod endpoint;
pub mod manager;
pub mod metadata;
pub mod registry;
pub mod repository;
pub mod resolver;
pub mod utils;
pub mod vcs;
pub mod version;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
