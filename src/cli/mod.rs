//! Command-line interface for pkgplan.
//!
//! # Commands
//!
//! - `resolve` - Resolve endpoints into an install plan
//! - `cache list` - List cached packages
//! - `cache clean` - Remove cached packages
//!
//! # Global Options
//!
//! - `--verbose` / `--quiet` select the log level (`RUST_LOG` wins over both)
//! - `--config` points at a config file other than `~/.pkgplan/config.toml`
//!
//! ```bash
//! pkgplan resolve jquery#~2.0.0 bootstrap
//! pkgplan --verbose resolve ./local/pkg --offline
//! pkgplan cache clean https://github.com/jquery/jquery-dist.git
//! ```

pub mod cache;
pub mod resolve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Settings derived from the global flags, applied before a command runs.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: Option<String>,

    /// Config file to load instead of the default one
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the tracing subscriber, writing to stderr.
    ///
    /// Calling it more than once is harmless; only the first call installs.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level.as_deref().unwrap_or("info")));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "pkgplan",
    about = "Resolve package endpoints into an install plan",
    version,
    long_about = "pkgplan fetches packages from git, svn, http and local sources into a shared cache, \
                  resolves their dependencies and elects one version per package."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only show errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the config file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve endpoints and print the install plan
    Resolve(resolve::ResolveCommand),

    /// Inspect or clean the package cache
    Cache(cache::CacheCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        };

        CliConfig {
            log_level: Some(log_level.to_string()),
            config_path: self.config.clone(),
        }
    }

    pub async fn execute_with_config(self, cli_config: CliConfig) -> Result<()> {
        cli_config.init_logging();
        let config = Config::load_with_optional(cli_config.config_path).await?;

        match self.command {
            Commands::Resolve(cmd) => cmd.execute(config).await,
            Commands::Cache(cmd) => cmd.execute(config).await,
        }
    }
}
