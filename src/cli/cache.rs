//! The `cache` command.

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use futures::future::try_join_all;
use std::sync::Arc;

use crate::cache::{CacheEntry, ResolveCache, RuntimeCache, cleanup_stale_locks};
use crate::config::Config;
use crate::constants::STALE_LOCK_TTL;

#[derive(Args, Debug)]
pub struct CacheCommand {
    #[command(subcommand)]
    command: CacheSubcommand,
}

#[derive(Subcommand, Debug)]
enum CacheSubcommand {
    /// List cached packages
    List,

    /// Remove cached packages, all of them unless sources are given
    Clean {
        /// Sources whose cached packages are removed
        #[arg(value_name = "SOURCE")]
        sources: Vec<String>,
    },
}

impl CacheCommand {
    pub async fn execute(self, config: Config) -> Result<()> {
        let cache = ResolveCache::new(&config, Arc::new(RuntimeCache::new()));
        match self.command {
            CacheSubcommand::List => {
                let entries = cache.list().await?;
                if entries.is_empty() {
                    println!("Cache is empty");
                }
                for entry in &entries {
                    println!("{}", describe(entry));
                }
                Ok(())
            }
            CacheSubcommand::Clean {
                sources,
            } if sources.is_empty() => {
                cache.clear().await?;
                let stale = cleanup_stale_locks(&config.locks_dir(), STALE_LOCK_TTL).await?;
                if stale > 0 {
                    tracing::debug!("Removed {} abandoned lock file(s)", stale);
                }
                println!("{}", "Cache cleared".green());
                Ok(())
            }
            CacheSubcommand::Clean {
                sources,
            } => {
                let doomed: Vec<CacheEntry> = cache
                    .list()
                    .await?
                    .into_iter()
                    .filter(|entry| {
                        let source = entry.pkg_meta.source.as_deref().unwrap_or("");
                        sources.iter().any(|s| s == source)
                    })
                    .collect();
                try_join_all(doomed.iter().map(|entry| {
                    tracing::debug!("Removing {}", entry.canonical_dir.display());
                    cache.eliminate(&entry.pkg_meta)
                }))
                .await?;
                println!("{} {} cached package(s)", "Removed".green(), doomed.len());
                Ok(())
            }
        }
    }
}

fn describe(entry: &CacheEntry) -> String {
    let meta = &entry.pkg_meta;
    format!(
        "{}#{} {} {}",
        meta.name.as_deref().unwrap_or("?").green(),
        meta.release.as_deref().unwrap_or("*"),
        meta.source.as_deref().unwrap_or("").dimmed(),
        entry.canonical_dir.display()
    )
}
