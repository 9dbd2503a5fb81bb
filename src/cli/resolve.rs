//! The `resolve` command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::config::Config;
use crate::core::{Logger, TracingLogger};
use crate::endpoint::Endpoint;
use crate::manager::{InstallPlan, Manager, Setup, to_data};
use crate::repository::PackageRepository;

#[derive(Args, Debug)]
pub struct ResolveCommand {
    /// Endpoints to resolve, as `[<name>=]<source>[#<target>]`
    #[arg(required = true, value_name = "ENDPOINT")]
    endpoints: Vec<String>,

    /// Only use cached packages
    #[arg(long)]
    offline: bool,

    /// Refetch cached packages and include installed ones in the plan
    #[arg(short, long)]
    force: bool,

    /// Settle conflicts by picking the highest version
    #[arg(long)]
    force_latest: bool,

    /// Ask which version to use when a conflict cannot be settled
    #[arg(short, long)]
    interactive: bool,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
}

impl ResolveCommand {
    pub async fn execute(self, mut config: Config) -> Result<()> {
        config.offline |= self.offline;
        config.force |= self.force;
        config.force_latest |= self.force_latest;
        config.interactive |= self.interactive;
        let config = Arc::new(config);

        let targets = self
            .endpoints
            .iter()
            .map(|input| {
                let mut endpoint = Endpoint::decompose(input)?;
                endpoint.newly = true;
                Ok(endpoint)
            })
            .collect::<Result<Vec<_>>>()?;

        let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
        let repository = Arc::new(PackageRepository::new(Arc::clone(&config), Arc::clone(&logger))?);
        let manager = Manager::new(config, repository, logger);
        manager.configure(Setup {
            targets,
            ..Setup::default()
        })?;
        let plan = manager.resolve().await?;

        if self.json {
            let data: Map<String, Value> = plan.iter().map(|(name, ep)| (name.clone(), to_data(ep))).collect();
            println!("{}", serde_json::to_string_pretty(&Value::Object(data))?);
        } else {
            print_plan(&plan);
        }

        let resolutions = manager.resolutions();
        if !resolutions.is_empty() && !self.json {
            println!("\n{}", "Resolutions:".bold());
            for (name, resolution) in resolutions {
                println!("  {name}: {resolution}");
            }
        }
        Ok(())
    }
}

fn print_plan(plan: &InstallPlan) {
    if plan.is_empty() {
        println!("{}", "Nothing to install".green());
        return;
    }
    println!("{}", "Install plan:".bold());
    for (name, endpoint) in plan {
        let release = endpoint.release().unwrap_or(&endpoint.target);
        let dir = endpoint.canonical_dir.as_ref().map(|d| d.display().to_string()).unwrap_or_default();
        println!("  {}#{} {} {}", name.green(), release, endpoint.source.dimmed(), dir.dimmed());
        if !endpoint.dependants.is_empty() {
            let dependants: Vec<&str> = endpoint.dependants.iter().map(String::as_str).collect();
            println!("    required by {}", dependants.join(", "));
        }
    }
}
