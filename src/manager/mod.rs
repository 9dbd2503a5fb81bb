//! Turning a list of requested endpoints into an install plan.
//!
//! A [`Manager`] is configured with a [`Setup`] and then driven by
//! [`Manager::resolve`], which runs in two phases:
//!
//! 1. **Fetching.** Every target is fetched concurrently through the
//!    [`Fetcher`]. Each success records the endpoint under its package name
//!    and expands the package's dependencies, reusing endpoints that are
//!    already resolved or in flight when their targets are compatible. The
//!    first failure arms a fail-fast timer; when it fires, fetches still
//!    running are no longer waited for.
//! 2. **Dissection.** Unless something failed, one endpoint is elected per
//!    name (see [`election`]). Conflicts are settled by a saved resolution,
//!    by force-latest, by asking the user, or fail with `CONFLICT`. The plan
//!    then drops linked packages, packages materialized in place and packages
//!    already installed with the same target, source and release.
//!
//! Endpoints live in an [`Arena`] owned by the run and are referred to by
//! [`EndpointId`]. Each fetch runs on its own task and reports back over a
//! channel, so results that arrive after dissection started are dropped.

pub mod arena;
pub mod compat;
pub mod election;
pub mod prompt;

use anyhow::Result;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub use arena::{Arena, EndpointId};
pub use compat::are_compatible;
pub use election::{Ballot, Outcome, Policy};
pub use prompt::{Choice, Prompter, StdinPrompter};

use crate::config::Config;
use crate::core::{ConflictPick, LogData, Logger, ResolveError, WorkingFlag};
use crate::endpoint::{Endpoint, is_wildcard};
use crate::metadata::PackageMeta;
use crate::repository::{Fetched, Fetcher};

/// What a resolve run starts from.
#[derive(Debug, Clone, Default)]
pub struct Setup {
    /// Endpoints to fetch
    pub targets: Vec<Endpoint>,
    /// Endpoints already resolved, by name
    pub resolved: BTreeMap<String, Endpoint>,
    /// Metadata of installed packages, by name
    pub installed: BTreeMap<String, PackageMeta>,
    /// Endpoints known to conflict, fetched once their name resolves
    pub incompatibles: Vec<Endpoint>,
    /// Saved conflict resolutions: name to target, range or release
    pub resolutions: BTreeMap<String, String>,
    pub force_latest: bool,
}

/// The install plan: one endpoint per package name.
pub type InstallPlan = BTreeMap<String, Endpoint>;

type FetchMessage = (EndpointId, Result<Fetched>);

pub struct Manager {
    config: Arc<Config>,
    fetcher: Arc<dyn Fetcher>,
    logger: Arc<dyn Logger>,
    prompter: Arc<dyn Prompter>,
    working: WorkingFlag,
    fail_fast_grace: Duration,
    setup: Mutex<Setup>,
}

impl Manager {
    pub fn new(config: Arc<Config>, fetcher: Arc<dyn Fetcher>, logger: Arc<dyn Logger>) -> Self {
        let fail_fast_grace = config.fail_fast_grace();
        Self {
            config,
            fetcher,
            logger,
            prompter: Arc::new(StdinPrompter),
            working: WorkingFlag::new(),
            fail_fast_grace,
            setup: Mutex::new(Setup::default()),
        }
    }

    #[must_use]
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    #[must_use]
    pub fn with_fail_fast_grace(mut self, grace: Duration) -> Self {
        self.fail_fast_grace = grace;
        self
    }

    pub fn is_working(&self) -> bool {
        self.working.is_busy()
    }

    /// Replaces the setup used by the next [`resolve`](Self::resolve).
    ///
    /// Targets are deduplicated and those requested by the user become
    /// unresolvable. Incompatibles whose name is neither a target nor
    /// resolved are fetched as targets.
    pub fn configure(&self, setup: Setup) -> Result<()> {
        let _working = self.working.begin("Manager")?;

        let mut targets: Vec<Endpoint> = setup
            .targets
            .into_iter()
            .map(|mut target| {
                target.unresolvable = target.newly;
                target
            })
            .collect();
        let target_names: BTreeSet<String> = targets.iter().filter_map(|t| t.name.clone()).collect();

        let incompatibles = uniquify(setup.incompatibles);
        for incompatible in &incompatibles {
            let name = incompatible.name_str();
            if !target_names.contains(name) && !setup.resolved.contains_key(name) {
                targets.push(incompatible.clone());
            }
        }

        let configured = Setup {
            targets: uniquify(targets),
            resolved: setup.resolved,
            installed: setup.installed,
            incompatibles,
            resolutions: setup.resolutions,
            force_latest: setup.force_latest,
        };
        if let Ok(mut slot) = self.setup.lock() {
            *slot = configured;
        }
        Ok(())
    }

    /// Saved resolutions, including those stored by the last run.
    pub fn resolutions(&self) -> BTreeMap<String, String> {
        self.setup.lock().map(|s| s.resolutions.clone()).unwrap_or_default()
    }

    /// Fetches every target and elects the install plan.
    ///
    /// # Errors
    ///
    /// `WORKING` when a run is already in progress, the first fetch error
    /// when any fetch failed, `CONFLICT` for conflicts nothing could settle.
    pub async fn resolve(&self) -> Result<InstallPlan> {
        let _working = self.working.begin("Manager")?;
        let setup = self.setup.lock().map(|s| s.clone()).unwrap_or_default();

        let (tx, rx) = mpsc::unbounded_channel();
        let mut run = Run::new(self, &setup, tx);

        if setup.targets.is_empty() {
            tokio::task::yield_now().await;
        } else {
            for target in &setup.targets {
                run.launch(target.clone());
            }
        }

        run.fetch_all(rx).await;
        let plan = run.dissect().await;

        if let Ok(mut slot) = self.setup.lock() {
            slot.resolutions = std::mem::take(&mut run.resolutions);
        }
        plan
    }

    fn force_latest(&self, setup: &Setup) -> bool {
        setup.force_latest || self.config.force_latest
    }
}

/// Serializable view of an endpoint, as used in conflict payloads.
pub fn to_data(endpoint: &Endpoint) -> Value {
    json!({
        "endpoint": {
            "name": endpoint.name,
            "source": endpoint.source,
            "target": endpoint.target,
        },
        "canonicalDir": endpoint.canonical_dir,
        "pkgMeta": endpoint.pkg_meta.as_ref().map(PackageMeta::to_value),
        "dependants": endpoint.dependants,
    })
}

/// The metadata an install of this endpoint would persist.
pub fn installed_meta(endpoint: &Endpoint) -> Option<PackageMeta> {
    let mut meta = endpoint.pkg_meta.clone()?;
    meta.target = Some(endpoint.target.clone());
    meta.original_source = Some(endpoint.source.clone());
    if endpoint.newly {
        meta.direct = Some(true);
    }
    Some(meta)
}

fn conflict_pick(endpoint: &Endpoint) -> ConflictPick {
    ConflictPick {
        endpoint: endpoint.compose(),
        version: endpoint.version().map(str::to_string),
        release: endpoint.release().map(str::to_string),
        dependants: endpoint.dependants.iter().cloned().collect(),
        canonical_dir: endpoint.canonical_dir.clone(),
    }
}

fn uniquify(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    let mut unique: Vec<Endpoint> = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        if !unique.iter().any(|u| u.same_request(&endpoint)) {
            unique.push(endpoint);
        }
    }
    unique
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// State of one resolve run.
struct Run<'a> {
    manager: &'a Manager,
    arena: Arena,
    resolved: BTreeMap<String, Vec<EndpointId>>,
    fetching: BTreeMap<String, Vec<EndpointId>>,
    /// Endpoints waiting on an in-flight fetch they will copy
    waiters: HashMap<EndpointId, Vec<EndpointId>>,
    failed: Vec<(String, anyhow::Error)>,
    outstanding: usize,
    fail_deadline: Option<Instant>,
    installed: BTreeMap<String, PackageMeta>,
    incompatibles: BTreeMap<String, Vec<Endpoint>>,
    conflicted: BTreeSet<String>,
    resolutions: BTreeMap<String, String>,
    force_latest: bool,
    tx: mpsc::UnboundedSender<FetchMessage>,
}

impl<'a> Run<'a> {
    fn new(manager: &'a Manager, setup: &Setup, tx: mpsc::UnboundedSender<FetchMessage>) -> Self {
        let mut arena = Arena::new();
        let mut resolved = BTreeMap::new();
        let mut installed = BTreeMap::new();
        for (name, endpoint) in &setup.resolved {
            if let Some(meta) = &endpoint.pkg_meta {
                installed.insert(name.clone(), meta.clone());
            }
            resolved.insert(name.clone(), vec![arena.insert(endpoint.clone())]);
        }
        installed.extend(setup.installed.clone());

        let mut incompatibles: BTreeMap<String, Vec<Endpoint>> = BTreeMap::new();
        for endpoint in &setup.incompatibles {
            incompatibles.entry(endpoint.name_str().to_string()).or_default().push(endpoint.clone());
        }
        let conflicted = incompatibles.keys().cloned().collect();

        Self {
            manager,
            arena,
            resolved,
            fetching: BTreeMap::new(),
            waiters: HashMap::new(),
            failed: Vec::new(),
            outstanding: 0,
            fail_deadline: None,
            installed,
            incompatibles,
            conflicted,
            resolutions: setup.resolutions.clone(),
            force_latest: manager.force_latest(setup),
            tx,
        }
    }

    fn logger(&self) -> &dyn Logger {
        self.manager.logger.as_ref()
    }

    fn launch(&mut self, endpoint: Endpoint) {
        let key = endpoint.name_str().to_string();
        let id = self.arena.insert(endpoint.clone());
        self.fetching.entry(key).or_default().push(id);
        self.outstanding += 1;

        let fetcher = Arc::clone(&self.manager.fetcher);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = fetcher.fetch(&endpoint).await;
            // The run may be over already
            let _ = tx.send((id, result));
        });
    }

    async fn fetch_all(&mut self, mut rx: mpsc::UnboundedReceiver<FetchMessage>) {
        while self.outstanding > 0 {
            tokio::select! {
                message = rx.recv() => {
                    let Some((id, result)) = message else { break };
                    self.outstanding -= 1;
                    match result {
                        Ok(fetched) => self.on_success(id, fetched),
                        Err(error) => self.on_failure(id, error),
                    }
                }
                () = wait_until(self.fail_deadline) => {
                    tracing::warn!(
                        target: "manager",
                        "Not waiting for {} outstanding fetches after a failure",
                        self.outstanding
                    );
                    break;
                }
            }
        }
    }

    fn stop_fetching(&mut self, id: EndpointId) {
        let key = self.arena[id].name_str().to_string();
        if let Some(ids) = self.fetching.get_mut(&key) {
            ids.retain(|&f| f != id);
            if ids.is_empty() {
                self.fetching.remove(&key);
            }
        }
    }

    fn arm_fail_fast(&mut self) {
        if self.fail_deadline.is_none() {
            self.fail_deadline = Some(Instant::now() + self.manager.fail_fast_grace);
        }
    }

    fn on_failure(&mut self, id: EndpointId, error: anyhow::Error) {
        self.stop_fetching(id);
        self.waiters.remove(&id);
        let endpoint = &self.arena[id];
        let name = endpoint.name.clone().unwrap_or_else(|| endpoint.source.clone());
        tracing::debug!(target: "manager", "Fetch of {} failed: {:#}", endpoint, error);
        self.failed.push((name, error));
        self.arm_fail_fast();
    }

    fn on_success(&mut self, id: EndpointId, fetched: Fetched) {
        self.stop_fetching(id);

        let endpoint = self.arena.get_mut(id);
        if endpoint.name.is_none() {
            endpoint.name = Some(fetched.name);
        }
        endpoint.canonical_dir = Some(fetched.canonical_dir);
        endpoint.pkg_meta = Some(fetched.pkg_meta);
        endpoint.untargetable = !fetched.targetable;
        endpoint.registry |= fetched.registry;
        let name = endpoint.name_str().to_string();

        self.add_resolved(&name, id);

        for waiter in self.waiters.remove(&id).unwrap_or_default() {
            self.copy_resolution(id, waiter);
            self.resolved.entry(name.clone()).or_default().push(waiter);
        }

        self.expand_dependencies(id);
        self.fetch_incompatibles(&name);
    }

    /// Records a resolved endpoint, replacing one with the same target.
    fn add_resolved(&mut self, name: &str, id: EndpointId) {
        let target = self.arena[id].target.clone();
        let list = self.resolved.entry(name.to_string()).or_default();
        if let Some(pos) = list.iter().position(|&r| r != id && self.arena[r].target == target) {
            let previous = list.remove(pos);
            let dependants = self.arena[previous].dependants.clone();
            self.arena.get_mut(id).dependants.extend(dependants);
        }
        list.push(id);
    }

    fn copy_resolution(&mut self, from: EndpointId, to: EndpointId) {
        let source = self.arena[from].clone();
        let target = self.arena.get_mut(to);
        target.canonical_dir = source.canonical_dir;
        target.pkg_meta = source.pkg_meta;
        target.untargetable = source.untargetable;
    }

    fn expand_dependencies(&mut self, parent: EndpointId) {
        let parent_name = self.arena[parent].name_str().to_string();
        let parent_unresolvable = self.arena[parent].unresolvable;
        let dependencies = self.arena[parent].pkg_meta.as_ref().map(|m| m.dependencies.clone()).unwrap_or_default();

        for (key, value) in dependencies {
            let mut child = match Endpoint::from_dependency(&key, &value) {
                Ok(child) => child,
                Err(e) => {
                    self.failed.push((key, e.into()));
                    self.arm_fail_fast();
                    continue;
                }
            };
            child.dependants.insert(parent_name.clone());

            let resolved = self.resolved.get(&key).cloned().unwrap_or_default();
            if let Some(&same) = resolved.iter().find(|&&r| self.arena[r].target == child.target) {
                self.arena.get_mut(same).dependants.insert(parent_name.clone());
                continue;
            }
            if let Some(&compatible) = resolved.iter().find(|&&r| are_compatible(&child, &self.arena[r])) {
                let child_id = self.arena.insert(child);
                self.copy_resolution(compatible, child_id);
                self.resolved.entry(key).or_default().push(child_id);
                continue;
            }

            let fetching = self.fetching.get(&key).cloned().unwrap_or_default();
            if let Some(&compatible) = fetching.iter().find(|&&f| are_compatible(&child, &self.arena[f])) {
                let child_id = self.arena.insert(child);
                self.waiters.entry(compatible).or_default().push(child_id);
                continue;
            }

            child.unresolvable = parent_unresolvable;
            self.launch(child);
        }
    }

    /// Fetches the incompatibles of `name` not already resolved or in flight.
    fn fetch_incompatibles(&mut self, name: &str) {
        let Some(incompatibles) = self.incompatibles.remove(name) else {
            return;
        };
        let known: Vec<String> = self
            .resolved
            .get(name)
            .into_iter()
            .chain(self.fetching.get(name))
            .flatten()
            .map(|&id| self.arena[id].target.clone())
            .collect();
        for incompatible in incompatibles {
            if !known.contains(&incompatible.target) {
                self.launch(incompatible);
            }
        }
    }

    async fn dissect(&mut self) -> Result<InstallPlan> {
        if !self.failed.is_empty() {
            let (name, error) = self.failed.remove(0);
            tracing::debug!(target: "manager", "Resolution failed on {}", name);
            return Err(error);
        }

        let mut suitables = InstallPlan::new();
        let names: Vec<String> = self.resolved.keys().cloned().collect();
        for name in names {
            let ids = self.resolved[&name].clone();
            let (semvers, non_semvers) = election::partition(&self.arena, &ids);
            for &id in &semvers {
                self.promote_wildcard(id);
            }
            let winner = self.elect(&name, &semvers, &non_semvers).await?;
            suitables.insert(name, self.arena[winner].clone());
        }

        self.drop_unnecessary_resolutions();
        Ok(self.filter_installed(suitables))
    }

    /// Pins a freshly requested wildcard to a range around its resolved version.
    fn promote_wildcard(&mut self, id: EndpointId) {
        let promotion = self.manager.config.wildcard_promotion;
        let endpoint = self.arena.get_mut(id);
        if !endpoint.newly || endpoint.untargetable || !is_wildcard(&endpoint.target) {
            return;
        }
        let Some(version) = endpoint.version().map(str::to_string) else {
            return;
        };
        endpoint.original_target = Some(endpoint.target.clone());
        endpoint.target = promotion.promote(&version);
    }

    async fn elect(&mut self, name: &str, semvers: &[EndpointId], non_semvers: &[EndpointId]) -> Result<EndpointId> {
        let resolution = self.resolutions.get(name).cloned();
        let policy = Policy {
            resolution: resolution.as_deref(),
            force_latest: self.force_latest,
            interactive: self.manager.config.interactive,
        };
        let ballot = election::elect(&self.arena, semvers, non_semvers, &policy);
        if let Outcome::Suitable(id) = ballot.outcome {
            return Ok(id);
        }

        self.conflicted.insert(name.to_string());
        let picks: Vec<ConflictPick> = ballot.picks.iter().map(|&id| conflict_pick(&self.arena[id])).collect();
        let data: Vec<Value> = ballot.picks.iter().map(|&id| to_data(&self.arena[id])).collect();
        let message = format!("Unable to find suitable version for {name}");

        if ballot.unsuitable_resolution {
            self.logger().warn(
                "resolution",
                &format!("Unsuitable resolution declared for {name}: {}", resolution.as_deref().unwrap_or("")),
                LogData::default().with_extra(json!({ "name": name, "picks": data, "resolution": resolution })),
            );
        }

        match ballot.outcome {
            Outcome::Suitable(id) => Ok(id),
            Outcome::Resolved(id) => {
                self.log_solved(name, &message, &ballot, id, &data, false);
                Ok(id)
            }
            Outcome::Forced(id) => {
                self.log_solved(name, &message, &ballot, id, &data, true);
                self.store_resolution(id);
                Ok(id)
            }
            Outcome::Conflict => Err(ResolveError::Conflict {
                name: name.to_string(),
                picks,
            }
            .into()),
            Outcome::NeedsInput => {
                self.logger().conflict(
                    "incompatible",
                    &message,
                    LogData::default().with_extra(json!({ "name": name, "picks": data })),
                );
                let choice = prompt::choose(self.manager.prompter.as_ref(), name, &picks).await?;
                let id = ballot.picks[choice.index];
                if choice.save {
                    self.store_resolution(id);
                }
                Ok(id)
            }
        }
    }

    fn log_solved(&self, name: &str, message: &str, ballot: &Ballot, id: EndpointId, data: &[Value], forced: bool) {
        let suitable = ballot.picks.iter().position(|&p| p == id).map(|i| data[i].clone());
        self.logger().conflict(
            "solved",
            message,
            LogData::default().with_extra(json!({
                "name": name,
                "picks": data,
                "resolution": self.resolutions.get(name),
                "suitable": suitable,
                "forced": forced,
            })),
        );
    }

    fn store_resolution(&mut self, id: EndpointId) {
        let endpoint = &self.arena[id];
        let name = endpoint.name_str().to_string();
        let resolution = if is_wildcard(&endpoint.target) {
            endpoint.pkg_meta.as_ref().and_then(|m| m.release.clone()).unwrap_or_else(|| "*".to_string())
        } else {
            endpoint.target.clone()
        };
        let action = if self.resolutions.contains_key(&name) { "edit" } else { "add" };
        self.logger().info(
            "resolution",
            &format!("Saved {name}#{resolution} as resolution"),
            LogData::default().with_extra(json!({ "name": name, "resolution": resolution, "action": action })),
        );
        self.resolutions.insert(name, resolution);
    }

    fn drop_unnecessary_resolutions(&mut self) {
        let unnecessary: Vec<(String, String)> = self
            .resolutions
            .iter()
            .filter(|(name, _)| !self.conflicted.contains(*name))
            .map(|(name, resolution)| (name.clone(), resolution.clone()))
            .collect();
        for (name, resolution) in unnecessary {
            self.logger().info(
                "resolution",
                &format!("Removed unnecessary {name}#{resolution} resolution"),
                LogData::default().with_extra(json!({ "name": name, "resolution": resolution, "action": "delete" })),
            );
            self.resolutions.remove(&name);
        }
    }

    /// Drops what does not need installing.
    fn filter_installed(&self, mut plan: InstallPlan) -> InstallPlan {
        let config = &self.manager.config;
        plan.retain(|name, endpoint| {
            if endpoint.linked {
                return false;
            }
            if endpoint.canonical_dir.as_deref() == Some(config.install_dir(name).as_path()) {
                return false;
            }
            if let Some(installed) = self.installed.get(name) {
                let release = endpoint.pkg_meta.as_ref().and_then(|m| m.release.as_deref());
                if installed.target.as_deref() == Some(endpoint.target.as_str())
                    && installed.original_source.as_deref() == Some(endpoint.source.as_str())
                    && installed.release.as_deref() == release
                {
                    return config.force;
                }
            }
            true
        });
        plan
    }
}
