//! Scheduler set: builds every configured scheduler and routes requests,
//! commits and completions to them.

use crate::chain::{Admission, ChainOptions, DependencyChainScheduler};
use crate::config::{SchedulerConfig, SchedulerSpec};
use crate::dag::SchedulerGraph;
use crate::notifier::ReconcileSummary;
use crate::triggers::{NightlyScheduler, PerCommitScheduler};
use chrono::Utc;
use depchain_core::buildset::{BuildResult, Buildset};
use depchain_core::events::{BuildsetCompletedPayload, Event, SourceStampCreatedPayload};
use depchain_core::ids::{BuildsetId, SourceStampId};
use depchain_core::pending::{BuildRequest, PendingBuildsetRequest};
use depchain_core::ports::{
    BuildExecutor, BuildTrigger, BuildsetCompleter, BuildsetStore, EventBus,
    PendingRequestStore, SourceStampRepository,
};
use depchain_core::sourcestamp::{NewSourceStamp, SourceStamp};
use depchain_core::{Error, Result};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The stores and services schedulers depend on.
#[derive(Clone)]
pub struct SchedulerPorts {
    pub buildsets: Arc<dyn BuildsetStore>,
    pub pending: Arc<dyn PendingRequestStore>,
    pub executor: Arc<dyn BuildExecutor>,
    pub completer: Arc<dyn BuildsetCompleter>,
    pub event_bus: Arc<dyn EventBus>,
    pub source_stamps: Arc<dyn SourceStampRepository>,
}

/// What happened when a commit was recorded.
#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub source_stamp: SourceStamp,
    /// Per-commit schedulers whose branch filter matched.
    pub triggered: Vec<String>,
    /// Per-commit schedulers that failed, with their error.
    pub errors: Vec<(String, String)>,
}

struct NightlyLoops {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Every configured scheduler, keyed by name.
pub struct SchedulerSet {
    order: Vec<String>,
    specs: HashMap<String, SchedulerSpec>,
    triggers: HashMap<String, Arc<dyn BuildTrigger>>,
    chains: HashMap<String, Arc<DependencyChainScheduler>>,
    per_commit: Vec<Arc<PerCommitScheduler>>,
    nightly: Vec<Arc<NightlyScheduler>>,
    ports: SchedulerPorts,
    nightly_loops: Mutex<Option<NightlyLoops>>,
}

impl SchedulerSet {
    /// Validate `config` and instantiate its schedulers, dependencies first.
    pub fn build(config: &SchedulerConfig, ports: SchedulerPorts) -> Result<Self> {
        let graph = SchedulerGraph::build(config)?;

        let mut order = Vec::with_capacity(graph.len());
        let mut specs = HashMap::new();
        let mut triggers: HashMap<String, Arc<dyn BuildTrigger>> = HashMap::new();
        let mut chains: HashMap<String, Arc<DependencyChainScheduler>> = HashMap::new();
        let mut per_commit = Vec::new();
        let mut nightly = Vec::new();

        for node in graph.topological_order()? {
            let name = node.name.clone();
            let trigger: Arc<dyn BuildTrigger> = match &node.spec {
                SchedulerSpec::Chain(spec) => {
                    let dependencies = spec
                        .dependencies
                        .iter()
                        .map(|dep| lookup(&chains, dep))
                        .collect::<Result<Vec<_>>>()?;
                    let options = ChainOptions {
                        properties: spec.properties.clone(),
                        propagated_properties: config.propagated_properties.clone(),
                        cancel_on_dependency_failure: spec.cancel_on_dependency_failure,
                        pending_ttl: config.pending_ttl(),
                    };
                    let chain = Arc::new(DependencyChainScheduler::new(
                        &spec.name,
                        &spec.builder,
                        dependencies,
                        options,
                        &ports,
                    ));
                    chains.insert(name.clone(), chain.clone());
                    chain
                }
                SchedulerSpec::PerCommit(spec) => {
                    let targets = spec
                        .targets
                        .iter()
                        .map(|t| lookup(&triggers, t))
                        .collect::<Result<Vec<_>>>()?;
                    let scheduler = Arc::new(PerCommitScheduler::new(
                        &spec.name,
                        spec.branches.clone(),
                        targets,
                    ));
                    per_commit.push(scheduler.clone());
                    scheduler
                }
                SchedulerSpec::Nightly(spec) => {
                    let targets = spec
                        .targets
                        .iter()
                        .map(|t| lookup(&triggers, t))
                        .collect::<Result<Vec<_>>>()?;
                    let scheduler = Arc::new(NightlyScheduler::new(
                        &spec.name,
                        &spec.cron,
                        spec.branch.clone(),
                        targets,
                        ports.source_stamps.clone(),
                    )?);
                    nightly.push(scheduler.clone());
                    scheduler
                }
            };
            triggers.insert(name.clone(), trigger);
            specs.insert(name.clone(), node.spec.clone());
            order.push(name);
        }

        info!(
            schedulers = order.len(),
            chains = chains.len(),
            per_commit = per_commit.len(),
            nightly = nightly.len(),
            "Schedulers configured"
        );

        Ok(Self {
            order,
            specs,
            triggers,
            chains,
            per_commit,
            nightly,
            ports,
            nightly_loops: Mutex::new(None),
        })
    }

    /// Scheduler names, dependencies first.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// The configuration a scheduler was built from.
    pub fn spec(&self, name: &str) -> Option<&SchedulerSpec> {
        self.specs.get(name)
    }

    pub fn trigger(&self, name: &str) -> Result<Arc<dyn BuildTrigger>> {
        lookup(&self.triggers, name)
    }

    pub fn chain(&self, name: &str) -> Result<Arc<DependencyChainScheduler>> {
        lookup(&self.chains, name)
    }

    pub fn chains(&self) -> impl Iterator<Item = &Arc<DependencyChainScheduler>> {
        self.order.iter().filter_map(|name| self.chains.get(name))
    }

    pub fn ports(&self) -> &SchedulerPorts {
        &self.ports
    }

    /// Request a build from any scheduler by name.
    pub async fn request_build(
        &self,
        name: &str,
        ssid: SourceStampId,
        request: BuildRequest,
    ) -> Result<()> {
        self.trigger(name)?.request_build(ssid, request).await
    }

    /// Submit to a chain scheduler and report the admission outcome.
    pub async fn submit(
        &self,
        name: &str,
        ssid: SourceStampId,
        request: &BuildRequest,
    ) -> Result<Admission> {
        self.chain(name)?.submit(ssid, request).await
    }

    /// Record a new source stamp and fan it out to every per-commit
    /// scheduler whose branch filter matches.
    pub async fn commit(&self, stamp: NewSourceStamp) -> Result<CommitOutcome> {
        let source_stamp = self.ports.source_stamps.create(&stamp).await?;
        info!(
            ssid = %source_stamp.id,
            branch = ?source_stamp.branch,
            revision = ?source_stamp.revision,
            "Source stamp recorded"
        );

        let event = Event::SourceStampCreated(SourceStampCreatedPayload {
            source_stamp_id: source_stamp.id,
            branch: source_stamp.branch.clone(),
            revision: source_stamp.revision.clone(),
            created_at: source_stamp.created_at,
        });
        if let Err(e) = self.ports.event_bus.publish(event).await {
            warn!(ssid = %source_stamp.id, error = %e, "Failed to publish source stamp event");
        }

        let branch = source_stamp.branch.as_deref().unwrap_or_default();
        let matching: Vec<&Arc<PerCommitScheduler>> = self
            .per_commit
            .iter()
            .filter(|s| s.matches_branch(branch))
            .collect();

        let reason = match &source_stamp.revision {
            Some(revision) => format!("commit {}", revision),
            None => "commit".to_string(),
        };
        let results = join_all(matching.iter().map(|s| {
            s.request_build(source_stamp.id, BuildRequest::new(reason.clone()))
        }))
        .await;

        let mut triggered = Vec::with_capacity(matching.len());
        let mut errors = Vec::new();
        for (scheduler, result) in matching.iter().zip(results) {
            let name = BuildTrigger::name(scheduler.as_ref()).to_string();
            match result {
                Ok(()) => triggered.push(name),
                Err(e) => errors.push((name, e.to_string())),
            }
        }

        Ok(CommitOutcome {
            source_stamp,
            triggered,
            errors,
        })
    }

    /// Mark a buildset complete and announce it to the schedulers.
    pub async fn complete_buildset(&self, id: BuildsetId, result: BuildResult) -> Result<Buildset> {
        let buildset = self.ports.completer.complete_buildset(id, result).await?;
        info!(buildset_id = %id, ssid = %buildset.source_stamp_id, result = %result, "Buildset completed");

        let event = Event::BuildsetCompleted(BuildsetCompletedPayload {
            buildset_id: buildset.id,
            source_stamp_id: buildset.source_stamp_id,
            result,
            completed_at: buildset.completed_at.unwrap_or_else(Utc::now),
        });
        self.ports
            .event_bus
            .publish(event)
            .await
            .map_err(|e| Error::EventBus(format!("Completion of {} not announced: {}", id, e)))?;
        Ok(buildset)
    }

    /// Pending requests of one chain scheduler for `ssid`.
    pub async fn pending(&self, name: &str, ssid: SourceStampId) -> Result<Vec<PendingBuildsetRequest>> {
        self.chain(name)?.pending_requests(ssid).await
    }

    /// Every pending request of one chain scheduler.
    pub async fn list_pending(&self, name: &str) -> Result<Vec<PendingBuildsetRequest>> {
        let chain = self.chain(name)?;
        self.ports.pending.list_pending_requests(&chain.name).await
    }

    pub async fn cancel(&self, name: &str, ssid: SourceStampId) -> Result<u64> {
        self.chain(name)?.cancel_pending(ssid).await
    }

    /// Expire pending requests older than `ttl` across every chain scheduler.
    pub async fn expire_pending(&self, ttl: Duration) -> Result<u64> {
        let mut expired = 0;
        for chain in self.chains() {
            expired += chain.expire_pending(ttl).await?;
        }
        Ok(expired)
    }

    /// Start every chain scheduler, reconciling as they come up, then the
    /// nightly loops.
    pub async fn start(&self) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        for chain in self.chains() {
            summary.merge(&chain.start().await?);
        }

        let mut loops = self.nightly_loops.lock().await;
        if loops.is_none() && !self.nightly.is_empty() {
            let (shutdown, shutdown_rx) = watch::channel(false);
            let handles = self
                .nightly
                .iter()
                .map(|n| tokio::spawn(Arc::clone(n).run(shutdown_rx.clone())))
                .collect();
            *loops = Some(NightlyLoops { shutdown, handles });
        }
        Ok(summary)
    }

    pub async fn stop(&self) {
        if let Some(loops) = self.nightly_loops.lock().await.take() {
            let _ = loops.shutdown.send(true);
            for handle in loops.handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Nightly scheduler ended abnormally");
                }
            }
        }
        for chain in self.chains() {
            chain.stop().await;
        }
    }

    /// Re-run reconciliation on every chain scheduler.
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        for chain in self.chains() {
            summary.merge(&chain.reconcile().await?);
        }
        Ok(summary)
    }
}

fn lookup<T: ?Sized>(map: &HashMap<String, Arc<T>>, name: &str) -> Result<Arc<T>> {
    map.get(name)
        .cloned()
        .ok_or_else(|| Error::SchedulerNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBuildStore, MemoryEventBus, MemoryPendingStore};
    use depchain_core::properties::SCHEDULER_PROPERTY;
    use serde_json::json;

    const CONFIG: &str = r#"
schedulers:
  - kind: chain
    name: update
    builder: Update-Scripts
  - kind: chain
    name: compile
    builder: Build-Compile
    dependencies: [update]
  - kind: per_commit
    name: main-commits
    branches: [main]
    targets: [compile]
"#;

    fn ports() -> (SchedulerPorts, Arc<MemoryBuildStore>, Arc<MemoryEventBus>) {
        let store = Arc::new(MemoryBuildStore::new());
        let bus = Arc::new(MemoryEventBus::new());
        let ports = SchedulerPorts {
            buildsets: store.clone(),
            pending: Arc::new(MemoryPendingStore::new()),
            executor: store.clone(),
            completer: store.clone(),
            event_bus: bus.clone(),
            source_stamps: store.clone(),
        };
        (ports, store, bus)
    }

    #[test]
    fn test_build_orders_dependencies_first() {
        let (ports, _, _) = ports();
        let set = SchedulerSet::build(&SchedulerConfig::from_yaml(CONFIG).unwrap(), ports).unwrap();
        assert_eq!(set.names(), ["update", "compile", "main-commits"]);
        assert_eq!(set.chain("compile").unwrap().dependency_names(), ["update"]);
        assert!(matches!(set.chain("main-commits"), Err(Error::SchedulerNotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_scheduler() {
        let (ports, _, _) = ports();
        let set = SchedulerSet::build(&SchedulerConfig::from_yaml(CONFIG).unwrap(), ports).unwrap();
        let err = set
            .request_build("nope", SourceStampId::new(1), BuildRequest::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchedulerNotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_commit_fans_out_on_matching_branch() {
        let (ports, store, bus) = ports();
        let set = SchedulerSet::build(&SchedulerConfig::from_yaml(CONFIG).unwrap(), ports).unwrap();

        let outcome = set.commit(NewSourceStamp::new("main", "abc123")).await.unwrap();
        assert_eq!(outcome.triggered, vec!["main-commits".to_string()]);
        assert!(outcome.errors.is_empty());

        let ssid = outcome.source_stamp.id;
        let buildsets = store.buildsets_with_properties(ssid);
        assert_eq!(buildsets.len(), 1);
        assert_eq!(buildsets[0].0.builder, "Update-Scripts");
        assert_eq!(buildsets[0].1.value(SCHEDULER_PROPERTY), Some(&json!("update")));
        assert_eq!(set.pending("compile", ssid).await.unwrap().len(), 1);
        assert!(bus.subjects().contains(&format!("sourcestamp.created.{}", ssid)));

        let other = set.commit(NewSourceStamp::new("develop", "def456")).await.unwrap();
        assert!(other.triggered.is_empty());
        assert!(store.buildsets_with_properties(other.source_stamp.id).is_empty());
    }

    #[tokio::test]
    async fn test_complete_buildset_publishes_event() {
        let (ports, store, bus) = ports();
        let set = SchedulerSet::build(&SchedulerConfig::from_yaml(CONFIG).unwrap(), ports).unwrap();
        let ssid = SourceStampId::new(3);
        let buildset = store.seed_buildset(ssid, "update", None, vec![]);

        let completed = set
            .complete_buildset(buildset.id, BuildResult::Success)
            .await
            .unwrap();
        assert!(completed.is_satisfied());
        assert!(bus.subjects().contains(&format!("buildset.completed.{}", buildset.id)));

        let again = set.complete_buildset(buildset.id, BuildResult::Failure).await;
        assert!(matches!(again, Err(Error::BuildsetAlreadyComplete(_))));
    }
}
