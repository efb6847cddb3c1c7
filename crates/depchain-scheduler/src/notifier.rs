//! Completion listener and start-up reconciliation for chain schedulers.

use crate::chain::{Admission, AdmissionMode, DependencyChainScheduler};
use depchain_core::events::{BUILDSET_COMPLETED_PATTERN, BuildsetCompletedPayload, Event};
use depchain_core::ids::{BuildsetId, SourceStampId};
use depchain_core::ports::EventStream;
use depchain_core::properties::PropertyMap;
use depchain_core::{Error, Result};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Whether a scheduler is listening for completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Source stamps with pending requests.
    pub examined: usize,
    /// Buildsets admitted.
    pub admitted: usize,
    /// Source stamps still waiting on dependencies.
    pub waiting: usize,
    /// Source stamps whose resolution failed.
    pub failed: usize,
    /// Pending requests expired by age.
    pub expired: u64,
}

impl ReconcileSummary {
    pub fn merge(&mut self, other: &ReconcileSummary) {
        self.examined += other.examined;
        self.admitted += other.admitted;
        self.waiting += other.waiting;
        self.failed += other.failed;
        self.expired += other.expired;
    }
}

pub(crate) struct CompletionListener {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DependencyChainScheduler {
    pub async fn state(&self) -> SchedulerState {
        if self.listener.lock().await.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Subscribe to buildset completions, then admit anything that became
    /// ready while the scheduler was not listening.
    pub async fn start(self: &Arc<Self>) -> Result<ReconcileSummary> {
        {
            let mut listener = self.listener.lock().await;
            if listener.is_some() {
                debug!(scheduler = %self.name, "Scheduler already running");
                return Ok(ReconcileSummary::default());
            }

            let stream = self.event_bus.subscribe(BUILDSET_COMPLETED_PATTERN).await?;
            let (shutdown, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn(Arc::clone(self).run_listener(stream, shutdown_rx));
            *listener = Some(CompletionListener { shutdown, handle });
        }
        info!(scheduler = %self.name, dependencies = ?self.dependency_names(), "Scheduler started");

        match self.reconcile().await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!(scheduler = %self.name, error = %e, "Reconciliation failed");
                Ok(ReconcileSummary::default())
            }
        }
    }

    /// Stop listening for completions.
    pub async fn stop(&self) {
        let Some(listener) = self.listener.lock().await.take() else {
            return;
        };
        let _ = listener.shutdown.send(true);
        if let Err(e) = listener.handle.await {
            warn!(scheduler = %self.name, error = %e, "Completion listener ended abnormally");
        }
        info!(scheduler = %self.name, "Scheduler stopped");
    }

    async fn run_listener(
        self: Arc<Self>,
        mut events: EventStream,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(Ok(Event::BuildsetCompleted(payload))) => {
                        let scheduler = Arc::clone(&self);
                        tokio::spawn(async move {
                            scheduler.on_completion(payload).await;
                        });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(scheduler = %self.name, error = %e, "Error receiving completion event");
                    }
                    None => {
                        warn!(scheduler = %self.name, "Completion stream closed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(scheduler = %self.name, "Completion listener shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn on_completion(&self, payload: BuildsetCompletedPayload) {
        match self.handle_completion(payload.buildset_id).await {
            Ok(Some(Admission::Admitted(buildsets))) => {
                debug!(
                    scheduler = %self.name,
                    ssid = %payload.source_stamp_id,
                    admitted = buildsets.len(),
                    "Admitted after dependency completion"
                );
            }
            Ok(_) => {}
            // Already logged and published by the admission path.
            Err(Error::DependencyFailed { .. }) => {}
            Err(e) => {
                warn!(
                    scheduler = %self.name,
                    ssid = %payload.source_stamp_id,
                    buildset_id = %payload.buildset_id,
                    error = %e,
                    "Failed to handle buildset completion"
                );
            }
        }
    }

    /// Re-evaluate the source stamp of a completed buildset. Unknown
    /// buildsets, completions from schedulers this one does not depend on,
    /// and stamps with nothing pending are ignored.
    pub async fn handle_completion(&self, buildset_id: BuildsetId) -> Result<Option<Admission>> {
        let Some(buildset) = self.buildsets.get_buildset(buildset_id).await? else {
            debug!(scheduler = %self.name, buildset_id = %buildset_id, "Completed buildset not found");
            return Ok(None);
        };
        let ssid = buildset.source_stamp_id;

        let properties = self.buildsets.get_buildset_properties(buildset_id).await?;
        let Some(completed_by) = properties.scheduler() else {
            return Ok(None);
        };
        if !self.dependency_names().iter().any(|d| d == completed_by) {
            return Ok(None);
        }

        if self
            .pending
            .get_pending_requests(ssid, &self.name)
            .await?
            .is_empty()
        {
            return Ok(None);
        }

        debug!(
            scheduler = %self.name,
            ssid = %ssid,
            dependency = completed_by,
            buildset_id = %buildset_id,
            "Dependency completed; re-evaluating"
        );
        let supplied = properties.select(&self.propagated_properties);
        self.maybe_admit(ssid, AdmissionMode::Reevaluate, &supplied)
            .await
            .map(Some)
    }

    /// Expire stale pending requests and re-evaluate every source stamp
    /// that still has one.
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();

        if let Some(ttl) = self.pending_ttl {
            summary.expired = self.expire_pending(ttl).await?;
        }

        let mut stamps: Vec<SourceStampId> = Vec::new();
        for row in self.pending.list_pending_requests(&self.name).await? {
            if !stamps.contains(&row.source_stamp_id) {
                stamps.push(row.source_stamp_id);
            }
        }

        let none = PropertyMap::new();
        for ssid in stamps {
            summary.examined += 1;
            match self.maybe_admit(ssid, AdmissionMode::Reevaluate, &none).await {
                Ok(Admission::Admitted(buildsets)) => summary.admitted += buildsets.len(),
                Ok(Admission::Waiting { .. }) => summary.waiting += 1,
                Ok(Admission::Idle) => {}
                Err(Error::DependencyFailed { .. }) => summary.failed += 1,
                Err(e) if e.is_store_unavailable() => return Err(e),
                Err(e) => {
                    warn!(scheduler = %self.name, ssid = %ssid, error = %e, "Reconciliation failed for source stamp");
                    summary.failed += 1;
                }
            }
        }

        if summary.examined > 0 || summary.expired > 0 {
            info!(
                scheduler = %self.name,
                examined = summary.examined,
                admitted = summary.admitted,
                waiting = summary.waiting,
                failed = summary.failed,
                expired = summary.expired,
                "Reconciled pending requests"
            );
        }
        Ok(summary)
    }
}
