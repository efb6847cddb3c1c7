//! The dependency-chain scheduler: pending-request registration and
//! buildset admission.

use crate::notifier::CompletionListener;
use crate::resolver::{DependencyResolver, Resolution, buildsets_with_properties};
use crate::scheduler::SchedulerPorts;
use async_trait::async_trait;
use chrono::Utc;
use depchain_core::buildset::Buildset;
use depchain_core::events::{
    BuildsetAdmittedPayload, DependencyFailedPayload, Event, PendingRequestAddedPayload,
    PendingRequestsCancelledPayload,
};
use depchain_core::ids::SourceStampId;
use depchain_core::pending::{BuildRequest, PendingBuildsetRequest};
use depchain_core::ports::{
    BuildExecutor, BuildTrigger, BuildsetStore, EventBus, PendingRequestStore,
};
use depchain_core::properties::{
    DEPENDENCIES_PROPERTY, Properties, PropertyMap, SCHEDULER_PROPERTY, SOURCE_DEPENDENCY,
    SOURCE_SCHEDULER, SSID_PROPERTY,
};
use depchain_core::{Error, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Per-scheduler settings beyond name, builder and dependencies.
#[derive(Debug, Clone, Default)]
pub struct ChainOptions {
    /// Properties every admitted buildset inherits.
    pub properties: PropertyMap,
    /// Properties copied from satisfied dependency buildsets.
    pub propagated_properties: Vec<String>,
    /// Drop pending requests when resolution reports a failed dependency.
    pub cancel_on_dependency_failure: bool,
    /// Expire pending requests older than this during reconciliation.
    pub pending_ttl: Option<Duration>,
}

/// How an admission attempt treats unmet dependencies.
#[derive(Debug, Clone, Copy)]
pub enum AdmissionMode<'a> {
    /// Request builds from unmet dependencies with these arguments.
    LaunchDependencies(&'a BuildRequest),
    /// Only admit what is already waiting; never launch dependencies.
    Reevaluate,
}

/// Result of an admission attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Buildsets created from pending requests.
    Admitted(Vec<Buildset>),
    /// Dependencies are still unmet.
    Waiting { unmet: Vec<String>, launched: bool },
    /// Dependencies are met but nothing was pending.
    Idle,
}

/// Scheduler that satisfies its own dependencies before admitting a build.
pub struct DependencyChainScheduler {
    pub(crate) name: String,
    builder: String,
    dependencies: Vec<Arc<DependencyChainScheduler>>,
    dependency_names: Vec<String>,
    properties: Properties,
    pub(crate) propagated_properties: Vec<String>,
    cancel_on_dependency_failure: bool,
    pub(crate) pending_ttl: Option<Duration>,
    resolver: DependencyResolver,
    pub(crate) buildsets: Arc<dyn BuildsetStore>,
    pub(crate) pending: Arc<dyn PendingRequestStore>,
    executor: Arc<dyn BuildExecutor>,
    pub(crate) event_bus: Arc<dyn EventBus>,
    /// Serializes every read-modify-write against the pending store.
    pub(crate) pending_lock: Mutex<()>,
    pub(crate) listener: Mutex<Option<CompletionListener>>,
}

impl DependencyChainScheduler {
    pub fn new(
        name: impl Into<String>,
        builder: impl Into<String>,
        dependencies: Vec<Arc<DependencyChainScheduler>>,
        options: ChainOptions,
        ports: &SchedulerPorts,
    ) -> Self {
        let name = name.into();
        let dependency_names: Vec<String> =
            dependencies.iter().map(|d| d.name.clone()).collect();

        let mut properties = Properties::new();
        properties.update(&options.properties, SOURCE_SCHEDULER);
        properties.set(
            DEPENDENCIES_PROPERTY,
            dependency_names.clone(),
            SOURCE_SCHEDULER,
        );

        Self {
            builder: builder.into(),
            dependencies,
            properties,
            resolver: DependencyResolver::new(
                ports.buildsets.clone(),
                options.propagated_properties.clone(),
            ),
            propagated_properties: options.propagated_properties,
            cancel_on_dependency_failure: options.cancel_on_dependency_failure,
            pending_ttl: options.pending_ttl,
            buildsets: ports.buildsets.clone(),
            pending: ports.pending.clone(),
            executor: ports.executor.clone(),
            event_bus: ports.event_bus.clone(),
            pending_lock: Mutex::new(()),
            listener: Mutex::new(None),
            dependency_names,
            name,
        }
    }

    pub fn builder(&self) -> &str {
        &self.builder
    }

    pub fn dependency_names(&self) -> &[String] {
        &self.dependency_names
    }

    /// Request a build: register a pending request, then try to admit it,
    /// launching unmet dependencies.
    pub async fn submit(&self, ssid: SourceStampId, request: &BuildRequest) -> Result<Admission> {
        if let Some(pending) = self.register_pending(ssid, request).await? {
            self.publish(Event::PendingRequestAdded(PendingRequestAddedPayload {
                request_id: pending.id,
                source_stamp_id: ssid,
                scheduler: self.name.clone(),
                reason: pending.reason.clone(),
                dependencies: pending.dependencies.clone(),
                created_at: pending.created_at,
            }))
            .await;
        }

        self.maybe_admit(
            ssid,
            AdmissionMode::LaunchDependencies(request),
            &PropertyMap::new(),
        )
        .await
    }

    /// Whether this scheduler already created a buildset for `ssid`.
    async fn has_own_buildset(&self, ssid: SourceStampId) -> Result<bool> {
        let entries = buildsets_with_properties(self.buildsets.as_ref(), ssid).await?;
        Ok(entries
            .iter()
            .any(|(_, properties)| properties.scheduler() == Some(self.name.as_str())))
    }

    /// Insert a pending request unless a buildset or an equivalent request
    /// already exists.
    async fn register_pending(
        &self,
        ssid: SourceStampId,
        request: &BuildRequest,
    ) -> Result<Option<PendingBuildsetRequest>> {
        let _guard = self.pending_lock.lock().await;

        if self.has_own_buildset(ssid).await? {
            debug!(scheduler = %self.name, ssid = %ssid, "Buildset already exists; not queueing");
            return Ok(None);
        }

        let existing = self.pending.get_pending_requests(ssid, &self.name).await?;
        if existing.iter().any(|p| p.matches(request)) {
            debug!(scheduler = %self.name, ssid = %ssid, reason = %request.reason, "Duplicate pending request");
            return Ok(None);
        }

        let pending = self
            .pending
            .add_pending_request(ssid, &self.name, &self.dependency_names, request)
            .await?;
        info!(
            scheduler = %self.name,
            ssid = %ssid,
            request_id = %pending.id,
            reason = %request.reason,
            "Pending request added"
        );
        Ok(Some(pending))
    }

    /// Resolve dependencies and admit every pending request if they are all
    /// met. `supplied` properties fill names the resolver did not propagate.
    pub async fn maybe_admit(
        &self,
        ssid: SourceStampId,
        mode: AdmissionMode<'_>,
        supplied: &PropertyMap,
    ) -> Result<Admission> {
        let resolution = {
            let _guard = self.pending_lock.lock().await;
            self.resolver
                .resolve(&self.name, ssid, &self.dependency_names)
                .await
        };

        let resolution = match resolution {
            Ok(resolution) => resolution,
            Err(Error::DependencyFailed {
                scheduler,
                buildset,
            }) => {
                self.dependency_failed(ssid, &buildset).await?;
                return Err(Error::DependencyFailed {
                    scheduler,
                    buildset,
                });
            }
            Err(e) => return Err(e),
        };

        if resolution.is_satisfied() {
            let mut propagated = resolution.propagated;
            for (name, value) in supplied {
                if !propagated.contains(name) {
                    propagated.set(name.clone(), value.clone(), SOURCE_DEPENDENCY);
                }
            }
            let admitted = self.admit_pending(ssid, &propagated).await?;
            return Ok(if admitted.is_empty() {
                Admission::Idle
            } else {
                Admission::Admitted(admitted)
            });
        }

        match mode {
            AdmissionMode::LaunchDependencies(request) => {
                self.launch_dependencies(ssid, request, &resolution).await?;
                Ok(Admission::Waiting {
                    unmet: resolution.unmet,
                    launched: true,
                })
            }
            AdmissionMode::Reevaluate => {
                debug!(
                    scheduler = %self.name,
                    ssid = %ssid,
                    unmet = ?resolution.unmet,
                    "Dependencies still unmet"
                );
                Ok(Admission::Waiting {
                    unmet: resolution.unmet,
                    launched: false,
                })
            }
        }
    }

    async fn launch_dependencies(
        &self,
        ssid: SourceStampId,
        request: &BuildRequest,
        resolution: &Resolution,
    ) -> Result<()> {
        info!(
            scheduler = %self.name,
            ssid = %ssid,
            unmet = ?resolution.unmet,
            running = ?resolution.running,
            "Launching unmet dependencies"
        );
        let launches = self
            .dependencies
            .iter()
            .filter(|dep| resolution.unmet.contains(&dep.name))
            .map(|dep| BuildTrigger::request_build(dep.as_ref(), ssid, request.clone()));
        try_join_all(launches).await?;
        Ok(())
    }

    /// Turn every pending request for `ssid` into a buildset. Each pending
    /// row is deleted as soon as its buildset exists, so a failure partway
    /// through leaves only the rows that were not admitted.
    async fn admit_pending(
        &self,
        ssid: SourceStampId,
        propagated: &Properties,
    ) -> Result<Vec<Buildset>> {
        let (admitted, failure) = {
            let _guard = self.pending_lock.lock().await;

            let pending = self.pending.get_pending_requests(ssid, &self.name).await?;
            if pending.is_empty() {
                debug!(scheduler = %self.name, ssid = %ssid, "Nothing pending to admit");
                return Ok(vec![]);
            }

            let mut admitted = Vec::with_capacity(pending.len());
            let mut failure = None;
            for row in &pending {
                let properties = self.build_properties(ssid, row, propagated);
                let buildset = match self
                    .executor
                    .admit_buildset(
                        ssid,
                        &self.builder,
                        &row.reason,
                        row.external_id.as_deref(),
                        &properties,
                    )
                    .await
                {
                    Ok(buildset) => buildset,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                };
                admitted.push(buildset);

                if let Err(e) = self.pending.delete_pending_request(row.id).await {
                    failure = Some(e);
                    break;
                }
            }
            (admitted, failure)
        };

        for buildset in &admitted {
            info!(
                scheduler = %self.name,
                ssid = %ssid,
                buildset_id = %buildset.id,
                builder = %self.builder,
                "Buildset admitted"
            );
            self.publish(Event::BuildsetAdmitted(BuildsetAdmittedPayload {
                buildset_id: buildset.id,
                source_stamp_id: ssid,
                scheduler: self.name.clone(),
                builder: self.builder.clone(),
                reason: buildset.reason.clone(),
                submitted_at: buildset.submitted_at,
            }))
            .await;
        }

        if let Some(e) = failure {
            warn!(
                scheduler = %self.name,
                ssid = %ssid,
                admitted = admitted.len(),
                error = %e,
                "Admission stopped partway; remaining requests stay pending"
            );
            return Err(e);
        }

        Ok(admitted)
    }

    fn build_properties(
        &self,
        ssid: SourceStampId,
        row: &PendingBuildsetRequest,
        propagated: &Properties,
    ) -> Properties {
        let mut properties = self.properties.clone();
        properties.update_from(propagated);
        properties.set(SSID_PROPERTY, ssid.get(), SOURCE_SCHEDULER);
        properties.update(&row.properties, SOURCE_SCHEDULER);
        properties.set(SCHEDULER_PROPERTY, self.name.clone(), SOURCE_SCHEDULER);
        properties.set(
            DEPENDENCIES_PROPERTY,
            self.dependency_names.clone(),
            SOURCE_SCHEDULER,
        );
        properties
    }

    async fn dependency_failed(&self, ssid: SourceStampId, buildset: &Buildset) -> Result<()> {
        let failed_scheduler = self
            .buildsets
            .get_buildset_properties(buildset.id)
            .await
            .ok()
            .and_then(|p| p.scheduler().map(str::to_string));

        warn!(
            scheduler = %self.name,
            ssid = %ssid,
            buildset_id = %buildset.id,
            dependency = ?failed_scheduler,
            result = buildset.result_label(),
            "Dependency failed; not admitting"
        );

        self.publish(Event::DependencyFailed(DependencyFailedPayload {
            source_stamp_id: ssid,
            scheduler: self.name.clone(),
            failed_buildset_id: buildset.id,
            failed_scheduler,
            result: buildset.result,
            detected_at: Utc::now(),
        }))
        .await;

        if self.cancel_on_dependency_failure {
            self.cancel_pending(ssid).await?;
        }
        Ok(())
    }

    /// Delete every pending request of this scheduler for `ssid`.
    pub async fn cancel_pending(&self, ssid: SourceStampId) -> Result<u64> {
        let cancelled = {
            let _guard = self.pending_lock.lock().await;
            self.pending
                .cancel_pending_requests(ssid, &self.name)
                .await?
        };

        if cancelled > 0 {
            info!(scheduler = %self.name, ssid = %ssid, cancelled, "Pending requests cancelled");
            self.publish(Event::PendingRequestsCancelled(
                PendingRequestsCancelledPayload {
                    source_stamp_id: ssid,
                    scheduler: self.name.clone(),
                    cancelled,
                    cancelled_at: Utc::now(),
                },
            ))
            .await;
        }
        Ok(cancelled)
    }

    /// Delete pending requests older than `ttl`.
    pub async fn expire_pending(&self, ttl: Duration) -> Result<u64> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::Configuration(format!("Invalid pending TTL: {}", e)))?;
        let cutoff = Utc::now() - ttl;

        let expired = {
            let _guard = self.pending_lock.lock().await;
            self.pending
                .expire_pending_requests(&self.name, cutoff)
                .await?
        };
        if expired > 0 {
            info!(scheduler = %self.name, expired, cutoff = %cutoff, "Expired stale pending requests");
        }
        Ok(expired)
    }

    /// Pending requests of this scheduler for `ssid`.
    pub async fn pending_requests(&self, ssid: SourceStampId) -> Result<Vec<PendingBuildsetRequest>> {
        self.pending.get_pending_requests(ssid, &self.name).await
    }

    /// Events are informational; a failed publish never fails scheduling.
    pub(crate) async fn publish(&self, event: Event) {
        let subject = event.subject();
        if let Err(e) = self.event_bus.publish(event).await {
            warn!(scheduler = %self.name, subject = %subject, error = %e, "Failed to publish event");
        }
    }
}

#[async_trait]
impl BuildTrigger for DependencyChainScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request_build(&self, ssid: SourceStampId, request: BuildRequest) -> Result<()> {
        self.submit(ssid, &request).await.map(|_| ())
    }
}

impl std::fmt::Debug for DependencyChainScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyChainScheduler")
            .field("name", &self.name)
            .field("builder", &self.builder)
            .field("dependencies", &self.dependency_names)
            .finish()
    }
}
