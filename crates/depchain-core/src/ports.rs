//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the scheduling core and the
//! stores, event bus and build-execution layer it collaborates with. Each
//! method is a single atomic store call; multi-step invariants are built on
//! top of them by the schedulers.

use crate::buildset::{BuildResult, Buildset};
use crate::events::Event;
use crate::ids::*;
use crate::pending::{BuildRequest, PendingBuildsetRequest};
use crate::properties::Properties;
use crate::sourcestamp::{NewSourceStamp, SourceStamp};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;

/// Stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Event bus for publishing and subscribing to events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: Event) -> Result<()>;

    /// Subscribe to events matching a pattern.
    /// Pattern supports wildcards: `buildset.*.7`, `buildset.completed.>`
    async fn subscribe(&self, pattern: &str) -> Result<EventStream>;
}

/// Read access to the build-outcome store.
#[async_trait]
pub trait BuildsetStore: Send + Sync {
    /// All buildsets recorded for a source stamp.
    async fn get_buildsets_for_source_stamp(&self, ssid: SourceStampId) -> Result<Vec<Buildset>>;

    /// The property bag of a buildset (empty if it has none).
    async fn get_buildset_properties(&self, id: BuildsetId) -> Result<Properties>;

    /// Get a buildset by ID.
    async fn get_buildset(&self, id: BuildsetId) -> Result<Option<Buildset>>;
}

/// Durable table of build requests waiting on dependencies.
#[async_trait]
pub trait PendingRequestStore: Send + Sync {
    /// Record a pending request.
    async fn add_pending_request(
        &self,
        ssid: SourceStampId,
        scheduler: &str,
        dependencies: &[String],
        request: &BuildRequest,
    ) -> Result<PendingBuildsetRequest>;

    /// Pending requests for one scheduler and source stamp, oldest first.
    async fn get_pending_requests(
        &self,
        ssid: SourceStampId,
        scheduler: &str,
    ) -> Result<Vec<PendingBuildsetRequest>>;

    /// Delete every pending request for one scheduler and source stamp.
    async fn cancel_pending_requests(&self, ssid: SourceStampId, scheduler: &str) -> Result<u64>;

    /// Delete one pending request. Returns false if it was already gone.
    async fn delete_pending_request(&self, id: PendingRequestId) -> Result<bool>;

    /// All pending requests of a scheduler, oldest first.
    async fn list_pending_requests(&self, scheduler: &str) -> Result<Vec<PendingBuildsetRequest>>;

    /// Delete a scheduler's pending requests created before `older_than`.
    async fn expire_pending_requests(
        &self,
        scheduler: &str,
        older_than: DateTime<Utc>,
    ) -> Result<u64>;
}

/// The build-execution layer that turns admitted requests into builds.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Create a real buildset for `builder`.
    async fn admit_buildset(
        &self,
        ssid: SourceStampId,
        builder: &str,
        reason: &str,
        external_id: Option<&str>,
        properties: &Properties,
    ) -> Result<Buildset>;
}

/// Records buildset completions reported by builders.
#[async_trait]
pub trait BuildsetCompleter: Send + Sync {
    /// Mark a buildset complete. Fails if it is already complete.
    async fn complete_buildset(&self, id: BuildsetId, result: BuildResult) -> Result<Buildset>;
}

/// Anything that accepts build requests for a source stamp.
#[async_trait]
pub trait BuildTrigger: Send + Sync {
    /// Scheduler name.
    fn name(&self) -> &str;

    /// Request a build of `ssid`.
    async fn request_build(&self, ssid: SourceStampId, request: BuildRequest) -> Result<()>;
}

/// Repository of source stamps.
#[async_trait]
pub trait SourceStampRepository: Send + Sync {
    /// Record a new source stamp.
    async fn create(&self, stamp: &NewSourceStamp) -> Result<SourceStamp>;

    /// Get a source stamp by ID.
    async fn get(&self, id: SourceStampId) -> Result<Option<SourceStamp>>;

    /// The most recent source stamp, optionally restricted to a branch.
    async fn latest(&self, branch: Option<&str>) -> Result<Option<SourceStamp>>;
}
