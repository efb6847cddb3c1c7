//! In-memory adapters for the store and event-bus ports.
//!
//! Used by `depchain serve --memory` and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depchain_core::buildset::{BuildResult, Buildset};
use depchain_core::events::{Event, subject_matches};
use depchain_core::ids::{BuildsetId, PendingRequestId, SourceStampId};
use depchain_core::pending::{BuildRequest, PendingBuildsetRequest};
use depchain_core::ports::{
    BuildExecutor, BuildsetCompleter, BuildsetStore, EventBus, EventStream,
    PendingRequestStore, SourceStampRepository,
};
use depchain_core::properties::{Properties, SCHEDULER_PROPERTY, SOURCE_SCHEDULER};
use depchain_core::sourcestamp::{NewSourceStamp, SourceStamp};
use depchain_core::{Error, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Broadcast-channel event bus that also records everything published.
pub struct MemoryEventBus {
    sender: broadcast::Sender<Event>,
    published: Mutex<Vec<Event>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn published(&self) -> Vec<Event> {
        lock(&self.published).clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        lock(&self.published).iter().map(Event::subject).collect()
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        lock(&self.published).push(event.clone());
        // No subscribers is not an error.
        let _ = self.sender.send(event);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<EventStream> {
        let pattern = pattern.to_string();
        let receiver = self.sender.subscribe();

        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let pattern = pattern.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) if subject_matches(&pattern, &event.subject()) => {
                            return Some((Ok(event), receiver));
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            let err = Error::EventBus(format!("Subscriber lagged by {} events", skipped));
                            return Some((Err(err), receiver));
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[derive(Default)]
struct BuildState {
    next_buildset: i64,
    next_stamp: i64,
    buildsets: Vec<(Buildset, Properties)>,
    stamps: Vec<SourceStamp>,
}

/// Buildsets and source stamps held in memory. Doubles as the
/// build-execution layer: admitted buildsets are stored incomplete.
#[derive(Default)]
pub struct MemoryBuildStore {
    state: Mutex<BuildState>,
    unavailable: AtomicBool,
}

impl MemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every store call fail with a database error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::Database("build store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn insert(
        &self,
        ssid: SourceStampId,
        builder: &str,
        reason: &str,
        external_id: Option<&str>,
        result: Option<BuildResult>,
        properties: Properties,
    ) -> Buildset {
        let mut state = lock(&self.state);
        state.next_buildset += 1;
        let now = Utc::now();
        let buildset = Buildset {
            id: BuildsetId::new(state.next_buildset),
            source_stamp_id: ssid,
            reason: reason.to_string(),
            external_id: external_id.map(str::to_string),
            builder: builder.to_string(),
            complete: result.is_some(),
            result,
            submitted_at: now,
            completed_at: result.map(|_| now),
        };
        state.buildsets.push((buildset.clone(), properties));
        buildset
    }

    /// Record a buildset as if `scheduler` had created it. `None` leaves it
    /// incomplete.
    pub fn seed_buildset(
        &self,
        ssid: SourceStampId,
        scheduler: &str,
        result: Option<BuildResult>,
        properties: Vec<(&str, Value)>,
    ) -> Buildset {
        let mut bag = Properties::new();
        for (name, value) in properties {
            bag.set(name, value, "Build");
        }
        bag.set(SCHEDULER_PROPERTY, scheduler, SOURCE_SCHEDULER);
        self.insert(ssid, scheduler, "seeded", None, result, bag)
    }

    pub fn buildsets_with_properties(&self, ssid: SourceStampId) -> Vec<(Buildset, Properties)> {
        lock(&self.state)
            .buildsets
            .iter()
            .filter(|(b, _)| b.source_stamp_id == ssid)
            .cloned()
            .collect()
    }

    /// Buildsets created for `scheduler` on `ssid`.
    pub fn buildsets_for(&self, ssid: SourceStampId, scheduler: &str) -> Vec<Buildset> {
        self.buildsets_with_properties(ssid)
            .into_iter()
            .filter(|(_, p)| p.scheduler() == Some(scheduler))
            .map(|(b, _)| b)
            .collect()
    }
}

#[async_trait]
impl BuildsetStore for MemoryBuildStore {
    async fn get_buildsets_for_source_stamp(&self, ssid: SourceStampId) -> Result<Vec<Buildset>> {
        self.check_available()?;
        Ok(self
            .buildsets_with_properties(ssid)
            .into_iter()
            .map(|(b, _)| b)
            .collect())
    }

    async fn get_buildset_properties(&self, id: BuildsetId) -> Result<Properties> {
        self.check_available()?;
        Ok(lock(&self.state)
            .buildsets
            .iter()
            .find(|(b, _)| b.id == id)
            .map(|(_, p)| p.clone())
            .unwrap_or_default())
    }

    async fn get_buildset(&self, id: BuildsetId) -> Result<Option<Buildset>> {
        self.check_available()?;
        Ok(lock(&self.state)
            .buildsets
            .iter()
            .find(|(b, _)| b.id == id)
            .map(|(b, _)| b.clone()))
    }
}

#[async_trait]
impl BuildExecutor for MemoryBuildStore {
    async fn admit_buildset(
        &self,
        ssid: SourceStampId,
        builder: &str,
        reason: &str,
        external_id: Option<&str>,
        properties: &Properties,
    ) -> Result<Buildset> {
        self.check_available()?;
        Ok(self.insert(ssid, builder, reason, external_id, None, properties.clone()))
    }
}

#[async_trait]
impl BuildsetCompleter for MemoryBuildStore {
    async fn complete_buildset(&self, id: BuildsetId, result: BuildResult) -> Result<Buildset> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let (buildset, _) = state
            .buildsets
            .iter_mut()
            .find(|(b, _)| b.id == id)
            .ok_or_else(|| Error::BuildsetNotFound(id.to_string()))?;
        if buildset.complete {
            return Err(Error::BuildsetAlreadyComplete(id.to_string()));
        }
        buildset.complete = true;
        buildset.result = Some(result);
        buildset.completed_at = Some(Utc::now());
        Ok(buildset.clone())
    }
}

#[async_trait]
impl SourceStampRepository for MemoryBuildStore {
    async fn create(&self, stamp: &NewSourceStamp) -> Result<SourceStamp> {
        self.check_available()?;
        let mut state = lock(&self.state);
        state.next_stamp += 1;
        let created = SourceStamp {
            id: SourceStampId::new(state.next_stamp),
            branch: stamp.branch.clone(),
            revision: stamp.revision.clone(),
            repository: stamp.repository.clone(),
            created_at: Utc::now(),
        };
        state.stamps.push(created.clone());
        Ok(created)
    }

    async fn get(&self, id: SourceStampId) -> Result<Option<SourceStamp>> {
        self.check_available()?;
        Ok(lock(&self.state).stamps.iter().find(|s| s.id == id).cloned())
    }

    async fn latest(&self, branch: Option<&str>) -> Result<Option<SourceStamp>> {
        self.check_available()?;
        Ok(lock(&self.state)
            .stamps
            .iter()
            .filter(|s| branch.is_none() || s.branch.as_deref() == branch)
            .max_by_key(|s| s.id.get())
            .cloned())
    }
}

#[derive(Default)]
struct PendingState {
    next_id: i64,
    rows: Vec<PendingBuildsetRequest>,
}

/// Pending buildset requests held in memory.
#[derive(Default)]
pub struct MemoryPendingStore {
    state: Mutex<PendingState>,
}

impl MemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override a request's creation time.
    pub fn set_created_at(&self, id: PendingRequestId, created_at: DateTime<Utc>) {
        if let Some(row) = lock(&self.state).rows.iter_mut().find(|r| r.id == id) {
            row.created_at = created_at;
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.state).rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PendingRequestStore for MemoryPendingStore {
    async fn add_pending_request(
        &self,
        ssid: SourceStampId,
        scheduler: &str,
        dependencies: &[String],
        request: &BuildRequest,
    ) -> Result<PendingBuildsetRequest> {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let row = PendingBuildsetRequest {
            id: PendingRequestId::new(state.next_id),
            source_stamp_id: ssid,
            scheduler: scheduler.to_string(),
            dependencies: dependencies.to_vec(),
            reason: request.reason.clone(),
            external_id: request.external_id.clone(),
            properties: request.properties.clone(),
            fingerprint: request.fingerprint(),
            created_at: Utc::now(),
        };
        state.rows.push(row.clone());
        Ok(row)
    }

    async fn get_pending_requests(
        &self,
        ssid: SourceStampId,
        scheduler: &str,
    ) -> Result<Vec<PendingBuildsetRequest>> {
        Ok(lock(&self.state)
            .rows
            .iter()
            .filter(|r| r.source_stamp_id == ssid && r.scheduler == scheduler)
            .cloned()
            .collect())
    }

    async fn cancel_pending_requests(&self, ssid: SourceStampId, scheduler: &str) -> Result<u64> {
        let mut state = lock(&self.state);
        let before = state.rows.len();
        state
            .rows
            .retain(|r| !(r.source_stamp_id == ssid && r.scheduler == scheduler));
        Ok((before - state.rows.len()) as u64)
    }

    async fn delete_pending_request(&self, id: PendingRequestId) -> Result<bool> {
        let mut state = lock(&self.state);
        let before = state.rows.len();
        state.rows.retain(|r| r.id != id);
        Ok(state.rows.len() < before)
    }

    async fn list_pending_requests(&self, scheduler: &str) -> Result<Vec<PendingBuildsetRequest>> {
        Ok(lock(&self.state)
            .rows
            .iter()
            .filter(|r| r.scheduler == scheduler)
            .cloned()
            .collect())
    }

    async fn expire_pending_requests(
        &self,
        scheduler: &str,
        older_than: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = lock(&self.state);
        let before = state.rows.len();
        state
            .rows
            .retain(|r| !(r.scheduler == scheduler && r.created_at < older_than));
        Ok((before - state.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depchain_core::events::{BUILDSET_COMPLETED_PATTERN, BuildsetCompletedPayload, SourceStampCreatedPayload};
    use futures::StreamExt;

    #[tokio::test]
    async fn test_subscribe_filters_by_pattern() {
        let bus = MemoryEventBus::new();
        let mut stream = bus.subscribe(BUILDSET_COMPLETED_PATTERN).await.unwrap();

        bus.publish(Event::SourceStampCreated(SourceStampCreatedPayload {
            source_stamp_id: SourceStampId::new(1),
            branch: None,
            revision: None,
            created_at: Utc::now(),
        }))
        .await
        .unwrap();
        bus.publish(Event::BuildsetCompleted(BuildsetCompletedPayload {
            buildset_id: BuildsetId::new(9),
            source_stamp_id: SourceStampId::new(1),
            result: BuildResult::Success,
            completed_at: Utc::now(),
        }))
        .await
        .unwrap();

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.subject(), "buildset.completed.9");
        assert_eq!(bus.published().len(), 2);
    }

    #[tokio::test]
    async fn test_complete_twice_rejected() {
        let store = MemoryBuildStore::new();
        let buildset = store.seed_buildset(SourceStampId::new(1), "a", None, vec![]);

        store
            .complete_buildset(buildset.id, BuildResult::Failure)
            .await
            .unwrap();
        let err = store
            .complete_buildset(buildset.id, BuildResult::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BuildsetAlreadyComplete(_)));
    }

    #[tokio::test]
    async fn test_missing_properties_are_empty() {
        let store = MemoryBuildStore::new();
        let props = store.get_buildset_properties(BuildsetId::new(5)).await.unwrap();
        assert!(props.is_empty());
    }

    #[tokio::test]
    async fn test_pending_cancel_and_expire() {
        let store = MemoryPendingStore::new();
        let ssid = SourceStampId::new(1);
        let old = store
            .add_pending_request(ssid, "a", &[], &BuildRequest::new("first"))
            .await
            .unwrap();
        store
            .add_pending_request(ssid, "a", &[], &BuildRequest::new("second"))
            .await
            .unwrap();
        store
            .add_pending_request(ssid, "b", &[], &BuildRequest::new("other"))
            .await
            .unwrap();

        store.set_created_at(old.id, Utc::now() - chrono::Duration::days(30));
        let expired = store
            .expire_pending_requests("a", Utc::now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(expired, 1);

        assert_eq!(store.cancel_pending_requests(ssid, "a").await.unwrap(), 1);
        assert_eq!(store.cancel_pending_requests(ssid, "a").await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }
}
