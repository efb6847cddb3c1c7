//! Fan-out schedulers: per-commit and nightly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depchain_core::ids::SourceStampId;
use depchain_core::pending::BuildRequest;
use depchain_core::ports::{BuildTrigger, SourceStampRepository};
use depchain_core::{Error, Result};
use futures::future::join_all;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Forward one request to every target concurrently. A single failure is
/// returned as-is; several are collected into [`Error::FanOutFailed`].
pub async fn fan_out(
    name: &str,
    targets: &[Arc<dyn BuildTrigger>],
    ssid: SourceStampId,
    request: &BuildRequest,
) -> Result<()> {
    let results = join_all(
        targets
            .iter()
            .map(|target| target.request_build(ssid, request.clone())),
    )
    .await;

    let mut failures: Vec<(String, Error)> = targets
        .iter()
        .zip(results)
        .filter_map(|(target, result)| result.err().map(|e| (target.name().to_string(), e)))
        .collect();

    match failures.len() {
        0 => {
            debug!(scheduler = name, ssid = %ssid, targets = targets.len(), "Fan-out complete");
            Ok(())
        }
        1 => {
            let (target, err) = failures.remove(0);
            warn!(scheduler = name, ssid = %ssid, target = %target, error = %err, "Fan-out target failed");
            Err(err)
        }
        _ => {
            let message = failures
                .iter()
                .map(|(target, e)| format!("{}: {}", target, e))
                .collect::<Vec<_>>()
                .join("; ");
            warn!(scheduler = name, ssid = %ssid, failed = failures.len(), "Fan-out targets failed");
            Err(Error::FanOutFailed {
                scheduler: name.to_string(),
                failed: failures.into_iter().map(|(target, _)| target).collect(),
                message,
            })
        }
    }
}

/// Triggers its targets for every commit on a matching branch.
pub struct PerCommitScheduler {
    name: String,
    branches: Vec<String>,
    targets: Vec<Arc<dyn BuildTrigger>>,
}

impl PerCommitScheduler {
    pub fn new(
        name: impl Into<String>,
        branches: Vec<String>,
        targets: Vec<Arc<dyn BuildTrigger>>,
    ) -> Self {
        Self {
            name: name.into(),
            branches,
            targets,
        }
    }

    /// Empty patterns match every branch.
    pub fn matches_branch(&self, branch: &str) -> bool {
        if self.branches.is_empty() {
            return true;
        }
        self.branches.iter().any(|p| glob_match(p, branch))
    }

    pub fn target_names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.name().to_string()).collect()
    }
}

#[async_trait]
impl BuildTrigger for PerCommitScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request_build(&self, ssid: SourceStampId, request: BuildRequest) -> Result<()> {
        info!(scheduler = %self.name, ssid = %ssid, reason = %request.reason, "Fanning out commit");
        fan_out(&self.name, &self.targets, ssid, &request).await
    }
}

/// Triggers its targets with the newest source stamp on a cron schedule.
pub struct NightlyScheduler {
    name: String,
    schedule: cron::Schedule,
    branch: Option<String>,
    targets: Vec<Arc<dyn BuildTrigger>>,
    source_stamps: Arc<dyn SourceStampRepository>,
}

impl NightlyScheduler {
    pub fn new(
        name: impl Into<String>,
        cron_expr: &str,
        branch: Option<String>,
        targets: Vec<Arc<dyn BuildTrigger>>,
        source_stamps: Arc<dyn SourceStampRepository>,
    ) -> Result<Self> {
        let name = name.into();
        let schedule = cron::Schedule::from_str(cron_expr).map_err(|e| {
            Error::Configuration(format!("Invalid cron expression for {}: {}", name, e))
        })?;
        Ok(Self {
            name,
            schedule,
            branch,
            targets,
            source_stamps,
        })
    }

    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Trigger the targets with the newest source stamp. Returns `None` if
    /// there is nothing to build.
    pub async fn fire(&self) -> Result<Option<SourceStampId>> {
        let Some(stamp) = self.source_stamps.latest(self.branch.as_deref()).await? else {
            info!(scheduler = %self.name, branch = ?self.branch, "No source stamp to build");
            return Ok(None);
        };

        let request = BuildRequest::new(format!("scheduler {} fired", self.name));
        info!(scheduler = %self.name, ssid = %stamp.id, revision = ?stamp.revision, "Nightly fire");
        fan_out(&self.name, &self.targets, stamp.id, &request).await?;
        Ok(Some(stamp.id))
    }

    /// Fire on schedule until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(scheduler = %self.name, "Starting nightly scheduler");

        loop {
            let now = Utc::now();
            let Some(next) = self.next_fire_after(now) else {
                warn!(scheduler = %self.name, "Cron schedule has no upcoming fire time");
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(scheduler = %self.name, next = %next, "Next fire scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.fire().await {
                        error!(scheduler = %self.name, error = %e, "Nightly fire failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(scheduler = %self.name, "Nightly scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl BuildTrigger for NightlyScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request_build(&self, ssid: SourceStampId, request: BuildRequest) -> Result<()> {
        fan_out(&self.name, &self.targets, ssid, &request).await
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return text.starts_with(prefix);
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        let prefix_slash = format!("{}/", prefix);
        if text.starts_with(&prefix_slash) {
            return !text[prefix_slash.len()..].contains('/');
        }
        return false;
    }
    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 2 {
            return text.starts_with(parts[0]) && text.ends_with(parts[1]);
        }
    }
    pattern == text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBuildStore;
    use depchain_core::sourcestamp::NewSourceStamp;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTrigger {
        name: String,
        fail: bool,
        calls: Mutex<Vec<(SourceStampId, String)>>,
    }

    impl RecordingTrigger {
        fn new(name: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail,
                ..Default::default()
            })
        }

        fn calls(&self) -> Vec<(SourceStampId, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BuildTrigger for RecordingTrigger {
        fn name(&self) -> &str {
            &self.name
        }

        async fn request_build(&self, ssid: SourceStampId, request: BuildRequest) -> Result<()> {
            self.calls.lock().unwrap().push((ssid, request.reason));
            if self.fail {
                Err(Error::Internal(format!("{} refused", self.name)))
            } else {
                Ok(())
            }
        }
    }

    fn as_targets(targets: &[Arc<RecordingTrigger>]) -> Vec<Arc<dyn BuildTrigger>> {
        targets
            .iter()
            .map(|t| t.clone() as Arc<dyn BuildTrigger>)
            .collect()
    }

    #[test]
    fn test_branch_match_glob() {
        let scheduler = PerCommitScheduler::new(
            "commits",
            vec!["main".to_string(), "release/*".to_string()],
            vec![],
        );
        assert!(scheduler.matches_branch("main"));
        assert!(scheduler.matches_branch("release/1.0"));
        assert!(!scheduler.matches_branch("release/1.0/hotfix"));
        assert!(!scheduler.matches_branch("develop"));
    }

    #[test]
    fn test_empty_patterns_match_all() {
        let scheduler = PerCommitScheduler::new("commits", vec![], vec![]);
        assert!(scheduler.matches_branch("anything"));
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_target() {
        let targets = vec![
            RecordingTrigger::new("a", false),
            RecordingTrigger::new("b", false),
        ];
        let scheduler = PerCommitScheduler::new("commits", vec![], as_targets(&targets));

        scheduler
            .request_build(SourceStampId::new(7), BuildRequest::new("commit"))
            .await
            .unwrap();
        for target in &targets {
            assert_eq!(target.calls(), vec![(SourceStampId::new(7), "commit".to_string())]);
        }
    }

    #[tokio::test]
    async fn test_single_failure_is_returned_unchanged() {
        let targets = vec![
            RecordingTrigger::new("a", false),
            RecordingTrigger::new("b", true),
        ];
        let err = fan_out(
            "commits",
            &as_targets(&targets),
            SourceStampId::new(7),
            &BuildRequest::new("commit"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Internal(msg) if msg == "b refused"));
        assert_eq!(targets[0].calls().len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_failures_are_aggregated() {
        let targets = vec![
            RecordingTrigger::new("a", true),
            RecordingTrigger::new("b", false),
            RecordingTrigger::new("c", true),
        ];
        let err = fan_out(
            "commits",
            &as_targets(&targets),
            SourceStampId::new(7),
            &BuildRequest::new("commit"),
        )
        .await
        .unwrap_err();

        match err {
            Error::FanOutFailed { scheduler, failed, .. } => {
                assert_eq!(scheduler, "commits");
                assert_eq!(failed, vec!["a".to_string(), "c".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(targets[1].calls().len(), 1);
    }

    #[tokio::test]
    async fn test_nightly_fires_latest_stamp_on_branch() {
        let store = Arc::new(MemoryBuildStore::new());
        let older = store
            .create(&NewSourceStamp::new("main", "abc"))
            .await
            .unwrap();
        store
            .create(&NewSourceStamp::new("develop", "def"))
            .await
            .unwrap();
        assert_eq!(older.id, SourceStampId::new(1));

        let target = RecordingTrigger::new("compile", false);
        let nightly = NightlyScheduler::new(
            "nightly",
            "0 0 3 * * *",
            Some("main".to_string()),
            as_targets(&[target.clone()]),
            store,
        )
        .unwrap();

        let fired = nightly.fire().await.unwrap();
        assert_eq!(fired, Some(older.id));
        assert_eq!(
            target.calls(),
            vec![(older.id, "scheduler nightly fired".to_string())]
        );
    }

    #[tokio::test]
    async fn test_nightly_without_stamp_does_nothing() {
        let target = RecordingTrigger::new("compile", false);
        let nightly = NightlyScheduler::new(
            "nightly",
            "0 0 3 * * *",
            None,
            as_targets(&[target.clone()]),
            Arc::new(MemoryBuildStore::new()),
        )
        .unwrap();

        assert_eq!(nightly.fire().await.unwrap(), None);
        assert!(target.calls().is_empty());
    }

    #[test]
    fn test_next_fire_time() {
        let nightly = NightlyScheduler::new(
            "nightly",
            "0 0 3 * * *",
            None,
            vec![],
            Arc::new(MemoryBuildStore::new()),
        )
        .unwrap();
        let after = "2024-05-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let next = nightly.next_fire_after(after).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-05-02T03:00:00+00:00");
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let result = NightlyScheduler::new(
            "nightly",
            "tonight",
            None,
            vec![],
            Arc::new(MemoryBuildStore::new()),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
