//! Events published by schedulers and the build-execution layer.

use crate::buildset::BuildResult;
use crate::ids::*;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Subject pattern matching every buildset completion.
pub const BUILDSET_COMPLETED_PATTERN: &str = "buildset.completed.>";

/// All events in the depchain system.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Source stamps
    SourceStampCreated(SourceStampCreatedPayload),

    // Pending requests
    PendingRequestAdded(PendingRequestAddedPayload),
    PendingRequestsCancelled(PendingRequestsCancelledPayload),

    // Buildset lifecycle
    BuildsetAdmitted(BuildsetAdmittedPayload),
    BuildsetCompleted(BuildsetCompletedPayload),

    // Resolution
    DependencyFailed(DependencyFailedPayload),
}

impl Event {
    /// Returns the NATS subject for this event.
    pub fn subject(&self) -> String {
        match self {
            Event::SourceStampCreated(p) => format!("sourcestamp.created.{}", p.source_stamp_id),
            Event::PendingRequestAdded(p) => format!(
                "pending.added.{}.{}",
                subject_token(&p.scheduler),
                p.source_stamp_id
            ),
            Event::PendingRequestsCancelled(p) => format!(
                "pending.cancelled.{}.{}",
                subject_token(&p.scheduler),
                p.source_stamp_id
            ),
            Event::BuildsetAdmitted(p) => format!(
                "buildset.admitted.{}.{}",
                subject_token(&p.scheduler),
                p.buildset_id
            ),
            Event::BuildsetCompleted(p) => format!("buildset.completed.{}", p.buildset_id),
            Event::DependencyFailed(p) => format!(
                "dependency.failed.{}.{}",
                subject_token(&p.scheduler),
                p.source_stamp_id
            ),
        }
    }
}

/// Make a scheduler name safe for use as a single subject token.
pub fn subject_token(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' | '\t' => '_',
            other => other,
        })
        .collect()
}

/// NATS-style subject matching: `*` matches one token, a trailing `>`
/// matches one or more.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    let mut pattern_tokens = pattern.split('.').peekable();

    while let Some(p) = pattern_tokens.next() {
        if p == ">" && pattern_tokens.peek().is_none() {
            return subject_tokens.next().is_some();
        }
        match subject_tokens.next() {
            Some(s) if p == "*" || p == s => continue,
            _ => return false,
        }
    }

    subject_tokens.next().is_none()
}

// === Source Stamp Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SourceStampCreatedPayload {
    pub source_stamp_id: SourceStampId,
    pub branch: Option<String>,
    pub revision: Option<String>,
    pub created_at: DateTime<Utc>,
}

// === Pending Request Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PendingRequestAddedPayload {
    pub request_id: PendingRequestId,
    pub source_stamp_id: SourceStampId,
    pub scheduler: String,
    pub reason: String,
    pub dependencies: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PendingRequestsCancelledPayload {
    pub source_stamp_id: SourceStampId,
    pub scheduler: String,
    pub cancelled: u64,
    pub cancelled_at: DateTime<Utc>,
}

// === Buildset Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BuildsetAdmittedPayload {
    pub buildset_id: BuildsetId,
    pub source_stamp_id: SourceStampId,
    pub scheduler: String,
    pub builder: String,
    pub reason: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BuildsetCompletedPayload {
    pub buildset_id: BuildsetId,
    pub source_stamp_id: SourceStampId,
    pub result: BuildResult,
    pub completed_at: DateTime<Utc>,
}

// === Resolution Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DependencyFailedPayload {
    pub source_stamp_id: SourceStampId,
    pub scheduler: String,
    pub failed_buildset_id: BuildsetId,
    pub failed_scheduler: Option<String>,
    pub result: Option<BuildResult>,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_subject_matches_pattern() {
        let event = Event::BuildsetCompleted(BuildsetCompletedPayload {
            buildset_id: BuildsetId::new(7),
            source_stamp_id: SourceStampId::new(42),
            result: BuildResult::Success,
            completed_at: Utc::now(),
        });
        assert_eq!(event.subject(), "buildset.completed.7");
        assert!(subject_matches(BUILDSET_COMPLETED_PATTERN, &event.subject()));
    }

    #[test]
    fn test_subject_wildcards() {
        assert!(subject_matches("buildset.*.7", "buildset.completed.7"));
        assert!(!subject_matches("buildset.*", "buildset.completed.7"));
        assert!(!subject_matches("buildset.>", "buildset"));
        assert!(subject_matches("pending.added.compile.42", "pending.added.compile.42"));
        assert!(!subject_matches("pending.added.compile", "pending.added.compile.42"));
    }

    #[test]
    fn test_scheduler_names_are_sanitized() {
        assert_eq!(subject_token("Perf.Linux x64"), "Perf_Linux_x64");
    }

    #[test]
    fn test_event_tagged_serialization() {
        let event = Event::PendingRequestsCancelled(PendingRequestsCancelledPayload {
            source_stamp_id: SourceStampId::new(1),
            scheduler: "test".to_string(),
            cancelled: 2,
            cancelled_at: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "pending_requests_cancelled");
        assert_eq!(json["cancelled"], 2);
    }
}
