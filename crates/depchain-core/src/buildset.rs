//! Buildset types.

use crate::ids::{BuildsetId, SourceStampId};
use crate::properties::Properties;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A build attempt for one scheduler against one source stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Buildset {
    pub id: BuildsetId,
    pub source_stamp_id: SourceStampId,
    pub reason: String,
    pub external_id: Option<String>,
    pub builder: String,
    pub complete: bool,
    pub result: Option<BuildResult>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Buildset {
    /// Complete with a result that satisfies dependents.
    pub fn is_satisfied(&self) -> bool {
        self.complete && self.result.is_some_and(|r| r.is_satisfied())
    }

    /// Complete with a result that fails dependents.
    pub fn is_failed(&self) -> bool {
        self.complete && !self.result.is_some_and(|r| r.is_satisfied())
    }

    pub fn result_label(&self) -> &'static str {
        match (self.complete, self.result) {
            (false, _) => "incomplete",
            (true, None) => "unknown",
            (true, Some(r)) => r.as_str(),
        }
    }
}

/// A buildset together with its property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BuildsetWithProperties {
    #[serde(flatten)]
    pub buildset: Buildset,
    pub properties: Properties,
}

/// Result code of a completed buildset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BuildResult {
    Success,
    Warnings,
    Failure,
    Skipped,
    Exception,
    Retry,
    Cancelled,
}

impl BuildResult {
    /// Success and warnings satisfy a dependency; everything else fails it.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, BuildResult::Success | BuildResult::Warnings)
    }

    /// Stable integer code used by the buildset tables.
    pub fn code(&self) -> i32 {
        match self {
            BuildResult::Success => 0,
            BuildResult::Warnings => 1,
            BuildResult::Failure => 2,
            BuildResult::Skipped => 3,
            BuildResult::Exception => 4,
            BuildResult::Retry => 5,
            BuildResult::Cancelled => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(BuildResult::Success),
            1 => Some(BuildResult::Warnings),
            2 => Some(BuildResult::Failure),
            3 => Some(BuildResult::Skipped),
            4 => Some(BuildResult::Exception),
            5 => Some(BuildResult::Retry),
            6 => Some(BuildResult::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildResult::Success => "success",
            BuildResult::Warnings => "warnings",
            BuildResult::Failure => "failure",
            BuildResult::Skipped => "skipped",
            BuildResult::Exception => "exception",
            BuildResult::Retry => "retry",
            BuildResult::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildResult {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(BuildResult::Success),
            "warnings" => Ok(BuildResult::Warnings),
            "failure" => Ok(BuildResult::Failure),
            "skipped" => Ok(BuildResult::Skipped),
            "exception" => Ok(BuildResult::Exception),
            "retry" => Ok(BuildResult::Retry),
            "cancelled" => Ok(BuildResult::Cancelled),
            other => Err(format!("Unknown build result: {}", other)),
        }
    }
}
