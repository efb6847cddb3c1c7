//! Source stamp types.

use crate::ids::SourceStampId;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A specific revision of the code to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceStamp {
    pub id: SourceStampId,
    pub branch: Option<String>,
    pub revision: Option<String>,
    pub repository: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for a source stamp about to be recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NewSourceStamp {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

impl NewSourceStamp {
    pub fn new(branch: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            revision: Some(revision.into()),
            repository: None,
        }
    }
}
