//! Scheduler configuration.
//!
//! Schedulers are declared in a YAML file:
//!
//! ```yaml
//! propagated_properties: [got_revision]
//! pending_ttl_secs: 604800
//! schedulers:
//!   - kind: chain
//!     name: update
//!     builder: Update-Scripts
//!   - kind: chain
//!     name: compile
//!     builder: Build-Compile
//!     dependencies: [update]
//!   - kind: per_commit
//!     name: main-commits
//!     branches: [main]
//!     targets: [compile]
//!   - kind: nightly
//!     name: nightly
//!     cron: "0 0 3 * * *"
//!     branch: main
//!     targets: [compile]
//! ```

use depchain_core::properties::PropertyMap;
use depchain_core::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SchedulerConfig {
    /// Properties copied from satisfied dependencies into admitted buildsets.
    #[serde(default = "default_propagated_properties")]
    pub propagated_properties: Vec<String>,
    /// Pending requests older than this are expired during reconciliation.
    #[serde(default)]
    pub pending_ttl_secs: Option<u64>,
    #[serde(default)]
    pub schedulers: Vec<SchedulerSpec>,
}

fn default_propagated_properties() -> Vec<String> {
    vec!["got_revision".to_string()]
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            propagated_properties: default_propagated_properties(),
            pending_ttl_secs: None,
            schedulers: vec![],
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| Error::Configuration(e.to_string()))
    }

    pub fn pending_ttl(&self) -> Option<Duration> {
        self.pending_ttl_secs.map(Duration::from_secs)
    }
}

/// One declared scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerSpec {
    Chain(ChainSpec),
    PerCommit(PerCommitSpec),
    Nightly(NightlySpec),
}

impl SchedulerSpec {
    pub fn name(&self) -> &str {
        match self {
            SchedulerSpec::Chain(s) => &s.name,
            SchedulerSpec::PerCommit(s) => &s.name,
            SchedulerSpec::Nightly(s) => &s.name,
        }
    }

    /// Schedulers that must be constructed before this one.
    pub fn upstream(&self) -> &[String] {
        match self {
            SchedulerSpec::Chain(s) => &s.dependencies,
            SchedulerSpec::PerCommit(s) => &s.targets,
            SchedulerSpec::Nightly(s) => &s.targets,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerSpec::Chain(_) => "chain",
            SchedulerSpec::PerCommit(_) => "per_commit",
            SchedulerSpec::Nightly(_) => "nightly",
        }
    }
}

/// A scheduler that builds one builder once its dependencies succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChainSpec {
    pub name: String,
    pub builder: String,
    /// Names of chain schedulers that must succeed first, in merge order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Properties every admitted buildset inherits.
    #[serde(default)]
    pub properties: PropertyMap,
    /// Drop pending requests when a dependency fails.
    #[serde(default)]
    pub cancel_on_dependency_failure: bool,
}

/// Fans every matching commit out to its targets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PerCommitSpec {
    pub name: String,
    /// Branch patterns; empty matches every branch.
    #[serde(default)]
    pub branches: Vec<String>,
    pub targets: Vec<String>,
}

/// Fans the newest source stamp of a branch out on a cron schedule.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NightlySpec {
    pub name: String,
    /// Cron expression with a seconds field, e.g. `0 0 3 * * *`.
    pub cron: String,
    #[serde(default)]
    pub branch: Option<String>,
    pub targets: Vec<String>,
}
