//! Dependency-chain build scheduling for depchain.
//!
//! A [`DependencyChainScheduler`] admits a buildset for a source stamp only
//! once every scheduler it depends on has a successful buildset for the same
//! stamp, launching missing dependencies itself. Fan-out schedulers
//! ([`PerCommitScheduler`], [`NightlyScheduler`]) forward one trigger to a
//! static list of targets.

pub mod chain;
pub mod config;
pub mod dag;
pub mod memory;
pub mod notifier;
pub mod resolver;
pub mod scheduler;
pub mod triggers;

pub use chain::{Admission, AdmissionMode, ChainOptions, DependencyChainScheduler};
pub use config::{ChainSpec, NightlySpec, PerCommitSpec, SchedulerConfig, SchedulerSpec};
pub use dag::{GraphError, SchedulerGraph};
pub use notifier::{ReconcileSummary, SchedulerState};
pub use resolver::{DependencyResolver, Resolution};
pub use scheduler::{CommitOutcome, SchedulerPorts, SchedulerSet};
pub use triggers::{NightlyScheduler, PerCommitScheduler};
