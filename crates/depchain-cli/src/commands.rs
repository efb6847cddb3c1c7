//! CLI command definitions.

use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler daemon and HTTP API
    Serve {
        /// Daemon configuration file
        #[arg(short, long, default_value = "depchain.yaml")]
        config: PathBuf,

        /// Keep every store in process memory
        #[arg(long)]
        memory: bool,

        /// Address to listen on
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate a scheduler configuration
    Validate {
        /// Path to scheduler file
        #[arg(default_value = "schedulers.yaml")]
        path: PathBuf,
    },

    /// Print the JSON schema of a configuration file
    Schema {
        #[arg(value_enum, default_value_t = SchemaKind::Schedulers)]
        kind: SchemaKind,
    },

    /// List configured schedulers
    Schedulers,

    /// Request a build from a scheduler
    Request {
        /// Scheduler name
        scheduler: String,

        /// Source stamp ID
        ssid: String,

        /// Reason recorded on the buildset
        #[arg(short, long, default_value = "requested from cli")]
        reason: String,

        /// External ID recorded on the buildset
        #[arg(long)]
        external_id: Option<String>,

        /// Build property as NAME=VALUE; VALUE is parsed as JSON when possible
        #[arg(short, long = "property")]
        properties: Vec<String>,
    },

    /// Show pending requests of a scheduler
    Pending {
        /// Scheduler name
        scheduler: String,

        /// Restrict to one source stamp
        #[arg(long)]
        ssid: Option<String>,
    },

    /// Cancel pending requests of a scheduler for a source stamp
    Cancel {
        /// Scheduler name
        scheduler: String,

        /// Source stamp ID
        ssid: String,
    },

    /// Report a buildset's result
    Complete {
        /// Buildset ID
        buildset_id: String,

        /// Build result
        #[arg(value_enum)]
        result: ResultArg,
    },

    /// Record a commit and fire per-commit schedulers
    Commit {
        /// Revision identifier
        revision: String,

        #[arg(short, long, default_value = "main")]
        branch: String,

        #[arg(long)]
        repository: Option<String>,
    },

    /// Delete pending requests older than the given age
    Expire {
        /// Age in seconds
        #[arg(long)]
        older_than: u64,
    },

    /// Re-evaluate every pending request
    Reconcile,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SchemaKind {
    Schedulers,
    Daemon,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ResultArg {
    Success,
    Warnings,
    Failure,
    Skipped,
    Exception,
    Retry,
    Cancelled,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
