//! Error types for depchain.

use crate::buildset::Buildset;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Scheduling errors
    #[error("Dependency failed for scheduler {scheduler}: buildset {} completed with {}", .buildset.id, .buildset.result_label())]
    DependencyFailed {
        scheduler: String,
        buildset: Box<Buildset>,
    },

    #[error("Scheduler not found: {0}")]
    SchedulerNotFound(String),

    #[error("Scheduler {scheduler} failed to trigger {}: {message}", .failed.join(", "))]
    FanOutFailed {
        scheduler: String,
        failed: Vec<String>,
        message: String,
    },

    #[error("Invalid scheduler configuration: {0}")]
    Configuration(String),

    // Store errors
    #[error("Buildset not found: {0}")]
    BuildsetNotFound(String),

    #[error("Buildset already complete: {0}")]
    BuildsetAlreadyComplete(String),

    #[error("Source stamp not found: {0}")]
    SourceStampNotFound(String),

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error was caused by an unavailable backing store or bus.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::Database(_) | Error::EventBus(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
