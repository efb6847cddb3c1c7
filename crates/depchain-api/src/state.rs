//! Application state shared across handlers.

use depchain_nats::NatsEventBus;
use depchain_scheduler::SchedulerSet;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub schedulers: Arc<SchedulerSet>,
    /// Present when events go through NATS; reported by the readiness probe.
    pub nats: Option<NatsEventBus>,
}

impl AppState {
    pub fn new(schedulers: Arc<SchedulerSet>) -> Self {
        Self {
            schedulers,
            nats: None,
        }
    }

    pub fn with_nats(mut self, nats: NatsEventBus) -> Self {
        self.nats = Some(nats);
        self
    }
}
