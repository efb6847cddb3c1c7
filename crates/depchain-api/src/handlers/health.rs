//! Health check handlers.

use axum::{Json, extract::State, http::StatusCode};
use depchain_scheduler::SchedulerState;
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub schedulers_running: usize,
    pub schedulers_stopped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_bus: Option<String>,
}

/// Ready once every chain scheduler is listening and the event bus is
/// operational.
pub async fn ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadyResponse>) {
    let mut running = 0;
    let mut stopped = 0;
    for chain in state.schedulers.chains() {
        match chain.state().await {
            SchedulerState::Running => running += 1,
            SchedulerState::Stopped => stopped += 1,
        }
    }

    let bus = state.nats.as_ref().map(|nats| nats.health_check().status);
    let bus_ok = bus.as_ref().is_none_or(|status| status.is_operational());

    let ready = stopped == 0 && bus_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            ready,
            schedulers_running: running,
            schedulers_stopped: stopped,
            event_bus: bus.map(|status| status.label().to_string()),
        }),
    )
}
