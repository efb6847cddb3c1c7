//! Scheduler handlers: build requests, pending requests and maintenance.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use depchain_core::buildset::Buildset;
use depchain_core::ids::SourceStampId;
use depchain_core::pending::{BuildRequest, PendingBuildsetRequest};
use depchain_scheduler::{Admission, ReconcileSummary, SchedulerSpec, SchedulerState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{error_response, parse_id};
use crate::state::AppState;

#[derive(Serialize)]
pub struct SchedulerResponse {
    pub name: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub builder: Option<String>,
    /// Dependencies of a chain scheduler, or targets of a fan-out one.
    pub upstream: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SchedulerState>,
}

#[derive(Serialize)]
pub struct ListSchedulersResponse {
    pub schedulers: Vec<SchedulerResponse>,
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub ssid: String,
    #[serde(flatten)]
    pub request: BuildRequest,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Admitted,
    Waiting,
    Idle,
    /// Forwarded by a fan-out scheduler.
    Triggered,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub scheduler: String,
    pub ssid: SourceStampId,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buildsets: Vec<Buildset>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unmet: Vec<String>,
}

#[derive(Serialize)]
pub struct PendingResponse {
    pub scheduler: String,
    pub pending: Vec<PendingBuildsetRequest>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub cancelled: u64,
}

#[derive(Deserialize)]
pub struct ExpireRequest {
    pub older_than_secs: u64,
}

#[derive(Serialize)]
pub struct ExpireResponse {
    pub expired: u64,
}

pub async fn list_schedulers(State(state): State<Arc<AppState>>) -> Json<ListSchedulersResponse> {
    let mut schedulers = Vec::new();
    for name in state.schedulers.names() {
        let Some(spec) = state.schedulers.spec(name) else {
            continue;
        };
        let builder = match spec {
            SchedulerSpec::Chain(chain) => Some(chain.builder.clone()),
            _ => None,
        };
        let scheduler_state = match state.schedulers.chain(name) {
            Ok(chain) => Some(chain.state().await),
            Err(_) => None,
        };
        schedulers.push(SchedulerResponse {
            name: name.clone(),
            kind: spec.kind().to_string(),
            builder,
            upstream: spec.upstream().to_vec(),
            state: scheduler_state,
        });
    }

    Json(ListSchedulersResponse { schedulers })
}

/// Request a build. Chain schedulers report their admission decision;
/// fan-out schedulers only forward the request.
pub async fn request_build(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(submit): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), (StatusCode, String)> {
    let ssid: SourceStampId = parse_id(&submit.ssid, "source stamp ID")?;
    let schedulers = &state.schedulers;

    let mut response = SubmitResponse {
        scheduler: name.clone(),
        ssid,
        outcome: Outcome::Triggered,
        buildsets: vec![],
        unmet: vec![],
    };

    match schedulers.chain(&name) {
        Ok(chain) => match chain.submit(ssid, &submit.request).await.map_err(error_response)? {
            Admission::Admitted(buildsets) => {
                response.outcome = Outcome::Admitted;
                response.buildsets = buildsets;
            }
            Admission::Waiting { unmet, .. } => {
                response.outcome = Outcome::Waiting;
                response.unmet = unmet;
            }
            Admission::Idle => response.outcome = Outcome::Idle,
        },
        Err(_) => {
            schedulers
                .request_build(&name, ssid, submit.request)
                .await
                .map_err(error_response)?;
        }
    }

    let status = match response.outcome {
        Outcome::Admitted => StatusCode::CREATED,
        _ => StatusCode::ACCEPTED,
    };
    Ok((status, Json(response)))
}

pub async fn list_pending(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<PendingResponse>, (StatusCode, String)> {
    let pending = state
        .schedulers
        .list_pending(&name)
        .await
        .map_err(error_response)?;

    Ok(Json(PendingResponse {
        scheduler: name,
        total: pending.len(),
        pending,
    }))
}

pub async fn get_pending(
    State(state): State<Arc<AppState>>,
    Path((name, ssid)): Path<(String, String)>,
) -> Result<Json<PendingResponse>, (StatusCode, String)> {
    let ssid: SourceStampId = parse_id(&ssid, "source stamp ID")?;
    let pending = state
        .schedulers
        .pending(&name, ssid)
        .await
        .map_err(error_response)?;

    Ok(Json(PendingResponse {
        scheduler: name,
        total: pending.len(),
        pending,
    }))
}

pub async fn cancel_pending(
    State(state): State<Arc<AppState>>,
    Path((name, ssid)): Path<(String, String)>,
) -> Result<Json<CancelResponse>, (StatusCode, String)> {
    let ssid: SourceStampId = parse_id(&ssid, "source stamp ID")?;
    let cancelled = state
        .schedulers
        .cancel(&name, ssid)
        .await
        .map_err(error_response)?;

    Ok(Json(CancelResponse { cancelled }))
}

pub async fn expire_pending(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExpireRequest>,
) -> Result<Json<ExpireResponse>, (StatusCode, String)> {
    let expired = state
        .schedulers
        .expire_pending(Duration::from_secs(request.older_than_secs))
        .await
        .map_err(error_response)?;

    Ok(Json(ExpireResponse { expired }))
}

pub async fn reconcile(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReconcileSummary>, (StatusCode, String)> {
    let summary = state
        .schedulers
        .reconcile()
        .await
        .map_err(error_response)?;

    Ok(Json(summary))
}
