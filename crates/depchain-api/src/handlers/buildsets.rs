//! Buildset handlers, including the build-execution completion callback.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use depchain_core::buildset::{BuildResult, Buildset, BuildsetWithProperties};
use depchain_core::ids::{BuildsetId, SourceStampId};
use depchain_core::ports::BuildsetStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{error_response, parse_id};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CompleteBuildsetRequest {
    pub result: BuildResult,
}

#[derive(Serialize)]
pub struct ListBuildsetsResponse {
    pub buildsets: Vec<BuildsetWithProperties>,
    pub total: usize,
}

pub async fn get_buildset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BuildsetWithProperties>, (StatusCode, String)> {
    let id: BuildsetId = parse_id(&id, "buildset ID")?;
    let store = &state.schedulers.ports().buildsets;

    let buildset = store
        .get_buildset(id)
        .await
        .map_err(error_response)?
        .ok_or((StatusCode::NOT_FOUND, "Buildset not found".to_string()))?;
    let properties = store
        .get_buildset_properties(id)
        .await
        .map_err(error_response)?;

    Ok(Json(BuildsetWithProperties {
        buildset,
        properties,
    }))
}

/// Mark a buildset complete; dependents waiting on it are re-evaluated.
pub async fn complete_buildset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<CompleteBuildsetRequest>,
) -> Result<Json<Buildset>, (StatusCode, String)> {
    let id: BuildsetId = parse_id(&id, "buildset ID")?;

    let buildset = state
        .schedulers
        .complete_buildset(id, request.result)
        .await
        .map_err(error_response)?;

    Ok(Json(buildset))
}

pub async fn list_for_source_stamp(
    State(state): State<Arc<AppState>>,
    Path(ssid): Path<String>,
) -> Result<Json<ListBuildsetsResponse>, (StatusCode, String)> {
    let ssid: SourceStampId = parse_id(&ssid, "source stamp ID")?;
    let store = &state.schedulers.ports().buildsets;

    let mut buildsets = Vec::new();
    for buildset in store
        .get_buildsets_for_source_stamp(ssid)
        .await
        .map_err(error_response)?
    {
        let properties = store
            .get_buildset_properties(buildset.id)
            .await
            .map_err(error_response)?;
        buildsets.push(BuildsetWithProperties {
            buildset,
            properties,
        });
    }

    Ok(Json(ListBuildsetsResponse {
        total: buildsets.len(),
        buildsets,
    }))
}
