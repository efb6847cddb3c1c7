//! Change (commit) notifications.

use axum::{Json, extract::State, http::StatusCode};
use depchain_core::sourcestamp::NewSourceStamp;
use depchain_scheduler::CommitOutcome;
use std::sync::Arc;

use super::error_response;
use crate::state::AppState;

/// Record a new source stamp and fire the per-commit schedulers.
pub async fn create_change(
    State(state): State<Arc<AppState>>,
    Json(stamp): Json<NewSourceStamp>,
) -> Result<(StatusCode, Json<CommitOutcome>), (StatusCode, String)> {
    let outcome = state
        .schedulers
        .commit(stamp)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(outcome)))
}
