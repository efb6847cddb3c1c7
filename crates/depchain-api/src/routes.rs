//! API route definitions.

use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{buildsets, changes, health, schedulers};
use crate::middleware::{cors_layer, request_id};
use crate::state::AppState;

/// Create the main API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .layer(middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/changes", post(changes::create_change))
        .nest("/schedulers", scheduler_routes())
        .route("/buildsets/{id}", get(buildsets::get_buildset))
        .route("/buildsets/{id}/complete", post(buildsets::complete_buildset))
        .route(
            "/sourcestamps/{ssid}/buildsets",
            get(buildsets::list_for_source_stamp),
        )
        .route("/pending/expire", post(schedulers::expire_pending))
        .route("/reconcile", post(schedulers::reconcile))
}

fn scheduler_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(schedulers::list_schedulers))
        .route("/{name}/requests", post(schedulers::request_build))
        .route("/{name}/pending", get(schedulers::list_pending))
        .route(
            "/{name}/pending/{ssid}",
            get(schedulers::get_pending).delete(schedulers::cancel_pending),
        )
}
