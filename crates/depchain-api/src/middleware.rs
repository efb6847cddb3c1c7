//! HTTP middleware for the API server.

use axum::{
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware::Next,
    response::Response,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tower_http::cors::{Any, CorsLayer};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Create CORS middleware layer.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_origin(Any)
}

/// Tag each request and its response with `x-request-id`, keeping one the
/// client already sent.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response {
    let request_id = match request.headers().get("x-request-id") {
        Some(value) => value.clone(),
        None => HeaderValue::from(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)),
    };
    request
        .headers_mut()
        .insert("x-request-id", request_id.clone());

    let mut response = next.run(request).await;
    response.headers_mut().insert("x-request-id", request_id);

    response
}
