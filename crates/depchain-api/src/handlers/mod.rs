//! Request handlers organized by resource.

pub mod buildsets;
pub mod changes;
pub mod health;
pub mod schedulers;

use axum::http::StatusCode;
use depchain_core::Error;
use std::str::FromStr;

/// Map a scheduling error to an HTTP status and message.
pub fn error_response(err: Error) -> (StatusCode, String) {
    let status = match &err {
        Error::SchedulerNotFound(_) | Error::BuildsetNotFound(_) | Error::SourceStampNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        Error::DependencyFailed { .. } | Error::BuildsetAlreadyComplete(_) => StatusCode::CONFLICT,
        Error::Configuration(_) => StatusCode::BAD_REQUEST,
        Error::FanOutFailed { .. } => StatusCode::BAD_GATEWAY,
        Error::Database(_) | Error::EventBus(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

/// Parse an id path segment, answering 400 on failure.
pub fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, (StatusCode, String)> {
    raw.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("Invalid {}: {}", what, raw)))
}
