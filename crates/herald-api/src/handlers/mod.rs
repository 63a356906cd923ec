//! Control plane handlers.
//!
//! Every error body has the shape `{"error": <code>, "message": <text>}`.

pub mod health;
pub mod process;
pub mod stats;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub use health::health_check;
pub use process::process_batch;
pub use stats::stats;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code.
    pub error: &'static str,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub(crate) fn error_response(
    status: StatusCode,
    error: &'static str,
    message: Option<String>,
) -> Response {
    (status, Json(ErrorResponse { error, message })).into_response()
}

/// Fallback for unknown routes.
pub async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not_found", None)
}
