//! Manual batch trigger.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use herald_core::Clock;
use herald_delivery::BatchSummary;
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use super::error_response;
use crate::AppState;

/// Optional query parameters for `POST /process`.
#[derive(Debug, Default, Deserialize)]
pub struct ProcessParams {
    /// Overrides the configured batch size for this call.
    pub limit: Option<usize>,
}

/// `POST /process` body.
#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    /// Human-readable summary line.
    pub message: String,
    /// When the batch finished.
    pub timestamp: DateTime<Utc>,
    /// Per-outcome counts.
    pub summary: BatchSummary,
}

/// Runs one batch and reports what happened.
///
/// Returns `500 {error: "processing_failed"}` only when the claim itself
/// fails; per-event failures are part of the summary.
#[instrument(name = "process_batch", skip(state))]
pub async fn process_batch(
    State(state): State<AppState>,
    Query(params): Query<ProcessParams>,
) -> Response {
    if params.limit == Some(0) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_limit",
            Some("limit must be greater than 0".to_string()),
        );
    }

    match state.scheduler.process_batch(params.limit).await {
        Ok(summary) => {
            let response = ProcessResponse {
                message: format!("Processed {} events", summary.claimed),
                timestamp: state.clock.now_utc(),
                summary,
            };
            (StatusCode::OK, Json(response)).into_response()
        },
        Err(e) => {
            error!(error = %e, "batch trigger failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "processing_failed",
                Some(e.to_string()),
            )
        },
    }
}
