//! Event and worker counters.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use herald_core::{Clock, StatusCounts};
use herald_delivery::WorkerStats;
use serde::Serialize;
use tracing::error;

use super::error_response;
use crate::AppState;

/// `GET /stats` body.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Events per status, from storage.
    pub stats: StatusCounts,
    /// Counters of this process since start.
    pub worker: WorkerStats,
    /// Time of the read.
    pub timestamp: DateTime<Utc>,
}

/// Returns event counts per status plus in-process worker counters.
pub async fn stats(State(state): State<AppState>) -> Response {
    match state.scheduler.stats().await {
        Ok(stats) => {
            let response = StatsResponse {
                stats,
                worker: state.scheduler.worker_stats().await,
                timestamp: state.clock.now_utc(),
            };
            (StatusCode::OK, Json(response)).into_response()
        },
        Err(e) => {
            error!(error = %e, "failed to read status counts");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "stats_unavailable", Some(e.to_string()))
        },
    }
}
