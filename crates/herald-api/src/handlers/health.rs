//! Liveness endpoint.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use herald_core::Clock;
use serde::Serialize;

use crate::AppState;

/// `GET /health` body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the process answers.
    pub status: &'static str,
    /// Time of the check.
    pub timestamp: DateTime<Utc>,
    /// Crate version.
    pub version: &'static str,
    /// Start time of the most recent batch, if any ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_batch_at: Option<DateTime<Utc>>,
}

/// Reports liveness. Reads in-process state only; never touches storage.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let liveness = state.scheduler.health().await;
    Json(HealthResponse {
        status: if liveness.alive { "ok" } else { "unavailable" },
        timestamp: state.clock.now_utc(),
        version: env!("CARGO_PKG_VERSION"),
        last_batch_at: liveness.last_batch_at,
    })
}
