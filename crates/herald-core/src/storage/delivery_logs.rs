//! Append-only delivery attempt log.
//!
//! Rows are consumed by observability tooling. The worker never reads them,
//! apart from [`Repository::count_for_event`] which exists for tests and
//! operators.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{DeliveryAttemptLog, EventId},
};

/// Delivery attempt log persistence.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Appends one attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(&self, log: &DeliveryAttemptLog) -> Result<Uuid> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO delivery_attempt_logs (
                id, event_id, webhook_id, organization_id, attempt_number,
                status_code, response_body, error_message, duration_ms,
                succeeded, attempted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(log.id)
        .bind(log.event_id)
        .bind(log.webhook_id)
        .bind(log.organization_id)
        .bind(log.attempt_number)
        .bind(log.status_code)
        .bind(&log.response_body)
        .bind(&log.error_message)
        .bind(log.duration_ms)
        .bind(log.succeeded)
        .bind(log.attempted_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Number of attempts logged for `event_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_for_event(&self, event_id: EventId) -> Result<i64> {
        let count =
            sqlx::query_scalar("SELECT COUNT(*) FROM delivery_attempt_logs WHERE event_id = $1")
                .bind(event_id)
                .fetch_one(&*self.pool)
                .await?;

        Ok(count)
    }
}
