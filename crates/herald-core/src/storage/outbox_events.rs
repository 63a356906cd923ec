//! Repository for outbox events.
//!
//! Claiming is a single statement: the due rows are locked with
//! `FOR UPDATE SKIP LOCKED` and their `next_retry_at` is pushed out to a lease
//! deadline in the same `UPDATE`. Concurrent claimers therefore never see the
//! same row as due, and rows held by a crashed worker become due again once
//! the lease expires. No new status is needed for "in flight".

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{EventId, OutboxEvent, OutboxStatus, StatusCounts},
};

const EVENT_COLUMNS: &str = "id, organization_id, topic, smart_code, payload, status, attempts, \
                             max_attempts, next_retry_at, created_at, updated_at";

/// Outbox event persistence.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts an event. Producers normally do this inside their own
    /// business transaction, see [`Repository::create_in_tx`].
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or a constraint is violated.
    pub async fn create(&self, event: &OutboxEvent) -> Result<EventId> {
        self.create_impl(&*self.pool, event).await
    }

    /// Inserts an event as part of a caller-owned transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &OutboxEvent,
    ) -> Result<EventId> {
        self.create_impl(&mut **tx, event).await
    }

    async fn create_impl<'e, E>(&self, executor: E, event: &OutboxEvent) -> Result<EventId>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO outbox_events (
                id, organization_id, topic, smart_code, payload, status,
                attempts, max_attempts, next_retry_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(event.id)
        .bind(event.organization_id)
        .bind(&event.topic)
        .bind(&event.smart_code)
        .bind(&event.payload)
        .bind(event.status)
        .bind(event.attempts)
        .bind(event.max_attempts)
        .bind(event.next_retry_at)
        .bind(event.created_at)
        .bind(event.updated_at)
        .fetch_one(executor)
        .await?;

        Ok(id)
    }

    /// Loads one event.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: EventId) -> Result<Option<OutboxEvent>> {
        let event = sqlx::query_as::<_, OutboxEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM outbox_events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Atomically claims up to `limit` due events, oldest-due first.
    ///
    /// Claimed rows stay `pending` but get `next_retry_at = lease_until`, which
    /// is also the value returned on each event.
    ///
    /// # Errors
    ///
    /// Returns error if the statement fails. Nothing is claimed in that case.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            WITH due AS (
                SELECT id, next_retry_at AS due_at
                FROM outbox_events
                WHERE status = 'pending' AND next_retry_at <= $1
                ORDER BY next_retry_at ASC, created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            ),
            claimed AS (
                UPDATE outbox_events e
                SET next_retry_at = $3, updated_at = $1
                FROM due
                WHERE e.id = due.id
                RETURNING e.*, due.due_at
            )
            SELECT {EVENT_COLUMNS} FROM claimed
            ORDER BY due_at ASC, created_at ASC
            "#
        );

        let events = sqlx::query_as::<_, OutboxEvent>(&sql)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(lease_until)
            .fetch_all(&*self.pool)
            .await?;

        Ok(events)
    }

    /// Marks a pending event delivered. Returns `false` if the event was not
    /// pending.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_delivered(&self, id: EventId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'delivered', updated_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Records a failed cycle and the next eligible time. Returns `false` if
    /// the event was not pending.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails or `attempts` exceeds the ceiling.
    pub async fn schedule_retry(
        &self,
        id: EventId,
        attempts: i32,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET attempts = $2, next_retry_at = $3, updated_at = $4
            WHERE id = $1 AND status = 'pending' AND $2 <= max_attempts
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(next_retry_at)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Moves a pending event to the dead-letter state. Returns `false` if the
    /// event was not pending.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_dead_lettered(
        &self,
        id: EventId,
        attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'dlq', attempts = LEAST($2, max_attempts), updated_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Hands a claimed event back without touching `attempts`, making it due
    /// at `now`.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn release(&self, id: EventId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET next_retry_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Event counts grouped by status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a row carries an unknown status.
    pub async fn status_counts(&self) -> Result<StatusCounts> {
        let rows: Vec<(OutboxStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM outbox_events GROUP BY status")
                .fetch_all(&*self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.record(status, count);
        }
        Ok(counts)
    }
}
