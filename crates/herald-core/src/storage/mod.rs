//! PostgreSQL repositories for outbox events, webhook subscriptions and the
//! delivery attempt log.
//!
//! All SQL used by the worker lives under this module. The delivery crate
//! reaches it only through its collaborator traits.

use std::sync::Arc;

use sqlx::PgPool;

pub mod delivery_logs;
pub mod outbox_events;
pub mod webhook_configs;

use crate::error::Result;

/// Schema statements applied by [`migrate`], in order. Every statement is
/// idempotent.
const SCHEMA: &[(&str, &str)] = &[
    (
        "outbox_events table",
        r#"
        CREATE TABLE IF NOT EXISTS outbox_events (
            id UUID PRIMARY KEY,
            organization_id UUID NOT NULL,
            topic TEXT NOT NULL,
            smart_code TEXT NOT NULL,
            payload JSONB NOT NULL DEFAULT '{}'::jsonb,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'delivered', 'failed', 'dlq')),
            attempts INTEGER NOT NULL DEFAULT 0 CHECK (attempts >= 0),
            max_attempts INTEGER NOT NULL DEFAULT 3 CHECK (max_attempts > 0),
            next_retry_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "outbox_events due index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_outbox_events_due
        ON outbox_events (next_retry_at, created_at)
        WHERE status = 'pending'
        "#,
    ),
    (
        "outbox_events status index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_outbox_events_status
        ON outbox_events (status)
        "#,
    ),
    (
        "webhook_configs table",
        r#"
        CREATE TABLE IF NOT EXISTS webhook_configs (
            id UUID PRIMARY KEY,
            organization_id UUID NOT NULL,
            url TEXT NOT NULL,
            secret TEXT NOT NULL,
            topics TEXT[] NOT NULL DEFAULT '{}',
            retry_policy JSONB,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "webhook_configs lookup index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_configs_org_active
        ON webhook_configs (organization_id)
        WHERE is_active
        "#,
    ),
    (
        "delivery_attempt_logs table",
        r#"
        CREATE TABLE IF NOT EXISTS delivery_attempt_logs (
            id UUID PRIMARY KEY,
            event_id UUID NOT NULL,
            webhook_id UUID NOT NULL,
            organization_id UUID NOT NULL,
            attempt_number INTEGER NOT NULL,
            status_code INTEGER,
            response_body TEXT,
            error_message TEXT,
            duration_ms BIGINT NOT NULL,
            succeeded BOOLEAN NOT NULL,
            attempted_at TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "delivery_attempt_logs event index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_delivery_attempt_logs_event
        ON delivery_attempt_logs (event_id, attempt_number)
        "#,
    ),
];

/// Creates the tables and indexes the worker needs.
///
/// # Errors
///
/// Returns `CoreError::Database` if any statement fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    for (name, statement) in SCHEMA {
        sqlx::query(*statement).execute(pool).await.map_err(|e| {
            crate::error::CoreError::Database(format!("migration step '{name}' failed: {e}"))
        })?;
    }
    Ok(())
}

/// Shared handle to every repository.
#[derive(Clone)]
pub struct Storage {
    /// Outbox event claims and state transitions.
    pub outbox_events: Arc<outbox_events::Repository>,

    /// Read-only webhook subscription lookups.
    pub webhook_configs: Arc<webhook_configs::Repository>,

    /// Append-only delivery attempt log.
    pub delivery_logs: Arc<delivery_logs::Repository>,

    pool: Arc<PgPool>,
}

impl Storage {
    /// Creates all repositories over one shared pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            outbox_events: Arc::new(outbox_events::Repository::new(pool.clone())),
            webhook_configs: Arc::new(webhook_configs::Repository::new(pool.clone())),
            delivery_logs: Arc::new(delivery_logs::Repository::new(pool.clone())),
            pool,
        }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs `SELECT 1` against the pool.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the database is unreachable.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_builds_over_lazy_pool() {
        let pool = PgPool::connect_lazy("postgresql://localhost/herald").unwrap();
        let storage = Storage::new(pool);
        assert!(!storage.pool().is_closed());
    }

    #[test]
    fn schema_statements_are_idempotent() {
        for (name, statement) in SCHEMA {
            assert!(statement.contains("IF NOT EXISTS"), "{name} must be re-runnable");
        }
    }
}
