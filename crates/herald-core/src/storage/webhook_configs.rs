//! Repository for webhook subscriptions.
//!
//! The worker only reads this table. [`Repository::create`] and
//! [`Repository::set_active`] exist for provisioning tools and fixtures.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{OrganizationId, WebhookConfig, WebhookId},
};

/// Webhook subscription persistence.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Active subscriptions of `organization_id` that include `topic`.
    ///
    /// Rows come back in creation order so delivery fan-out is stable.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_active_for_topic(
        &self,
        organization_id: OrganizationId,
        topic: &str,
    ) -> Result<Vec<WebhookConfig>> {
        let configs = sqlx::query_as::<_, WebhookConfig>(
            r#"
            SELECT id, organization_id, url, secret, topics, retry_policy, is_active, created_at
            FROM webhook_configs
            WHERE is_active AND organization_id = $1 AND $2 = ANY(topics)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(organization_id)
        .bind(topic)
        .fetch_all(&*self.pool)
        .await?;

        Ok(configs)
    }

    /// Inserts a subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(&self, config: &WebhookConfig) -> Result<WebhookId> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO webhook_configs (
                id, organization_id, url, secret, topics, retry_policy, is_active, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(config.id)
        .bind(config.organization_id)
        .bind(&config.url)
        .bind(&config.secret)
        .bind(&config.topics)
        .bind(&config.retry_policy)
        .bind(config.is_active)
        .bind(config.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Activates or deactivates a subscription. Rows are never deleted.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if no such subscription exists.
    pub async fn set_active(&self, id: WebhookId, is_active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE webhook_configs SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(is_active)
            .execute(&*self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(crate::error::CoreError::NotFound(format!("webhook config {id}")));
        }
        Ok(())
    }
}
