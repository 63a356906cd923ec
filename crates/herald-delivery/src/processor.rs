//! Per-event fan-out and state decision.
//!
//! The processor resolves an event's subscribers, delivers to all of them
//! concurrently and returns an [`EventOutcome`]. It never writes event state
//! itself; the scheduler persists the outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use herald_core::{
    models::{OutboxEvent, OutboxStatus, WebhookConfig},
    Clock,
};
use tracing::{debug, info, warn};

use crate::{
    client::DeliveryExecutor,
    error::Result,
    retry::{is_exhausted, next_retry_time, BackoffPolicy},
    storage::WebhookDirectory,
};

/// Decision for one processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Every subscriber acknowledged, or there were none.
    Delivered,
    /// At least one subscriber failed; try again later.
    Retry {
        /// Failed cycles including this one.
        attempts: i32,
        /// Earliest time the event may be claimed again.
        next_retry_at: DateTime<Utc>,
    },
    /// Attempts exhausted. Terminal.
    DeadLettered {
        /// Failed cycles including this one.
        attempts: i32,
    },
}

impl EventOutcome {
    /// Status the event has after this outcome is applied.
    pub fn status(&self) -> OutboxStatus {
        match self {
            Self::Delivered => OutboxStatus::Delivered,
            Self::Retry { .. } => OutboxStatus::Pending,
            Self::DeadLettered { .. } => OutboxStatus::Dlq,
        }
    }
}

/// Fans one event out to its webhooks and decides its next state.
pub struct EventProcessor {
    directory: Arc<dyn WebhookDirectory>,
    executor: Arc<DeliveryExecutor>,
    default_backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl EventProcessor {
    /// Creates a processor. `default_backoff` applies to webhooks without
    /// their own retry override.
    pub fn new(
        directory: Arc<dyn WebhookDirectory>,
        executor: Arc<DeliveryExecutor>,
        default_backoff: BackoffPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { directory, executor, default_backoff, clock }
    }

    /// Processes one claimed event.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscriber lookup fails or a request could not
    /// be prepared. Such failures happen before any delivery is counted, so
    /// the caller must leave `attempts` untouched.
    pub async fn process(&self, event: &OutboxEvent) -> Result<EventOutcome> {
        if is_exhausted(event.attempts, event.max_attempts) {
            warn!(
                event_id = %event.id,
                attempts = event.attempts,
                max_attempts = event.max_attempts,
                "event claimed with no attempts left, dead-lettering"
            );
            return Ok(EventOutcome::DeadLettered { attempts: event.attempts });
        }

        let webhooks: Vec<WebhookConfig> = self
            .directory
            .find_active_for_topic(event.organization_id, &event.topic)
            .await?
            .into_iter()
            .filter(|w| w.matches(event))
            .collect();

        if webhooks.is_empty() {
            debug!(event_id = %event.id, topic = %event.topic, "no active subscribers");
            return Ok(EventOutcome::Delivered);
        }

        let results =
            join_all(webhooks.iter().map(|webhook| self.executor.deliver(event, webhook))).await;

        let mut failed = Vec::new();
        for (webhook, result) in webhooks.iter().zip(results) {
            if !result?.success {
                failed.push(webhook);
            }
        }

        if failed.is_empty() {
            info!(event_id = %event.id, webhooks = webhooks.len(), "event delivered");
            return Ok(EventOutcome::Delivered);
        }

        let attempts = event.attempts.saturating_add(1);
        if is_exhausted(attempts, event.max_attempts) {
            warn!(
                event_id = %event.id,
                attempts,
                failed_webhooks = failed.len(),
                "delivery attempts exhausted, moving event to dead letter"
            );
            return Ok(EventOutcome::DeadLettered { attempts });
        }

        let next_retry_at = self.next_retry_at(event, &failed);
        info!(
            event_id = %event.id,
            attempts,
            failed_webhooks = failed.len(),
            next_retry_at = %next_retry_at,
            "delivery failed, retry scheduled"
        );
        Ok(EventOutcome::Retry { attempts, next_retry_at })
    }

    /// Earliest retry time across the failed webhooks' effective policies.
    fn next_retry_at(&self, event: &OutboxEvent, failed: &[&WebhookConfig]) -> DateTime<Utc> {
        let now = self.clock.now_utc();
        let prior_attempts = u32::try_from(event.attempts).unwrap_or(0);

        failed
            .iter()
            .map(|webhook| {
                let policy = self.default_backoff.with_override(webhook.retry_override());
                next_retry_time(prior_attempts, &policy, now)
            })
            .min()
            .unwrap_or_else(|| next_retry_time(prior_attempts, &self.default_backoff, now))
    }
}
