//! Collaborator interfaces consumed by the worker.
//!
//! The outbox table, the webhook subscription table and the attempt log are
//! owned by other parts of the platform. The worker sees them only through
//! these traits, which keeps the processor and scheduler testable against the
//! in-memory [`mock::MockStorage`].

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use herald_core::{
    error::Result,
    models::{
        DeliveryAttemptLog, EventId, OrganizationId, OutboxEvent, StatusCounts, WebhookConfig,
    },
    storage::Storage,
};

use crate::processor::EventOutcome;

/// Boxed future returned by collaborator calls.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Outbox event queue with an atomic claim.
pub trait OutboxStore: Send + Sync + 'static {
    /// Claims up to `limit` events that are pending and due at `now`,
    /// oldest-due first, and leases them until `lease_until`.
    ///
    /// Must be atomic: two concurrent callers never receive the same event.
    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<OutboxEvent>>;

    /// Persists the processor's decision for a claimed event. Returns `false`
    /// when the event was no longer pending and nothing was written.
    fn apply_outcome(
        &self,
        event_id: EventId,
        outcome: EventOutcome,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, bool>;

    /// Returns a claimed event to the queue, due at `now`, without touching
    /// its attempt count.
    fn release(&self, event_id: EventId, now: DateTime<Utc>) -> StoreFuture<'_, bool>;

    /// Event counts per status.
    fn status_counts(&self) -> StoreFuture<'_, StatusCounts>;
}

/// Read-only webhook subscription lookup.
pub trait WebhookDirectory: Send + Sync + 'static {
    /// Active subscriptions of `organization_id` that include `topic`.
    fn find_active_for_topic<'a>(
        &'a self,
        organization_id: OrganizationId,
        topic: &'a str,
    ) -> StoreFuture<'a, Vec<WebhookConfig>>;
}

/// Write-only sink for delivery attempt records.
pub trait DeliveryLogSink: Send + Sync + 'static {
    /// Appends one attempt record.
    fn record(&self, log: DeliveryAttemptLog) -> StoreFuture<'_, ()>;
}

/// PostgreSQL implementation of all three collaborators.
#[derive(Clone)]
pub struct PostgresStorage {
    storage: Arc<Storage>,
}

impl PostgresStorage {
    /// Wraps the core repositories.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl OutboxStore for PostgresStorage {
    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<OutboxEvent>> {
        Box::pin(async move { self.storage.outbox_events.claim_due(now, limit, lease_until).await })
    }

    fn apply_outcome(
        &self,
        event_id: EventId,
        outcome: EventOutcome,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, bool> {
        let events = self.storage.outbox_events.clone();
        Box::pin(async move {
            match outcome {
                EventOutcome::Delivered => events.mark_delivered(event_id, now).await,
                EventOutcome::Retry { attempts, next_retry_at } => {
                    events.schedule_retry(event_id, attempts, next_retry_at, now).await
                },
                EventOutcome::DeadLettered { attempts } => {
                    events.mark_dead_lettered(event_id, attempts, now).await
                },
            }
        })
    }

    fn release(&self, event_id: EventId, now: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move { self.storage.outbox_events.release(event_id, now).await })
    }

    fn status_counts(&self) -> StoreFuture<'_, StatusCounts> {
        Box::pin(async move { self.storage.outbox_events.status_counts().await })
    }
}

impl WebhookDirectory for PostgresStorage {
    fn find_active_for_topic<'a>(
        &'a self,
        organization_id: OrganizationId,
        topic: &'a str,
    ) -> StoreFuture<'a, Vec<WebhookConfig>> {
        Box::pin(async move {
            self.storage.webhook_configs.find_active_for_topic(organization_id, topic).await
        })
    }
}

impl DeliveryLogSink for PostgresStorage {
    fn record(&self, log: DeliveryAttemptLog) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.storage.delivery_logs.create(&log).await.map(|_| ()) })
    }
}

pub mod mock {
    //! In-memory implementation of every collaborator for tests.
    //!
    //! All state sits behind one lock, so `claim_due` is atomic in the same
    //! way the SQL claim is. Failures can be injected per operation.

    use std::{
        collections::{HashMap, HashSet},
        sync::Arc,
    };

    use chrono::{DateTime, Utc};
    use herald_core::{
        error::{CoreError, Result},
        models::{
            DeliveryAttemptLog, EventId, OrganizationId, OutboxEvent, OutboxStatus, StatusCounts,
            WebhookConfig,
        },
    };
    use tokio::sync::Mutex;

    use super::{DeliveryLogSink, EventOutcome, OutboxStore, StoreFuture, WebhookDirectory};

    #[derive(Default)]
    struct State {
        events: HashMap<EventId, OutboxEvent>,
        webhooks: Vec<WebhookConfig>,
        logs: Vec<DeliveryAttemptLog>,
        claim_error: Option<String>,
        failing_topics: HashSet<String>,
        failing_log_writes: bool,
        claim_calls: usize,
        released: Vec<EventId>,
    }

    /// In-memory outbox, webhook directory and log sink.
    #[derive(Clone, Default)]
    pub struct MockStorage {
        state: Arc<Mutex<State>>,
    }

    impl MockStorage {
        /// Creates empty storage.
        pub fn new() -> Self {
            Self::default()
        }

        /// Adds or replaces an event.
        pub async fn insert_event(&self, event: OutboxEvent) {
            self.state.lock().await.events.insert(event.id, event);
        }

        /// Adds a webhook subscription.
        pub async fn insert_webhook(&self, webhook: WebhookConfig) {
            self.state.lock().await.webhooks.push(webhook);
        }

        /// Current copy of an event.
        pub async fn event(&self, id: EventId) -> Option<OutboxEvent> {
            self.state.lock().await.events.get(&id).cloned()
        }

        /// Every attempt record written so far.
        pub async fn delivery_logs(&self) -> Vec<DeliveryAttemptLog> {
            self.state.lock().await.logs.clone()
        }

        /// Attempt records for one event.
        pub async fn logs_for(&self, event_id: EventId) -> Vec<DeliveryAttemptLog> {
            self.state.lock().await.logs.iter().filter(|l| l.event_id == event_id).cloned().collect()
        }

        /// Events handed back through `release`, in call order.
        pub async fn released(&self) -> Vec<EventId> {
            self.state.lock().await.released.clone()
        }

        /// Number of `claim_due` calls, including failed ones.
        pub async fn claim_calls(&self) -> usize {
            self.state.lock().await.claim_calls
        }

        /// Makes the next `claim_due` call fail.
        pub async fn inject_claim_error(&self, message: impl Into<String>) {
            self.state.lock().await.claim_error = Some(message.into());
        }

        /// Makes webhook lookups for `topic` fail until cleared.
        pub async fn fail_lookups_for_topic(&self, topic: impl Into<String>) {
            self.state.lock().await.failing_topics.insert(topic.into());
        }

        /// Makes every log write fail.
        pub async fn fail_log_writes(&self, failing: bool) {
            self.state.lock().await.failing_log_writes = failing;
        }
    }

    impl OutboxStore for MockStorage {
        fn claim_due(
            &self,
            now: DateTime<Utc>,
            limit: usize,
            lease_until: DateTime<Utc>,
        ) -> StoreFuture<'_, Vec<OutboxEvent>> {
            Box::pin(async move {
                let mut state = self.state.lock().await;
                state.claim_calls += 1;
                if let Some(message) = state.claim_error.take() {
                    return Err(CoreError::Database(message));
                }

                let mut due: Vec<(DateTime<Utc>, DateTime<Utc>, EventId)> = state
                    .events
                    .values()
                    .filter(|e| e.is_due(now))
                    .map(|e| (e.next_retry_at, e.created_at, e.id))
                    .collect();
                due.sort();
                due.truncate(limit);

                let mut claimed = Vec::with_capacity(due.len());
                for (_, _, id) in due {
                    if let Some(event) = state.events.get_mut(&id) {
                        event.next_retry_at = lease_until;
                        event.updated_at = now;
                        claimed.push(event.clone());
                    }
                }
                Ok(claimed)
            })
        }

        fn apply_outcome(
            &self,
            event_id: EventId,
            outcome: EventOutcome,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, bool> {
            Box::pin(async move {
                let mut state = self.state.lock().await;
                let Some(event) = state.events.get_mut(&event_id) else {
                    return Ok(false);
                };
                if event.status != OutboxStatus::Pending {
                    return Ok(false);
                }

                match outcome {
                    EventOutcome::Delivered => event.status = OutboxStatus::Delivered,
                    EventOutcome::Retry { attempts, next_retry_at } => {
                        if attempts > event.max_attempts {
                            return Ok(false);
                        }
                        event.attempts = attempts;
                        event.next_retry_at = next_retry_at;
                    },
                    EventOutcome::DeadLettered { attempts } => {
                        event.status = OutboxStatus::Dlq;
                        event.attempts = attempts.min(event.max_attempts);
                    },
                }
                event.updated_at = now;
                Ok(true)
            })
        }

        fn release(&self, event_id: EventId, now: DateTime<Utc>) -> StoreFuture<'_, bool> {
            Box::pin(async move {
                let mut state = self.state.lock().await;
                state.released.push(event_id);
                match state.events.get_mut(&event_id) {
                    Some(event) if event.status == OutboxStatus::Pending => {
                        event.next_retry_at = now;
                        event.updated_at = now;
                        Ok(true)
                    },
                    _ => Ok(false),
                }
            })
        }

        fn status_counts(&self) -> StoreFuture<'_, StatusCounts> {
            Box::pin(async move {
                let state = self.state.lock().await;
                let mut counts = StatusCounts::default();
                for event in state.events.values() {
                    counts.record(event.status, 1);
                }
                Ok(counts)
            })
        }
    }

    impl WebhookDirectory for MockStorage {
        fn find_active_for_topic<'a>(
            &'a self,
            organization_id: OrganizationId,
            topic: &'a str,
        ) -> StoreFuture<'a, Vec<WebhookConfig>> {
            Box::pin(async move {
                let state = self.state.lock().await;
                if state.failing_topics.contains(topic) {
                    return Err(CoreError::Database(format!("lookup failed for topic {topic}")));
                }
                Ok(state
                    .webhooks
                    .iter()
                    .filter(|w| {
                        w.is_active
                            && w.organization_id == organization_id
                            && w.topics.iter().any(|t| t == topic)
                    })
                    .cloned()
                    .collect())
            })
        }
    }

    impl DeliveryLogSink for MockStorage {
        fn record(&self, log: DeliveryAttemptLog) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                let mut state = self.state.lock().await;
                if state.failing_log_writes {
                    return Err(CoreError::Database("log sink unavailable".to_string()));
                }
                state.logs.push(log);
                Ok(())
            })
        }
    }

}
