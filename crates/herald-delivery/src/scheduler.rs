//! Batch scheduler: claim, process with bounded concurrency, persist.
//!
//! One [`BatchScheduler::process_batch`] call is a bounded unit of work. The
//! claim is atomic at the storage layer, so overlapping calls (manual trigger
//! plus interval loop, or several replicas) never process the same event.
//! A failure on one event is logged and isolated; the rest of the batch
//! carries on.

use std::{
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use futures::{stream, FutureExt, StreamExt};
use herald_core::{
    models::{OutboxEvent, StatusCounts},
    Clock,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    processor::{EventOutcome, EventProcessor},
    storage::OutboxStore,
};

/// Scheduling limits for one batch.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Events claimed when the caller gives no explicit limit.
    pub batch_size: usize,
    /// Events processed at the same time.
    pub concurrency: usize,
    /// Events not started within this window are released for the next run.
    pub batch_deadline: Duration,
    /// How long a claim hides an event from other claimers. Must outlast
    /// the batch deadline plus one delivery timeout.
    pub claim_lease: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::DEFAULT_BATCH_SIZE,
            concurrency: crate::DEFAULT_CONCURRENCY,
            batch_deadline: Duration::from_secs(crate::DEFAULT_BATCH_DEADLINE_SECONDS),
            claim_lease: Duration::from_secs(crate::DEFAULT_CLAIM_LEASE_SECONDS),
        }
    }
}

/// Counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Events claimed.
    pub claimed: usize,
    /// Moved to `delivered`.
    pub delivered: usize,
    /// Left `pending` with a later `next_retry_at`.
    pub retried: usize,
    /// Moved to `dlq`.
    pub dead_lettered: usize,
    /// Failed internally and released with attempts unchanged.
    pub errored: usize,
    /// Not started before the deadline and released.
    pub deferred: usize,
}

/// Cumulative counters since process start.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    /// Completed `process_batch` calls.
    pub batches_run: u64,
    /// `process_batch` calls that could not claim.
    pub batches_failed: u64,
    /// Events claimed.
    pub events_claimed: u64,
    /// Events delivered.
    pub delivered: u64,
    /// Events rescheduled.
    pub retried: u64,
    /// Events dead-lettered.
    pub dead_lettered: u64,
    /// Events released after an internal failure.
    pub errored: u64,
    /// Events released at the deadline.
    pub deferred: u64,
    /// Start time of the most recent batch.
    pub last_batch_at: Option<DateTime<Utc>>,
}

impl WorkerStats {
    fn absorb(&mut self, summary: &BatchSummary, started_at: DateTime<Utc>) {
        self.batches_run += 1;
        self.events_claimed += summary.claimed as u64;
        self.delivered += summary.delivered as u64;
        self.retried += summary.retried as u64;
        self.dead_lettered += summary.dead_lettered as u64;
        self.errored += summary.errored as u64;
        self.deferred += summary.deferred as u64;
        self.last_batch_at = Some(started_at);
    }
}

/// Liveness snapshot. Computed without touching storage.
#[derive(Debug, Clone, Serialize)]
pub struct Liveness {
    /// Always `true` while the process can answer.
    pub alive: bool,
    /// Completed batches.
    pub batches_run: u64,
    /// Start time of the most recent batch.
    pub last_batch_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventReport {
    Applied(EventOutcome),
    Errored,
    Deferred,
}

/// Drives the event processor over claimed batches.
pub struct BatchScheduler {
    store: Arc<dyn OutboxStore>,
    processor: Arc<EventProcessor>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    stats: Arc<RwLock<WorkerStats>>,
}

impl BatchScheduler {
    /// Creates a scheduler.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` for a zero batch size or
    /// concurrency.
    pub fn new(
        store: Arc<dyn OutboxStore>,
        processor: Arc<EventProcessor>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(DeliveryError::configuration("batch size must be positive"));
        }
        if config.concurrency == 0 {
            return Err(DeliveryError::configuration("concurrency must be positive"));
        }

        Ok(Self { store, processor, clock, config, stats: Arc::new(RwLock::new(WorkerStats::default())) })
    }

    /// Scheduler settings.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Claims up to `limit` due events (default: the configured batch size)
    /// and processes them.
    ///
    /// # Errors
    ///
    /// Returns an error only if the claim itself fails. Per-event failures
    /// are counted in the summary instead.
    pub async fn process_batch(&self, limit: Option<usize>) -> Result<BatchSummary> {
        let limit = limit.unwrap_or(self.config.batch_size);
        let started_at = self.clock.now_utc();
        let lease_until = started_at + to_chrono(self.config.claim_lease);
        let deadline = self.clock.now() + self.config.batch_deadline;

        let events = match self.store.claim_due(started_at, limit, lease_until).await {
            Ok(events) => events,
            Err(e) => {
                self.stats.write().await.batches_failed += 1;
                error!(error = %e, "failed to claim due events");
                return Err(e.into());
            },
        };

        let mut summary = BatchSummary { claimed: events.len(), ..BatchSummary::default() };
        if !events.is_empty() {
            debug!(claimed = events.len(), limit, "claimed due events");
        }

        let reports: Vec<EventReport> = stream::iter(events)
            .map(|event| self.run_isolated(event, deadline))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        for report in reports {
            match report {
                EventReport::Applied(EventOutcome::Delivered) => summary.delivered += 1,
                EventReport::Applied(EventOutcome::Retry { .. }) => summary.retried += 1,
                EventReport::Applied(EventOutcome::DeadLettered { .. }) => {
                    summary.dead_lettered += 1;
                },
                EventReport::Errored => summary.errored += 1,
                EventReport::Deferred => summary.deferred += 1,
            }
        }

        self.stats.write().await.absorb(&summary, started_at);
        if summary.claimed > 0 {
            info!(
                claimed = summary.claimed,
                delivered = summary.delivered,
                retried = summary.retried,
                dead_lettered = summary.dead_lettered,
                errored = summary.errored,
                deferred = summary.deferred,
                "batch complete"
            );
        }
        Ok(summary)
    }

    /// Event counts per status, read from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn stats(&self) -> Result<StatusCounts> {
        Ok(self.store.status_counts().await?)
    }

    /// Cumulative in-process counters.
    pub async fn worker_stats(&self) -> WorkerStats {
        self.stats.read().await.clone()
    }

    /// Liveness without side effects or I/O.
    pub async fn health(&self) -> Liveness {
        let stats = self.stats.read().await;
        Liveness { alive: true, batches_run: stats.batches_run, last_batch_at: stats.last_batch_at }
    }

    /// Runs one event, converting panics into an errored report.
    async fn run_isolated(&self, event: OutboxEvent, deadline: Instant) -> EventReport {
        let event_id = event.id;
        match AssertUnwindSafe(self.run_one(&event, deadline)).catch_unwind().await {
            Ok(report) => report,
            Err(_) => {
                error!(event_id = %event_id, "event processing panicked");
                self.release(&event).await;
                EventReport::Errored
            },
        }
    }

    async fn run_one(&self, event: &OutboxEvent, deadline: Instant) -> EventReport {
        if self.clock.now() >= deadline {
            debug!(event_id = %event.id, "batch deadline reached, releasing event");
            self.release(event).await;
            return EventReport::Deferred;
        }

        let outcome = match self.processor.process(event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    event_id = %event.id,
                    organization_id = %event.organization_id,
                    error = %e,
                    category = %e.category(),
                    "event processing failed, releasing without consuming an attempt"
                );
                self.release(event).await;
                return EventReport::Errored;
            },
        };

        let now = self.clock.now_utc();
        match self.store.apply_outcome(event.id, outcome, now).await {
            Ok(true) => EventReport::Applied(outcome),
            Ok(false) => {
                warn!(
                    event_id = %event.id,
                    status = %outcome.status(),
                    "event no longer pending, outcome discarded"
                );
                EventReport::Errored
            },
            Err(e) => {
                error!(event_id = %event.id, error = %e, "failed to persist event outcome");
                EventReport::Errored
            },
        }
    }

    async fn release(&self, event: &OutboxEvent) {
        let now = self.clock.now_utc();
        if let Err(e) = self.store.release(event.id, now).await {
            warn!(event_id = %event.id, error = %e, "failed to release event, lease will expire");
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(1))
}
