//! Outbox event delivery engine.
//!
//! Turns pending outbox rows into signed webhook requests. Each event fans out
//! to every active webhook subscribed to its topic; the event is delivered only
//! when all of them acknowledge with a 2xx. Failures back off exponentially and
//! end in the dead-letter state once the attempt ceiling is reached.
//!
//! # Architecture
//!
//! 1. **Claim** - [`BatchScheduler`] atomically claims due events and leases
//!    them, so concurrent triggers never share an event
//! 2. **Fan-out** - [`EventProcessor`] resolves subscribers and delivers to all
//!    of them concurrently
//! 3. **Send** - [`DeliveryExecutor`] signs the envelope, performs the POST and
//!    records one delivery log per attempt
//! 4. **Persist** - the scheduler writes the [`EventOutcome`] back, guarded on
//!    the event still being pending
//!
//! Storage is reached through the traits in [`storage`], so everything above
//! runs against [`storage::mock::MockStorage`] in tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod signing;
pub mod storage;
pub mod worker;

pub use client::{ClientConfig, DeliveryEnvelope, DeliveryExecutor, DeliveryOutcome};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use processor::{EventOutcome, EventProcessor};
pub use retry::BackoffPolicy;
pub use scheduler::{BatchScheduler, BatchSummary, Liveness, SchedulerConfig, WorkerStats};
pub use storage::{DeliveryLogSink, OutboxStore, PostgresStorage, WebhookDirectory};
pub use worker::TriggerLoop;

/// Default per-request HTTP timeout in seconds.
pub const DEFAULT_DELIVERY_TIMEOUT_SECONDS: u64 = 10;

/// `User-Agent` sent with every delivery.
pub const DEFAULT_USER_AGENT: &str = "Herald-Outbox/1.0";

/// Default number of events claimed per batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default number of events processed concurrently within a batch.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default time after which unstarted events in a batch are released.
pub const DEFAULT_BATCH_DEADLINE_SECONDS: u64 = 50;

/// Default lease taken on claimed events.
pub const DEFAULT_CLAIM_LEASE_SECONDS: u64 = 300;
