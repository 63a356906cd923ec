//! Core domain models and storage for the Herald outbox worker.
//!
//! Provides strongly-typed identifiers, the outbox event and webhook
//! subscription models, the delivery attempt log record, a clock abstraction
//! for deterministic tests, and the PostgreSQL repositories the worker reads
//! from and writes to.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    DeliveryAttemptLog, EventId, OrganizationId, OutboxEvent, OutboxStatus, SigningSecret,
    StatusCounts, WebhookConfig, WebhookId, WebhookRetryPolicy,
};
pub use time::{Clock, RealClock, TestClock};
