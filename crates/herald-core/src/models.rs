//! Domain models for the outbox worker.
//!
//! Outbox events are written by producers elsewhere in the platform; webhook
//! configurations are owned by tenant settings. This worker only ever mutates
//! the delivery-state fields of an [`OutboxEvent`] and appends
//! [`DeliveryAttemptLog`] rows.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult = Result<sqlx::encode::IsNull, sqlx::error::BoxDynError>;
type BoxDynError = sqlx::error::BoxDynError;

/// Retry ceiling applied to events created without an explicit one.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                Ok(Self(<Uuid as sqlx::Decode<PgDb>>::decode(value)?))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

uuid_newtype!(
    /// Tenant identifier. Every query and delivery is scoped by it.
    OrganizationId
);

uuid_newtype!(
    /// Outbox event identifier. Receivers deduplicate on this value.
    EventId
);

uuid_newtype!(
    /// Webhook subscription identifier.
    WebhookId
);

/// Delivery state of an outbox event.
///
/// ```text
/// pending --(all webhooks 2xx / no subscribers)--> delivered
///    |  \--(failure, attempts < max)--> pending (next_retry_at pushed out)
///    \----(failure, attempts >= max)--> dlq
/// ```
///
/// `failed` is accepted from storage and counted in statistics but this
/// worker never writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting for delivery or for its next retry.
    Pending,
    /// Every subscribed webhook acknowledged the event.
    Delivered,
    /// Marked failed by an external operator or tool.
    Failed,
    /// Retries exhausted. Only an operator may requeue it.
    Dlq,
}

impl OutboxStatus {
    /// Database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Dlq => "dlq",
        }
    }

    /// Terminal events are never picked up again by the worker.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Dlq)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "dlq" => Ok(Self::Dlq),
            other => Err(format!("invalid outbox status: {other}")),
        }
    }
}

impl sqlx::Type<PgDb> for OutboxStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <&str as sqlx::Type<PgDb>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for OutboxStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl sqlx::Encode<'_, PgDb> for OutboxStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// A durable record of something that happened, waiting to be fanned out.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxEvent {
    /// Unique event id.
    pub id: EventId,

    /// Owning tenant.
    pub organization_id: OrganizationId,

    /// Routing key matched against webhook subscriptions.
    pub topic: String,

    /// Business-event classifier. Opaque to the worker, forwarded as a header.
    pub smart_code: String,

    /// Event body as written by the producer. Never modified.
    pub payload: Json<serde_json::Value>,

    /// Current delivery state.
    pub status: OutboxStatus,

    /// Completed delivery cycles that failed.
    pub attempts: i32,

    /// Failure ceiling. Reaching it moves the event to `dlq`.
    pub max_attempts: i32,

    /// The event is not eligible for processing before this instant.
    pub next_retry_at: DateTime<Utc>,

    /// When the producer wrote the event.
    pub created_at: DateTime<Utc>,

    /// Last time any field changed.
    pub updated_at: DateTime<Utc>,
}

impl OutboxEvent {
    /// Creates a pending event that is immediately due.
    pub fn new(
        organization_id: OrganizationId,
        topic: impl Into<String>,
        smart_code: impl Into<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            organization_id,
            topic: topic.into(),
            smart_code: smart_code.into(),
            payload: Json(payload),
            status: OutboxStatus::Pending,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            next_retry_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overrides the retry ceiling.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// True when the event is pending and its retry time has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending && self.next_retry_at <= now
    }

    /// Event payload.
    pub fn data(&self) -> &serde_json::Value {
        &self.payload.0
    }
}

/// HMAC key for a webhook subscription.
///
/// Has no `Display` and a redacting `Debug`, so it cannot leak through
/// logging or error formatting.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecret(String);

impl SigningSecret {
    /// Wraps a raw secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Key material for the MAC.
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(**redacted**)")
    }
}

impl sqlx::Type<PgDb> for SigningSecret {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<PgDb>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as sqlx::Type<PgDb>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SigningSecret {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        Ok(Self(<String as sqlx::Decode<PgDb>>::decode(value)?))
    }
}

impl sqlx::Encode<'_, PgDb> for SigningSecret {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Per-subscription override of the retry shape.
///
/// Missing fields fall back to the worker's configured defaults. The event's
/// own `max_attempts` always decides exhaustion; `max_attempts` here is kept
/// for the tenant's reference only.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WebhookRetryPolicy {
    /// Informational ceiling configured by the tenant.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Multiplier applied per failed attempt.
    #[serde(default)]
    pub backoff_factor: Option<f64>,

    /// Delay before the first retry.
    #[serde(default)]
    pub initial_delay_ms: Option<u64>,
}

/// A tenant's subscription to one or more topics.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookConfig {
    /// Unique subscription id.
    pub id: WebhookId,

    /// Owning tenant.
    pub organization_id: OrganizationId,

    /// Delivery target.
    pub url: String,

    /// Signing key.
    pub secret: SigningSecret,

    /// Topics this subscription receives.
    pub topics: Vec<String>,

    /// Optional backoff override.
    pub retry_policy: Option<Json<WebhookRetryPolicy>>,

    /// Inactive subscriptions are skipped but kept for audit.
    pub is_active: bool,

    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl WebhookConfig {
    /// Creates an active subscription with no retry override.
    pub fn new(
        organization_id: OrganizationId,
        url: impl Into<String>,
        secret: SigningSecret,
        topics: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WebhookId::new(),
            organization_id,
            url: url.into(),
            secret,
            topics,
            retry_policy: None,
            is_active: true,
            created_at: now,
        }
    }

    /// True when this config should receive `event`: same tenant, active,
    /// and subscribed to the event's topic.
    pub fn matches(&self, event: &OutboxEvent) -> bool {
        self.is_active
            && self.organization_id == event.organization_id
            && self.topics.iter().any(|t| t == &event.topic)
    }

    /// Backoff override, if one is configured.
    pub fn retry_override(&self) -> Option<WebhookRetryPolicy> {
        self.retry_policy.as_ref().map(|p| p.0)
    }
}

/// One delivery attempt of one event to one webhook.
///
/// Written once and never read back by the worker.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryAttemptLog {
    /// Row id.
    pub id: Uuid,

    /// Event that was delivered.
    pub event_id: EventId,

    /// Target subscription.
    pub webhook_id: WebhookId,

    /// Tenant of both.
    pub organization_id: OrganizationId,

    /// 1-based attempt number of the event at the time of the call.
    pub attempt_number: i32,

    /// HTTP status, absent when no response was received.
    pub status_code: Option<i32>,

    /// Response body, truncated.
    pub response_body: Option<String>,

    /// Failure description for non-2xx or transport errors.
    pub error_message: Option<String>,

    /// Wall time of the HTTP call.
    pub duration_ms: i64,

    /// Whether the attempt counted as success.
    pub succeeded: bool,

    /// When the attempt started.
    pub attempted_at: DateTime<Utc>,
}

/// Event counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Waiting for delivery or retry.
    pub pending: i64,
    /// Delivered to every subscriber.
    pub delivered: i64,
    /// Marked failed externally.
    pub failed: i64,
    /// Dead-lettered.
    pub dlq: i64,
}

impl StatusCounts {
    /// Adds `count` to the bucket for `status`.
    pub fn record(&mut self, status: OutboxStatus, count: i64) {
        match status {
            OutboxStatus::Pending => self.pending += count,
            OutboxStatus::Delivered => self.delivered += count,
            OutboxStatus::Failed => self.failed += count,
            OutboxStatus::Dlq => self.dlq += count,
        }
    }

    /// Sum of all buckets.
    pub fn total(&self) -> i64 {
        self.pending + self.delivered + self.failed + self.dlq
    }
}
