//! Single-attempt webhook delivery.
//!
//! [`DeliveryExecutor::deliver`] serializes the envelope once, signs those
//! exact bytes, performs one POST with a hard timeout, classifies the result
//! and appends one attempt record to the log sink. It never retries; retry
//! orchestration belongs to the event processor.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use herald_core::{
    models::{DeliveryAttemptLog, EventId, OrganizationId, OutboxEvent, WebhookConfig},
    Clock,
};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    error::{DeliveryError, Result},
    signing,
    storage::DeliveryLogSink,
};

/// Signature header, `sha256=<hex>`.
pub const HEADER_SIGNATURE: &str = "X-Herald-Signature";
/// Tenant of the event.
pub const HEADER_ORGANIZATION_ID: &str = "X-Herald-Organization-Id";
/// Business-event classifier.
pub const HEADER_SMART_CODE: &str = "X-Herald-Smart-Code";
/// Routing topic.
pub const HEADER_TOPIC: &str = "X-Herald-Topic";
/// Event id, for receiver-side deduplication.
pub const HEADER_EVENT_ID: &str = "X-Herald-Event-Id";
/// 1-based delivery attempt number.
pub const HEADER_DELIVERY_ATTEMPT: &str = "X-Herald-Delivery-Attempt";

/// Response bodies longer than this are truncated before logging.
pub const MAX_LOGGED_BODY_BYTES: usize = 1024;
const TRUNCATION_SUFFIX: &str = "... (truncated)";

/// Settings for the outbound HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hard limit for one delivery attempt, connect to last byte.
    pub timeout: Duration,
    /// `User-Agent` sent with every delivery.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_DELIVERY_TIMEOUT_SECONDS),
            user_agent: crate::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// JSON body posted to receivers.
#[derive(Debug, Serialize)]
pub struct DeliveryEnvelope<'a> {
    /// Event id.
    pub id: EventId,
    /// Tenant id.
    pub organization_id: OrganizationId,
    /// Routing topic.
    pub topic: &'a str,
    /// Business-event classifier.
    pub smart_code: &'a str,
    /// Producer payload, unchanged.
    pub data: &'a serde_json::Value,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl<'a> DeliveryEnvelope<'a> {
    /// Builds the envelope for `event`.
    pub fn from_event(event: &'a OutboxEvent) -> Self {
        Self {
            id: event.id,
            organization_id: event.organization_id,
            topic: &event.topic,
            smart_code: &event.smart_code,
            data: event.data(),
            timestamp: event.created_at,
        }
    }

    /// Serialized body. These bytes are both signed and sent.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Serialization` if encoding fails.
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Classified result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// 2xx response received.
    pub success: bool,
    /// Status code, if a response arrived.
    pub status_code: Option<u16>,
    /// Human-readable failure description.
    pub error: Option<String>,
    /// Time spent on the HTTP call.
    pub duration: Duration,
}

/// Performs one delivery attempt of one event to one webhook.
pub struct DeliveryExecutor {
    client: reqwest::Client,
    config: ClientConfig,
    log_sink: Arc<dyn DeliveryLogSink>,
    clock: Arc<dyn Clock>,
}

impl DeliveryExecutor {
    /// Creates an executor.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built from `config`.
    pub fn new(
        config: ClientConfig,
        log_sink: Arc<dyn DeliveryLogSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.timeout.is_zero() {
            return Err(DeliveryError::configuration("delivery timeout must be positive"));
        }

        // Redirects are not followed: a 3xx is a failed delivery.
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, log_sink, clock })
    }

    /// Delivers `event` to `webhook` once and records the attempt.
    ///
    /// Receiver failures (non-2xx, timeout, DNS or connection errors, an
    /// unusable URL) are reported through the returned outcome, never as
    /// `Err`. A log sink failure is logged and does not change the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error only if the request could not be prepared
    /// (serialization or signing). No network call is made in that case.
    pub async fn deliver(
        &self,
        event: &OutboxEvent,
        webhook: &WebhookConfig,
    ) -> Result<DeliveryOutcome> {
        let attempt_number = event.attempts.saturating_add(1);
        let span = info_span!(
            "webhook_delivery",
            event_id = %event.id,
            webhook_id = %webhook.id,
            organization_id = %event.organization_id,
            attempt = attempt_number,
            url = %webhook.url,
        );

        async move {
            let body = DeliveryEnvelope::from_event(event).to_bytes()?;
            let signature = signing::sign(&body, &webhook.secret)
                .map_err(|e| DeliveryError::internal(format!("failed to sign payload: {e}")))?;
            let headers = delivery_headers(event, &signature, attempt_number)?;

            let attempted_at = self.clock.now_utc();
            let started = self.clock.now();
            let response = self.client.post(&webhook.url).headers(headers).body(body).send().await;

            let (outcome, response_body) = match response {
                Ok(response) => {
                    let status = response.status();
                    let response_body = read_truncated_body(response).await;
                    let duration = self.clock.now().saturating_duration_since(started);

                    if status.is_success() {
                        debug!(status_code = status.as_u16(), "webhook accepted delivery");
                        let outcome = DeliveryOutcome {
                            success: true,
                            status_code: Some(status.as_u16()),
                            error: None,
                            duration,
                        };
                        (outcome, response_body)
                    } else {
                        let error = DeliveryError::http_status(status.as_u16());
                        warn!(status_code = status.as_u16(), "webhook rejected delivery");
                        let outcome = DeliveryOutcome {
                            success: false,
                            status_code: Some(status.as_u16()),
                            error: Some(error.to_string()),
                            duration,
                        };
                        (outcome, response_body)
                    }
                },
                Err(e) => {
                    let duration = self.clock.now().saturating_duration_since(started);
                    let error = self.classify_transport_error(&e);
                    warn!(
                        error = %error,
                        category = %error.category(),
                        duration_ms = duration.as_millis() as u64,
                        "webhook delivery failed"
                    );
                    let outcome = DeliveryOutcome {
                        success: false,
                        status_code: None,
                        error: Some(error.to_string()),
                        duration,
                    };
                    (outcome, None)
                },
            };

            let log = DeliveryAttemptLog {
                id: Uuid::new_v4(),
                event_id: event.id,
                webhook_id: webhook.id,
                organization_id: event.organization_id,
                attempt_number,
                status_code: outcome.status_code.map(i32::from),
                response_body,
                error_message: outcome.error.clone(),
                duration_ms: i64::try_from(outcome.duration.as_millis()).unwrap_or(i64::MAX),
                succeeded: outcome.success,
                attempted_at,
            };
            if let Err(e) = self.log_sink.record(log).await {
                warn!(error = %e, "failed to record delivery attempt");
            }

            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    fn classify_transport_error(&self, error: &reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            DeliveryError::timeout(self.config.timeout.as_secs())
        } else if error.is_connect() {
            DeliveryError::network(format!("connection failed: {error}"))
        } else if error.is_builder() {
            DeliveryError::network(format!("invalid webhook url: {error}"))
        } else {
            DeliveryError::network(error.to_string())
        }
    }
}

fn delivery_headers(event: &OutboxEvent, signature: &str, attempt_number: i32) -> Result<HeaderMap> {
    let value = |name: &str, raw: &str| {
        HeaderValue::from_str(raw)
            .map_err(|_| DeliveryError::internal(format!("{name} is not a valid header value")))
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(HEADER_SIGNATURE, value(HEADER_SIGNATURE, signature)?);
    headers.insert(
        HEADER_ORGANIZATION_ID,
        value(HEADER_ORGANIZATION_ID, &event.organization_id.to_string())?,
    );
    headers.insert(HEADER_SMART_CODE, value(HEADER_SMART_CODE, &event.smart_code)?);
    headers.insert(HEADER_TOPIC, value(HEADER_TOPIC, &event.topic)?);
    headers.insert(HEADER_EVENT_ID, value(HEADER_EVENT_ID, &event.id.to_string())?);
    headers.insert(HEADER_DELIVERY_ATTEMPT, HeaderValue::from(attempt_number));
    Ok(headers)
}

/// Reads at most [`MAX_LOGGED_BODY_BYTES`] of the response body.
async fn read_truncated_body(mut response: reqwest::Response) -> Option<String> {
    let mut collected: Vec<u8> = Vec::new();
    let mut truncated = false;

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                collected.extend_from_slice(&chunk);
                if collected.len() > MAX_LOGGED_BODY_BYTES {
                    truncated = true;
                    break;
                }
            },
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "failed to read response body");
                break;
            },
        }
    }

    if collected.is_empty() {
        return None;
    }
    Some(truncate_body(&collected, truncated))
}

fn truncate_body(bytes: &[u8], force: bool) -> String {
    if !force && bytes.len() <= MAX_LOGGED_BODY_BYTES {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let keep = (MAX_LOGGED_BODY_BYTES - TRUNCATION_SUFFIX.len()).min(bytes.len());
    format!("{}{TRUNCATION_SUFFIX}", String::from_utf8_lossy(&bytes[..keep]))
}
