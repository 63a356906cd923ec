//! Error types for delivery, scheduling and collaborator calls.
//!
//! Receiver-side failures (transport errors, timeouts, non-2xx statuses) are
//! recorded and drive retry scheduling. Everything else is an internal
//! failure: the scheduler logs it and releases the event without spending an
//! attempt.

use std::fmt;

use herald_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failures raised while delivering or processing an outbox event.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Connection, DNS or TLS failure before a response arrived.
    #[error("network error: {message}")]
    Network {
        /// Transport error description.
        message: String,
    },

    /// No response within the delivery timeout.
    #[error("request timed out after {timeout_seconds}s")]
    Timeout {
        /// Configured timeout.
        timeout_seconds: u64,
    },

    /// The receiver answered with a non-2xx status.
    #[error("HTTP {status_code}")]
    HttpStatus {
        /// Response status.
        status_code: u16,
    },

    /// A collaborator store failed.
    #[error("storage error: {message}")]
    Storage {
        /// Storage error description.
        message: String,
    },

    /// Invalid client or scheduler settings.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// What is wrong.
        message: String,
    },

    /// The delivery envelope could not be encoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Encoder error description.
        message: String,
    },

    /// Unexpected failure inside the worker.
    #[error("internal error: {message}")]
    Internal {
        /// Error description.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a non-2xx status error.
    pub fn http_status(status_code: u16) -> Self {
        Self::HttpStatus { status_code }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// True for receiver-side failures, which consume an attempt and are
    /// retried with backoff.
    ///
    /// Internal failures return `false`: the event is left pending with its
    /// attempt count unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::HttpStatus { .. } => true,
            Self::Storage { .. }
            | Self::Configuration { .. }
            | Self::Serialization { .. }
            | Self::Internal { .. } => false,
        }
    }

    /// Classification used in structured logs.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from(self)
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization { message: err.to_string() }
    }
}

/// Coarse error class for logging and dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport failures and timeouts.
    Network,
    /// Non-2xx responses.
    Http,
    /// Collaborator store failures.
    Storage,
    /// Bad settings.
    Configuration,
    /// Encoding and unexpected failures.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Network { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::HttpStatus { .. } => Self::Http,
            DeliveryError::Storage { .. } => Self::Storage,
            DeliveryError::Configuration { .. } => Self::Configuration,
            DeliveryError::Serialization { .. } | DeliveryError::Internal { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Http => "http",
            Self::Storage => "storage",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_failures_are_transient() {
        assert!(DeliveryError::network("connection refused").is_transient());
        assert!(DeliveryError::timeout(10).is_transient());
        assert!(DeliveryError::http_status(500).is_transient());
        assert!(DeliveryError::http_status(404).is_transient());

        assert!(!DeliveryError::storage("pool timed out").is_transient());
        assert!(!DeliveryError::configuration("bad url").is_transient());
        assert!(!DeliveryError::internal("bug").is_transient());
    }

    #[test]
    fn core_errors_become_storage_errors() {
        let err = DeliveryError::from(CoreError::Database("connection reset".into()));
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(DeliveryError::timeout(10).to_string(), "request timed out after 10s");
        assert_eq!(DeliveryError::http_status(503).to_string(), "HTTP 503");
        assert_eq!(ErrorCategory::Http.to_string(), "http");
    }
}
