//! Configuration for the Herald outbox worker.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use herald_delivery::{BackoffPolicy, ClientConfig, SchedulerConfig};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "herald.toml";

/// Worker configuration.
///
/// Loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`herald.toml`)
/// 3. Built-in defaults
///
/// Everything the worker needs is read here once and handed to the
/// components as plain structs. Nothing below the binary reads the
/// environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `DATABASE_URL`
    #[serde(default = "default_database_url", alias = "DATABASE_URL")]
    pub database_url: String,
    /// Maximum number of pooled connections.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,
    /// Connections kept open when idle.
    ///
    /// Environment variable: `DATABASE_MIN_CONNECTIONS`
    #[serde(default = "default_min_connections", alias = "DATABASE_MIN_CONNECTIONS")]
    pub database_min_connections: u32,
    /// Connection acquire timeout in seconds.
    ///
    /// Environment variable: `DATABASE_CONNECTION_TIMEOUT`
    #[serde(default = "default_acquire_timeout", alias = "DATABASE_CONNECTION_TIMEOUT")]
    pub database_connection_timeout: u64,

    // Server
    /// Control plane bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Control plane port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// Control plane request timeout in seconds. Must cover one full batch.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    // Scheduling
    /// Events claimed per batch when `/process` gives no limit.
    ///
    /// Environment variable: `BATCH_SIZE`
    #[serde(default = "default_batch_size", alias = "BATCH_SIZE")]
    pub batch_size: usize,
    /// Events processed concurrently within a batch.
    ///
    /// Environment variable: `WORKER_CONCURRENCY`
    #[serde(default = "default_concurrency", alias = "WORKER_CONCURRENCY")]
    pub worker_concurrency: usize,
    /// Seconds after which unstarted events are released.
    ///
    /// Environment variable: `BATCH_DEADLINE_SECONDS`
    #[serde(default = "default_batch_deadline", alias = "BATCH_DEADLINE_SECONDS")]
    pub batch_deadline_seconds: u64,
    /// Seconds a claim hides an event from other claimers.
    ///
    /// Environment variable: `CLAIM_LEASE_SECONDS`
    #[serde(default = "default_claim_lease", alias = "CLAIM_LEASE_SECONDS")]
    pub claim_lease_seconds: u64,
    /// Interval of the in-process trigger in seconds. `0` disables it.
    ///
    /// Environment variable: `PROCESS_INTERVAL_SECONDS`
    #[serde(default, alias = "PROCESS_INTERVAL_SECONDS")]
    pub process_interval_seconds: u64,

    // Delivery
    /// Per-request webhook timeout in seconds.
    ///
    /// Environment variable: `DELIVERY_TIMEOUT_SECONDS`
    #[serde(default = "default_delivery_timeout", alias = "DELIVERY_TIMEOUT_SECONDS")]
    pub delivery_timeout_seconds: u64,
    /// `User-Agent` sent to receivers.
    ///
    /// Environment variable: `USER_AGENT`
    #[serde(default = "default_user_agent", alias = "USER_AGENT")]
    pub user_agent: String,

    // Retry
    /// Delay before the first retry in milliseconds.
    ///
    /// Environment variable: `RETRY_INITIAL_DELAY_MS`
    #[serde(default = "default_initial_delay_ms", alias = "RETRY_INITIAL_DELAY_MS")]
    pub retry_initial_delay_ms: u64,
    /// Growth factor between retries.
    ///
    /// Environment variable: `RETRY_BACKOFF_FACTOR`
    #[serde(default = "default_backoff_factor", alias = "RETRY_BACKOFF_FACTOR")]
    pub retry_backoff_factor: f64,

    // Logging
    /// Log filter directive, used when `RUST_LOG` is not parseable.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Loads defaults, then `herald.toml`, then the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed or fails validation.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// The layered provider chain used by [`Config::load`].
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""))
    }

    /// Extracts and validates a configuration from `figment`.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed or fails validation.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Scheduler limits.
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.batch_size,
            concurrency: self.worker_concurrency,
            batch_deadline: Duration::from_secs(self.batch_deadline_seconds),
            claim_lease: Duration::from_secs(self.claim_lease_seconds),
        }
    }

    /// Outbound HTTP client settings.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.delivery_timeout_seconds),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Default backoff for webhooks without an override.
    pub fn to_backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::from_millis(self.retry_initial_delay_ms, self.retry_backoff_factor)
    }

    /// Interval of the in-process trigger, if enabled.
    pub fn process_interval(&self) -> Option<Duration> {
        (self.process_interval_seconds > 0)
            .then(|| Duration::from_secs(self.process_interval_seconds))
    }

    /// Control plane socket address.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr).context("invalid server address")
    }

    /// Database URL with the password masked, for logging.
    pub fn database_url_masked(&self) -> String {
        if let Some(at) = self.database_url.find('@') {
            if let Some(colon) = self.database_url[..at].rfind(':') {
                let mut masked = self.database_url.clone();
                masked.replace_range(colon + 1..at, "***");
                return masked;
            }
        }
        self.database_url.clone()
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }
        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be greater than 0");
        }
        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database_min_connections cannot exceed database_max_connections");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }
        if self.worker_concurrency == 0 {
            anyhow::bail!("worker_concurrency must be greater than 0");
        }
        if self.delivery_timeout_seconds == 0 {
            anyhow::bail!("delivery_timeout_seconds must be greater than 0");
        }
        if !(self.retry_backoff_factor.is_finite() && self.retry_backoff_factor > 0.0) {
            anyhow::bail!("retry_backoff_factor must be a positive number");
        }
        if self.claim_lease_seconds < self.batch_deadline_seconds + self.delivery_timeout_seconds {
            anyhow::bail!(
                "claim_lease_seconds must cover batch_deadline_seconds plus delivery_timeout_seconds"
            );
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_connection_timeout: default_acquire_timeout(),
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            batch_size: default_batch_size(),
            worker_concurrency: default_concurrency(),
            batch_deadline_seconds: default_batch_deadline(),
            claim_lease_seconds: default_claim_lease(),
            process_interval_seconds: 0,
            delivery_timeout_seconds: default_delivery_timeout(),
            user_agent: default_user_agent(),
            retry_initial_delay_ms: default_initial_delay_ms(),
            retry_backoff_factor: default_backoff_factor(),
            rust_log: default_log_level(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/herald".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    90
}

fn default_batch_size() -> usize {
    herald_delivery::DEFAULT_BATCH_SIZE
}

fn default_concurrency() -> usize {
    herald_delivery::DEFAULT_CONCURRENCY
}

fn default_batch_deadline() -> u64 {
    herald_delivery::DEFAULT_BATCH_DEADLINE_SECONDS
}

fn default_claim_lease() -> u64 {
    herald_delivery::DEFAULT_CLAIM_LEASE_SECONDS
}

fn default_delivery_timeout() -> u64 {
    herald_delivery::DEFAULT_DELIVERY_TIMEOUT_SECONDS
}

fn default_user_agent() -> String {
    herald_delivery::DEFAULT_USER_AGENT.to_string()
}

fn default_initial_delay_ms() -> u64 {
    5_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_log_level() -> String {
    "info".to_string()
}
