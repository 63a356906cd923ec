//! Herald outbox event delivery worker.
//!
//! Loads configuration, prepares the database, wires the scheduler and serves
//! the control plane. An optional interval trigger processes batches without
//! an external caller.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use herald_api::{AppState, Config};
use herald_core::{storage::Storage, Clock, RealClock};
use herald_delivery::{
    BatchScheduler, DeliveryExecutor, EventProcessor, PostgresStorage, TriggerLoop,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log);

    info!(
        database_url = %config.database_url_masked(),
        batch_size = config.batch_size,
        concurrency = config.worker_concurrency,
        "starting herald outbox worker"
    );

    let pool = create_database_pool(&config).await?;
    herald_core::storage::migrate(&pool).await.context("failed to apply database schema")?;
    info!("database schema ready");

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let storage = PostgresStorage::new(Arc::new(Storage::new(pool.clone())));

    let executor = Arc::new(DeliveryExecutor::new(
        config.to_client_config(),
        Arc::new(storage.clone()),
        clock.clone(),
    )?);
    let processor = Arc::new(EventProcessor::new(
        Arc::new(storage.clone()),
        executor,
        config.to_backoff_policy(),
        clock.clone(),
    ));
    let scheduler = Arc::new(BatchScheduler::new(
        Arc::new(storage),
        processor,
        clock.clone(),
        config.to_scheduler_config(),
    )?);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            herald_api::shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let trigger = config.process_interval().map(|interval| {
        info!(interval_secs = interval.as_secs(), "interval trigger enabled");
        let trigger = TriggerLoop::new(scheduler.clone(), interval, clock.clone(), shutdown.clone());
        tokio::spawn(trigger.run())
    });

    let addr = config.parse_server_addr()?;
    let state = AppState::new(scheduler, clock);
    if let Err(e) = herald_api::start_server(
        state,
        addr,
        Duration::from_secs(config.request_timeout),
        shutdown.clone().cancelled_owned(),
    )
    .await
    {
        error!(error = %e, "control plane failed");
        shutdown.cancel();
    }

    if let Some(handle) = trigger {
        if let Err(e) = handle.await {
            warn!(error = %e, "interval trigger ended abnormally");
        }
    }

    pool.close().await;
    info!("herald shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins; the configured directive is the fallback.
fn init_tracing(fallback: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Connects to PostgreSQL, retrying while the database comes up.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => return Err(e).context("failed to connect to database"),
        }
    }
}
