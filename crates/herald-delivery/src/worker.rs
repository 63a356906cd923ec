//! Interval trigger that drives the scheduler in-process.
//!
//! The loop is an alternative to an external caller hitting `/process`.
//! Both can run at once; the claim keeps their batches disjoint.

use std::{sync::Arc, time::Duration};

use herald_core::Clock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::scheduler::BatchScheduler;

/// Runs [`BatchScheduler::process_batch`] on a fixed interval until cancelled.
pub struct TriggerLoop {
    scheduler: Arc<BatchScheduler>,
    interval: Duration,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
}

impl TriggerLoop {
    /// Creates a loop. It does nothing until [`TriggerLoop::run`] is awaited.
    pub fn new(
        scheduler: Arc<BatchScheduler>,
        interval: Duration,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { scheduler, interval, clock, cancellation_token }
    }

    /// Processes batches until the token is cancelled.
    ///
    /// A failed batch is logged and the loop waits for the next tick. A batch
    /// already in progress finishes before the loop exits.
    pub async fn run(self) {
        info!(interval_ms = self.interval.as_millis() as u64, "trigger loop starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            if let Err(e) = self.scheduler.process_batch(None).await {
                error!(error = %e, category = %e.category(), "scheduled batch failed");
            }

            tokio::select! {
                () = self.clock.sleep(self.interval) => {},
                () = self.cancellation_token.cancelled() => break,
            }
        }

        info!("trigger loop stopped");
    }
}
