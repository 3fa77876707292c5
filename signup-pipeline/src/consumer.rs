//! Worker run loop.
//!
//! Drives `NotificationWorker::run_cycle` until SIGINT/SIGTERM. Items left
//! unsettled by an interrupted cycle go back to the queue when the channel
//! closes.

use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{error, info};

use signup_pipeline::{shutdown_signal, NotificationWorker};

/// Run cycles until a shutdown signal arrives.
///
/// An empty batch or a failed receive waits `poll_interval` before the next
/// cycle.
pub async fn run(worker: &NotificationWorker, poll_interval: Duration) -> Result<()> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!(poll_interval_ms = poll_interval.as_millis() as u64, "worker_ready");

    loop {
        let idle = tokio::select! {
            _ = &mut shutdown => {
                info!("worker_stopping");
                break;
            }
            result = worker.run_cycle() => {
                match result {
                    Ok(report) => report.received == 0,
                    Err(e) => {
                        error!(error = %e, "worker_receive_failed");
                        true
                    }
                }
            }
        };

        if idle {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("worker_stopping");
                    break;
                }
                _ = sleep(poll_interval) => {}
            }
        }
    }

    Ok(())
}
