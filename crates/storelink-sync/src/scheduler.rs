//! # Re-arming Scheduler
//!
//! Drives the pipeline: each stage invocation computes its own next delay,
//! and the scheduler sleeps and re-invokes until the run reaches a terminal
//! state. There is no fixed fine-grained interval and no overlap: a stage
//! is never invoked again before its previous invocation has returned.
//!
//! Also hosts the recurring immediate-order queue drain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use storelink_core::schedule::ORDER_QUEUE_DRAIN_INTERVAL;
use storelink_core::{SyncResource, SyncRun};

use crate::error::{SyncError, SyncResult};
use crate::runner::{NextTick, SyncPipeline};

// =============================================================================
// Run-to-completion Loop
// =============================================================================

/// Starts a run for the resource and drives it until it completes, fails,
/// or is superseded. Returns the final run state.
///
/// Long catalogs make this loop sleep for real wall-clock stretches (61
/// minutes between product batches); the process must stay alive for the
/// duration, exactly like the scheduled environment this models.
pub async fn run_to_completion(
    pipeline: &SyncPipeline,
    resource: SyncResource,
) -> SyncResult<SyncRun> {
    let run = pipeline.start(resource).await?;
    info!(resource = %resource, run_id = %run.run_id, "Sync run started");

    loop {
        match pipeline.tick(resource, &run.run_id).await? {
            NextTick::After(delay) => {
                debug!(resource = %resource, ?delay, "Sleeping until next invocation");
                tokio::time::sleep(delay).await;
            }
            NextTick::Completed => {
                info!(resource = %resource, "Sync run completed");
                break;
            }
            NextTick::Failed(reason) => {
                warn!(resource = %resource, reason = %reason, "Sync run failed");
                break;
            }
            NextTick::Stale => {
                info!(resource = %resource, "Sync run superseded, stopping");
                break;
            }
        }
    }

    pipeline.status(resource).await
}

// =============================================================================
// Immediate-order Queue Drain
// =============================================================================

/// Recurring drain of the immediate-order queue.
pub struct OrderQueueDrain {
    pipeline: Arc<SyncPipeline>,

    /// Shutdown receiver.
    shutdown_rx: mpsc::Receiver<()>,

    /// Drain cadence; overridable for tests.
    interval: Duration,
}

/// Handle for stopping the drain loop.
#[derive(Clone)]
pub struct OrderQueueDrainHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl OrderQueueDrainHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::Internal("Shutdown channel closed".into()))
    }
}

impl OrderQueueDrain {
    /// Creates a new drain loop and returns a handle.
    pub fn new(pipeline: Arc<SyncPipeline>) -> (Self, OrderQueueDrainHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let drain = OrderQueueDrain {
            pipeline,
            shutdown_rx,
            interval: ORDER_QUEUE_DRAIN_INTERVAL,
        };

        (drain, OrderQueueDrainHandle { shutdown_tx })
    }

    /// Runs the drain loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!(interval = ?self.interval, "Order queue drain starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.pipeline.sync_queued_orders().await {
                        Ok(0) => debug!("No queued orders"),
                        Ok(synced) => info!(synced, "Drained queued orders"),
                        Err(e) => error!(?e, "Failed to drain order queue"),
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Order queue drain shutting down");
                    break;
                }
            }
        }

        info!("Order queue drain stopped");
    }
}
