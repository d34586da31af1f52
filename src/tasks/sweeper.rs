//! Timer-driven retention sweep for the task registry.
//!
//! `start` already sweeps opportunistically, but a process that stops
//! launching work would otherwise keep stale terminal records forever.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::TaskRegistry;

/// Spawn the background sweep task.
///
/// Ticks every [`TaskRegistry::sweep_interval`] and drops terminal tasks
/// older than the retention window until `cancel` fires.
#[must_use]
pub fn spawn_sweeper(registry: Arc<TaskRegistry>, cancel: CancellationToken) -> JoinHandle<()> {
    let period = registry.sweep_interval();
    let first_tick = tokio::time::Instant::now() + period;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(first_tick, period);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("task sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let removed = registry.sweep_expired();
                    debug!(removed, remaining = registry.len(), "task sweep completed");
                }
            }
        }
    })
}
