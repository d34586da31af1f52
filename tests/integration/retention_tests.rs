//! Integration tests for the timer-driven retention sweep.
//!
//! Validates:
//! - Terminal tasks older than the retention window are dropped
//! - Pending tasks are never dropped
//! - Cancelling the token stops the sweeper

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use whisperer_diagnostics::tasks::{spawn_sweeper, TaskRegistry};

const RETENTION: Duration = Duration::from_secs(300);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn sweeper_drops_expired_terminal_tasks_only() {
    let registry = Arc::new(TaskRegistry::new(RETENTION, SWEEP_INTERVAL));
    let cancel = CancellationToken::new();
    let handle = spawn_sweeper(Arc::clone(&registry), cancel.clone());

    registry.start("done", "transcribe-chunk");
    registry.complete("done", true, None);
    registry.start("hung", "download-model");

    tokio::time::advance(RETENTION - SWEEP_INTERVAL).await;
    settle().await;
    assert_eq!(registry.len(), 2, "inside retention nothing is swept");

    tokio::time::advance(SWEEP_INTERVAL * 2).await;
    settle().await;
    assert!(registry.get("done").is_none());
    assert!(registry.snapshot().has_orphan("hung"));

    cancel.cancel();
    handle.await.expect("sweeper exits cleanly");
}

#[tokio::test(start_paused = true)]
async fn cancelled_sweeper_stops_before_first_tick() {
    let registry = Arc::new(TaskRegistry::new(RETENTION, SWEEP_INTERVAL));
    let cancel = CancellationToken::new();
    let handle = spawn_sweeper(Arc::clone(&registry), cancel.clone());

    registry.start("done", "load-model");
    registry.cancel("done", "user quit");
    cancel.cancel();
    handle.await.expect("sweeper exits cleanly");

    tokio::time::advance(RETENTION * 2).await;
    settle().await;
    assert!(registry.get("done").is_some(), "no sweep after cancellation");
}
