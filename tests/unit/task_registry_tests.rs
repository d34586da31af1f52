//! Unit tests for task lifecycle tracking, orphan reporting and the
//! retention sweep.

use std::sync::Arc;
use std::time::Duration;

use whisperer_diagnostics::models::task::TaskOutcome;
use whisperer_diagnostics::tasks::{TaskRegistry, DROPPED_REASON};

const RETENTION: Duration = Duration::from_secs(300);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn registry() -> TaskRegistry {
    TaskRegistry::new(RETENTION, SWEEP_INTERVAL)
}

fn assert_buckets_add_up(registry: &TaskRegistry) {
    let snapshot = registry.snapshot();
    assert_eq!(
        snapshot.total,
        snapshot.completed + snapshot.failed + snapshot.cancelled + snapshot.orphaned,
        "every task must sit in exactly one bucket: {snapshot:?}"
    );
    assert_eq!(snapshot.orphans.len(), snapshot.orphaned);
}

#[tokio::test]
async fn started_task_is_orphaned_until_completed() {
    let registry = registry();
    registry.start("t1", "transcribe-chunk");

    let snapshot = registry.snapshot();
    assert!(snapshot.has_orphan("t1"));
    assert_eq!(snapshot.orphaned, 1);

    assert!(registry.complete("t1", true, None));

    let snapshot = registry.snapshot();
    assert!(!snapshot.has_orphan("t1"));
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.orphaned, 0);
    assert_buckets_add_up(&registry);
}

#[tokio::test]
async fn failure_and_cancellation_land_in_their_buckets() {
    let registry = registry();
    registry.start("ok", "load-model");
    registry.start("bad", "inject-text");
    registry.start("stop", "capture-audio");
    registry.start("open", "correct-dictionary");

    assert!(registry.complete("ok", true, None));
    assert!(registry.complete("bad", false, Some("accessibility denied".into())));
    assert!(registry.cancel("stop", "user released hotkey"));

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.total, 4);
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.cancelled, 1);
    assert_eq!(snapshot.orphaned, 1);
    assert!(snapshot.has_orphan("open"));

    let failed = registry.get("bad").expect("failed task kept");
    assert_eq!(
        failed.outcome,
        TaskOutcome::Failed("accessibility denied".into())
    );
    assert!(failed.ended_at.is_some());
    assert_buckets_add_up(&registry);
}

#[tokio::test]
async fn failure_without_error_text_gets_placeholder() {
    let registry = registry();
    registry.start("t1", "inject-text");
    registry.complete("t1", false, None);

    let task = registry.get("t1").expect("task kept");
    assert!(matches!(task.outcome, TaskOutcome::Failed(ref msg) if !msg.is_empty()));
}

#[tokio::test]
async fn unknown_id_never_creates_an_entry() {
    let registry = registry();

    assert!(!registry.complete("ghost", true, None));
    assert!(!registry.cancel("ghost", "nothing to cancel"));

    assert!(registry.is_empty());
    assert!(registry.get("ghost").is_none());
}

#[tokio::test]
async fn second_terminal_transition_is_rejected() {
    let registry = registry();
    registry.start("t1", "download-model");
    assert!(registry.complete("t1", false, Some("disk full".into())));

    // A later success must not mask the recorded failure.
    assert!(!registry.complete("t1", true, None));
    assert!(!registry.cancel("t1", "late cancel"));

    let task = registry.get("t1").expect("task kept");
    assert_eq!(task.outcome, TaskOutcome::Failed("disk full".into()));
    assert_eq!(registry.snapshot().failed, 1);
}

#[tokio::test]
async fn duplicate_start_overwrites_existing_entry() {
    let registry = registry();
    registry.start("t1", "first");
    registry.complete("t1", true, None);

    registry.start("t1", "second");

    let task = registry.get("t1").expect("task kept");
    assert_eq!(task.name, "second");
    assert!(task.is_orphaned());
    assert_eq!(registry.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn orphans_are_listed_oldest_first_with_ages() {
    let registry = registry();
    registry.start("old", "download-model");
    tokio::time::advance(Duration::from_secs(10)).await;
    registry.start("new", "capture-audio");
    tokio::time::advance(Duration::from_secs(2)).await;

    let snapshot = registry.snapshot();
    let ids: Vec<&str> = snapshot.orphans.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, ["old", "new"]);
    assert_eq!(snapshot.orphans[0].age, Duration::from_secs(12));
    assert_eq!(snapshot.orphans[1].age, Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn pending_task_survives_sweep_past_retention() {
    let registry = registry();
    registry.start("t1", "download-model");

    tokio::time::advance(Duration::from_secs(360)).await;

    assert_eq!(registry.sweep_expired(), 0);
    let snapshot = registry.snapshot();
    assert!(snapshot.has_orphan("t1"));
    let age = snapshot.orphans[0].age.as_secs_f64();
    assert!((age - 360.0).abs() < 0.001, "unexpected orphan age {age}");
}

#[tokio::test(start_paused = true)]
async fn terminal_task_swept_only_after_retention() {
    let registry = registry();
    registry.start("t1", "transcribe-chunk");
    registry.complete("t1", true, None);

    tokio::time::advance(RETENTION - Duration::from_secs(1)).await;
    assert_eq!(registry.sweep_expired(), 0);
    assert!(registry.get("t1").is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(registry.sweep_expired(), 1);
    assert!(registry.get("t1").is_none());
}

#[tokio::test(start_paused = true)]
async fn retention_counts_from_terminal_transition() {
    let registry = registry();
    registry.start("t1", "download-model");
    tokio::time::advance(Duration::from_secs(600)).await;
    registry.complete("t1", true, None);

    // Started long ago but only just finished: still within retention.
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(registry.sweep_expired(), 0);
}

#[tokio::test(start_paused = true)]
async fn start_sweeps_opportunistically_after_interval() {
    let registry = registry();
    registry.start("done", "load-model");
    registry.cancel("done", "superseded");
    registry.start("hung", "capture-audio");

    tokio::time::advance(RETENTION + SWEEP_INTERVAL).await;
    registry.start("fresh", "transcribe-chunk");

    assert!(registry.get("done").is_none(), "expired terminal task swept");
    assert!(registry.get("hung").is_some(), "pending task kept");
    assert!(registry.get("fresh").is_some());
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn track_completes_on_success_and_forwards_value() {
    let registry = registry();

    let value = registry
        .track("load-model", async { Ok::<_, String>(42) })
        .await
        .expect("operation succeeds");

    assert_eq!(value, 42);
    let snapshot = registry.snapshot();
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.orphaned, 0);
}

#[tokio::test]
async fn track_records_failure_and_forwards_error() {
    let registry = registry();

    let err = registry
        .track("download-model", async {
            Err::<(), _>(std::io::Error::other("connection reset"))
        })
        .await
        .expect_err("operation fails");

    assert_eq!(err.to_string(), "connection reset");
    let snapshot = registry.snapshot();
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.total, 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_track_future_is_recorded_as_cancelled() {
    let registry = registry();

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        registry.track("transcribe-chunk", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, String>(())
        }),
    )
    .await;
    assert!(outcome.is_err(), "operation should have been cut short");

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.cancelled, 1);
    assert_eq!(snapshot.orphaned, 0);
    assert!(!DROPPED_REASON.is_empty());
}

#[tokio::test]
async fn concurrent_updates_keep_buckets_consistent() {
    let registry = Arc::new(registry());
    let mut workers = Vec::new();

    for worker in 0..8 {
        let registry = Arc::clone(&registry);
        workers.push(std::thread::spawn(move || {
            for n in 0..50 {
                let id = format!("w{worker}-{n}");
                registry.start(id.clone(), "chunk");
                match n % 4 {
                    0 => {
                        registry.complete(&id, true, None);
                    }
                    1 => {
                        registry.complete(&id, false, Some("boom".into()));
                    }
                    2 => {
                        registry.cancel(&id, "stop");
                    }
                    _ => {}
                }
            }
        }));
    }

    for worker in workers {
        worker.join().expect("worker thread");
    }

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.total, 400);
    assert_eq!(snapshot.completed, 104);
    assert_eq!(snapshot.failed, 104);
    assert_eq!(snapshot.cancelled, 96);
    assert_eq!(snapshot.orphaned, 96);
    assert_buckets_add_up(&registry);
}
