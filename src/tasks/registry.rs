//! In-memory registry of background task lifecycles.
//!
//! Every operation takes the single map lock for a short, synchronous
//! critical section. Only [`TaskRegistry::track`] suspends, and it never
//! holds the lock across its `.await`.

use std::collections::HashMap;
use std::fmt::{self, Display, Write};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::task::{OrphanTask, TaskOutcome, TaskSnapshot, TrackedTask};

/// Reason recorded when a `track` future is dropped mid-operation.
pub const DROPPED_REASON: &str = "dropped before completion";

struct RegistryState {
    tasks: HashMap<String, TrackedTask>,
    last_sweep: Instant,
}

/// Records start, completion and cancellation of named async operations.
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
    retention: Duration,
    sweep_interval: Duration,
}

impl TaskRegistry {
    /// Create an empty registry.
    ///
    /// * `retention`: minimum time a terminal task stays visible.
    /// * `sweep_interval`: minimum spacing of opportunistic sweeps.
    #[must_use]
    pub fn new(retention: Duration, sweep_interval: Duration) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                tasks: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            retention,
            sweep_interval,
        }
    }

    /// Retention window applied by the sweep.
    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Spacing between sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new pending task.
    ///
    /// Reusing an id that is already present overwrites the existing entry
    /// and logs a warning.
    pub fn start(&self, id: impl Into<String>, name: impl Into<String>) {
        let id = id.into();
        let name = name.into();
        let now = Instant::now();
        let mut state = self.lock();

        if now.saturating_duration_since(state.last_sweep) >= self.sweep_interval {
            let removed = Self::sweep_locked(&mut state, self.retention, now);
            if removed > 0 {
                debug!(removed, "opportunistic task sweep");
            }
        }

        if let Some(previous) = state.tasks.get(&id) {
            warn!(
                task_id = %id,
                previous_name = %previous.name,
                previous_outcome = previous.outcome.label(),
                "task id reused; overwriting existing entry"
            );
        }

        debug!(task_id = %id, task_name = %name, "task started");
        state
            .tasks
            .insert(id.clone(), TrackedTask::new(id, name, now));
    }

    /// Record completion of a pending task.
    ///
    /// Returns `true` when the transition was applied. Unknown or already
    /// terminal ids are logged and leave the registry untouched.
    pub fn complete(&self, id: &str, success: bool, error: Option<String>) -> bool {
        let outcome = if success {
            TaskOutcome::Succeeded
        } else {
            TaskOutcome::Failed(error.unwrap_or_else(|| "unspecified error".to_owned()))
        };
        self.finish(id, outcome)
    }

    /// Record cancellation of a pending task.
    ///
    /// Same misuse handling as [`complete`](Self::complete).
    pub fn cancel(&self, id: &str, reason: impl Into<String>) -> bool {
        self.finish(id, TaskOutcome::Cancelled(reason.into()))
    }

    fn finish(&self, id: &str, outcome: TaskOutcome) -> bool {
        let now = Instant::now();
        let mut state = self.lock();

        let Some(task) = state.tasks.get_mut(id) else {
            warn!(
                task_id = id,
                outcome = outcome.label(),
                "terminal transition for unknown task id"
            );
            return false;
        };

        if task.outcome.is_terminal() {
            warn!(
                task_id = id,
                recorded = task.outcome.label(),
                attempted = outcome.label(),
                "task already terminal; ignoring duplicate transition"
            );
            return false;
        }

        match &outcome {
            TaskOutcome::Failed(error) => {
                warn!(task_id = id, task_name = %task.name, %error, "task failed");
            }
            TaskOutcome::Cancelled(reason) => {
                debug!(task_id = id, task_name = %task.name, %reason, "task cancelled");
            }
            _ => debug!(task_id = id, task_name = %task.name, "task completed"),
        }

        task.finish(outcome, now);
        true
    }

    /// Look up a task by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TrackedTask> {
        self.lock().tasks.get(id).cloned()
    }

    /// Number of tasks currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Whether the registry holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    /// Aggregate statistics and the orphan list from one consistent view.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        let now = Instant::now();
        let state = self.lock();

        let mut snapshot = TaskSnapshot {
            total: state.tasks.len(),
            ..TaskSnapshot::default()
        };

        for task in state.tasks.values() {
            match task.outcome {
                TaskOutcome::Pending => {
                    snapshot.orphaned += 1;
                    snapshot.orphans.push(OrphanTask {
                        id: task.id.clone(),
                        name: task.name.clone(),
                        age: task.age(now),
                    });
                }
                TaskOutcome::Succeeded => snapshot.completed += 1,
                TaskOutcome::Failed(_) => snapshot.failed += 1,
                TaskOutcome::Cancelled(_) => snapshot.cancelled += 1,
            }
        }
        drop(state);

        snapshot
            .orphans
            .sort_by(|a, b| b.age.cmp(&a.age).then_with(|| a.id.cmp(&b.id)));
        snapshot
    }

    /// Remove terminal tasks that finished longer ago than the retention
    /// window. Pending tasks are never removed.
    ///
    /// Returns the number of removed records.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        Self::sweep_locked(&mut state, self.retention, now)
    }

    fn sweep_locked(state: &mut RegistryState, retention: Duration, now: Instant) -> usize {
        let before = state.tasks.len();
        state.tasks.retain(|_, task| match task.ended_at {
            Some(ended) => now.saturating_duration_since(ended) <= retention,
            None => true,
        });
        state.last_sweep = now;
        before - state.tasks.len()
    }

    /// Run `operation` as a tracked task named `name`.
    ///
    /// The task is completed as succeeded or failed from the operation's
    /// `Result`, which is returned unchanged. Dropping the returned future
    /// before the operation finishes records the task as cancelled.
    ///
    /// # Errors
    ///
    /// Returns `operation`'s own error unchanged.
    pub async fn track<F, T, E>(&self, name: impl Into<String>, operation: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let id = Uuid::new_v4().to_string();
        self.start(id.clone(), name);

        let mut guard = TrackGuard {
            registry: self,
            id,
            armed: true,
        };

        let result = operation.await;
        guard.armed = false;

        match &result {
            Ok(_) => self.complete(&guard.id, true, None),
            Err(err) => self.complete(&guard.id, false, Some(err.to_string())),
        };
        result
    }

    /// Render the statistics and orphan sections of a crash report.
    ///
    /// Uses `try_lock` so a fault raised while the lock is held cannot
    /// deadlock, and walks the map without allocating.
    ///
    /// # Errors
    ///
    /// Propagates the writer's [`fmt::Error`].
    pub fn write_statistics<W: Write>(&self, out: &mut W) -> fmt::Result {
        let now = Instant::now();
        let state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return out.write_str("Task Statistics: unavailable (registry busy)\n");
            }
        };

        let (mut completed, mut failed, mut cancelled, mut orphaned) = (0_usize, 0, 0, 0);
        for task in state.tasks.values() {
            match task.outcome {
                TaskOutcome::Pending => orphaned += 1,
                TaskOutcome::Succeeded => completed += 1,
                TaskOutcome::Failed(_) => failed += 1,
                TaskOutcome::Cancelled(_) => cancelled += 1,
            }
        }

        writeln!(out, "Task Statistics:")?;
        writeln!(out, "  Total: {}", state.tasks.len())?;
        writeln!(out, "  Completed: {completed}")?;
        writeln!(out, "  Failed: {failed}")?;
        writeln!(out, "  Cancelled: {cancelled}")?;
        writeln!(out, "  Orphaned: {orphaned}")?;

        if orphaned > 0 {
            writeln!(out)?;
            writeln!(out, "Orphaned Tasks:")?;
            for task in state.tasks.values().filter(|task| task.is_orphaned()) {
                writeln!(
                    out,
                    "  - [{}] {} (age: {:.1}s)",
                    task.id,
                    task.name,
                    task.age(now).as_secs_f64()
                )?;
            }
        }

        Ok(())
    }
}

struct TrackGuard<'a> {
    registry: &'a TaskRegistry,
    id: String,
    armed: bool,
}

impl Drop for TrackGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.cancel(&self.id, DROPPED_REASON);
        }
    }
}
