//! Tracked background task model and registry snapshot types.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Terminal or pending outcome of a tracked task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Started, not yet completed or cancelled.
    Pending,
    /// Completed successfully.
    Succeeded,
    /// Completed with an error description.
    Failed(String),
    /// Cancelled with a reason.
    Cancelled(String),
}

impl TaskOutcome {
    /// Whether the outcome is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Short label used in log fields.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

/// A named asynchronous operation known to the task registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedTask {
    /// Caller-supplied unique token.
    pub id: String,
    /// Human-readable operation name (e.g. `download-model`).
    pub name: String,
    /// When `start` was recorded.
    pub started_at: Instant,
    /// Current outcome.
    pub outcome: TaskOutcome,
    /// When the terminal transition was recorded; `None` while pending.
    pub ended_at: Option<Instant>,
}

impl TrackedTask {
    /// Construct a new pending task started at `now`.
    #[must_use]
    pub fn new(id: String, name: String, now: Instant) -> Self {
        Self {
            id,
            name,
            started_at: now,
            outcome: TaskOutcome::Pending,
            ended_at: None,
        }
    }

    /// A task that never reached a terminal outcome.
    #[must_use]
    pub fn is_orphaned(&self) -> bool {
        self.outcome == TaskOutcome::Pending
    }

    /// Time elapsed since `start`, measured at `now`.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    /// Record the terminal outcome at `now`.
    pub(crate) fn finish(&mut self, outcome: TaskOutcome, now: Instant) {
        self.outcome = outcome;
        self.ended_at = Some(now);
    }
}

/// A still-pending task as it appears in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanTask {
    /// Task identifier.
    pub id: String,
    /// Task name.
    pub name: String,
    /// Age at snapshot time.
    pub age: Duration,
}

/// Aggregate registry statistics computed from one consistent view.
///
/// `total == completed + failed + cancelled + orphaned` always holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskSnapshot {
    /// Every task currently held by the registry.
    pub total: usize,
    /// Tasks that succeeded.
    pub completed: usize,
    /// Tasks that failed.
    pub failed: usize,
    /// Tasks that were cancelled.
    pub cancelled: usize,
    /// Tasks still pending.
    pub orphaned: usize,
    /// Pending tasks, oldest first.
    pub orphans: Vec<OrphanTask>,
}

impl TaskSnapshot {
    /// Whether the snapshot lists the given id as an orphan.
    #[must_use]
    pub fn has_orphan(&self, id: &str) -> bool {
        self.orphans.iter().any(|orphan| orphan.id == id)
    }
}
