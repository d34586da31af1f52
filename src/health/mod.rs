//! Liveness monitoring of critical execution contexts.
//!
//! Provides the [`ExecutionContext`] abstraction, per-probe ping state and
//! the [`HealthMonitor`] that schedules ping cycles and derives statuses.

pub mod executor;
pub mod monitor;
pub mod probe;

pub use executor::{ExecutionContext, Job, SerialQueue};
pub use monitor::{HealthMonitor, ProbeReport};
pub use probe::{PingPhase, ProbeState, ProbeStatus, ProbeThresholds};
