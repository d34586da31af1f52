//! Background task lifecycle tracking.
//!
//! [`TaskRegistry`] is the source of truth for which operations are in
//! flight; the crash reporter reads it to list orphans at fault time.

pub mod registry;
pub mod sweeper;

pub use registry::{TaskRegistry, DROPPED_REASON};
pub use sweeper::spawn_sweeper;
