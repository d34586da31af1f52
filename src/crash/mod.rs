//! Fault capture and crash-on-previous-run detection.
//!
//! [`CrashReporter`] owns the session marker and the crash log. The OS hooks
//! live behind [`FaultInterceptor`]; report building in [`FaultCapture`] and
//! [`report`] is plain code that tests drive with synthetic faults.

pub mod capture;
pub mod interceptor;
pub mod marker;
pub mod report;
pub mod reporter;
#[cfg(unix)]
pub mod signals;

pub use capture::FaultCapture;
pub use interceptor::{FaultInterceptor, PanicHookInterceptor};
pub use marker::MarkerStore;
pub use reporter::{CrashReporter, ReporterState};
#[cfg(unix)]
pub use signals::SignalInterceptor;
