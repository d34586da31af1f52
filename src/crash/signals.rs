//! Fatal-signal interception on Unix.
//!
//! The handler records one report through the armed [`FaultCapture`], puts
//! the default disposition back and re-raises, so the process still dies the
//! way it would have without us.

#![allow(unsafe_code)]

use std::ffi::c_int;
use std::sync::{Arc, Mutex, PoisonError};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::{debug, info};

use super::capture::FaultCapture;
use super::interceptor::FaultInterceptor;
use crate::models::crash::FaultDescription;
use crate::{AppError, Result};

/// Signals treated as fatal faults.
pub const FATAL_SIGNALS: [Signal; 6] = [
    Signal::SIGABRT,
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGTRAP,
];

/// Capture target for the process-wide handler. Only `try_lock`ed from the
/// handler.
static ARMED_CAPTURE: Mutex<Option<Arc<FaultCapture>>> = Mutex::new(None);

/// Describe `signal` as a fault.
#[must_use]
pub fn describe(signal: Signal) -> FaultDescription {
    FaultDescription::Signal {
        name: signal.as_str(),
        number: signal as i32,
    }
}

/// Record `signal` through `capture` (if any), then hand the signal to
/// `reraise`.
///
/// This is the whole handler minus the OS plumbing; `reraise` is always
/// called, whether or not the capture succeeded.
pub fn capture_signal<R>(capture: Option<&FaultCapture>, signal: Signal, reraise: R)
where
    R: FnOnce(Signal),
{
    if let Some(capture) = capture {
        capture.record_in_signal_context(&describe(signal));
    }
    reraise(signal);
}

/// Restore `SIG_DFL` for `signal` and raise it again.
pub fn restore_default_and_raise(signal: Signal) {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: installing SIG_DFL does not run any Rust code.
    let _ = unsafe { signal::sigaction(signal, &default) };
    let _ = signal::raise(signal);
}

extern "C" fn handle_fatal_signal(signum: c_int) {
    let Ok(signal) = Signal::try_from(signum) else {
        return;
    };
    let capture = ARMED_CAPTURE
        .try_lock()
        .ok()
        .and_then(|armed| armed.as_ref().map(Arc::clone));
    capture_signal(capture.as_deref(), signal, restore_default_and_raise);
}

/// Installs `sigaction` handlers for [`FATAL_SIGNALS`].
#[derive(Default)]
pub struct SignalInterceptor {
    previous: Vec<(Signal, SigAction)>,
}

impl SignalInterceptor {
    /// Unarmed interceptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn restore_previous(&mut self) {
        for (signal, action) in self.previous.drain(..).rev() {
            // SAFETY: restores a disposition previously returned by sigaction.
            if let Err(err) = unsafe { signal::sigaction(signal, &action) } {
                debug!(signal = signal.as_str(), %err, "failed to restore signal disposition");
            }
        }
    }
}

impl FaultInterceptor for SignalInterceptor {
    fn name(&self) -> &'static str {
        "fatal-signals"
    }

    fn arm(&mut self, capture: Arc<FaultCapture>) -> Result<()> {
        if !self.previous.is_empty() {
            return Ok(());
        }

        *ARMED_CAPTURE.lock().unwrap_or_else(PoisonError::into_inner) = Some(capture);

        let action = SigAction::new(
            SigHandler::Handler(handle_fatal_signal),
            SaFlags::SA_ONSTACK,
            SigSet::empty(),
        );
        for signal in FATAL_SIGNALS {
            // SAFETY: the handler only touches atomics, try_lock'ed state,
            // a preallocated buffer and write(2) before re-raising.
            match unsafe { signal::sigaction(signal, &action) } {
                Ok(previous) => self.previous.push((signal, previous)),
                Err(err) => {
                    self.disarm();
                    return Err(AppError::Signal(format!(
                        "failed to install handler for {}: {err}",
                        signal.as_str()
                    )));
                }
            }
        }

        info!(signals = FATAL_SIGNALS.len(), "fatal signal handlers installed");
        Ok(())
    }

    fn disarm(&mut self) {
        self.restore_previous();
        *ARMED_CAPTURE.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
