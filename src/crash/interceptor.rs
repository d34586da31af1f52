//! Platform adapters that route fatal events into a [`FaultCapture`].

use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::capture::FaultCapture;
use crate::models::crash::FaultDescription;
use crate::Result;

/// A process-wide fatal-event hook.
///
/// Interceptors only observe: after capture, the platform's own fatal
/// behavior must proceed unchanged.
pub trait FaultInterceptor: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Start routing fatal events to `capture`.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses the registration.
    fn arm(&mut self, capture: Arc<FaultCapture>) -> Result<()>;

    /// Stop routing events and restore whatever was installed before.
    fn disarm(&mut self);
}

type PanicHook = dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static;

/// Captures panics via [`std::panic::set_hook`], then defers to the hook
/// that was installed before it.
#[derive(Default)]
pub struct PanicHookInterceptor {
    previous: Option<Arc<PanicHook>>,
    active: Arc<AtomicBool>,
}

impl PanicHookInterceptor {
    /// Unarmed interceptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FaultInterceptor for PanicHookInterceptor {
    fn name(&self) -> &'static str {
        "panic-hook"
    }

    fn arm(&mut self, capture: Arc<FaultCapture>) -> Result<()> {
        if self.previous.is_some() {
            return Ok(());
        }

        let previous: Arc<PanicHook> = Arc::from(panic::take_hook());
        let chained = Arc::clone(&previous);
        let active = Arc::new(AtomicBool::new(true));
        let hook_active = Arc::clone(&active);

        panic::set_hook(Box::new(move |info| {
            if hook_active.load(Ordering::SeqCst) {
                capture.record(&FaultDescription::from_panic(info));
            }
            chained(info);
        }));

        self.previous = Some(previous);
        self.active = active;
        debug!("panic hook armed");
        Ok(())
    }

    fn disarm(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(previous) = self.previous.take() {
            drop(panic::take_hook());
            panic::set_hook(Box::new(move |info| previous(info)));
            debug!("panic hook restored");
        }
    }
}

impl Drop for PanicHookInterceptor {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}
