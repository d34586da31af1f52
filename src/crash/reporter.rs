//! Crash reporter lifecycle: marker handling, interceptor arming and
//! platform-independent fault recording.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, info_span, warn};

use super::capture::FaultCapture;
use super::interceptor::{FaultInterceptor, PanicHookInterceptor};
use super::marker::MarkerStore;
use crate::config::DiagnosticsConfig;
use crate::models::crash::{CrashMarker, FaultDescription, PriorCrash, PriorSession};
use crate::tasks::TaskRegistry;
use crate::{AppError, Result};

/// Lifecycle of the reporter after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterState {
    /// Constructed, never installed.
    Idle,
    /// Marker written and interceptors armed.
    Armed,
    /// At least one fault has been recorded.
    Faulted,
    /// Cleanly uninstalled; marker removed.
    Uninstalled,
}

struct Inner {
    state: ReporterState,
    capture: Option<Arc<FaultCapture>>,
    interceptors: Vec<Box<dyn FaultInterceptor>>,
    prior: Option<PriorSession>,
}

/// Installs fault interceptors and keeps the crash marker and crash log.
pub struct CrashReporter {
    marker: MarkerStore,
    log_path: PathBuf,
    app_version: String,
    registry: Arc<TaskRegistry>,
    inner: Mutex<Inner>,
}

impl CrashReporter {
    /// Reporter with the platform's default interceptors, as selected by
    /// `config.crash`.
    #[must_use]
    pub fn from_config(config: &DiagnosticsConfig, registry: Arc<TaskRegistry>) -> Self {
        let mut interceptors: Vec<Box<dyn FaultInterceptor>> = Vec::new();
        if config.crash.capture_panics {
            interceptors.push(Box::new(PanicHookInterceptor::new()));
        }
        #[cfg(unix)]
        if config.crash.capture_signals {
            interceptors.push(Box::new(super::signals::SignalInterceptor::new()));
        }

        Self::new(
            config.marker_path(),
            config.crash_log_path(),
            config.app_version.clone(),
            registry,
            interceptors,
        )
    }

    /// Reporter with an explicit interceptor set. An empty set yields a
    /// reporter that manages the marker and records faults only when
    /// [`record_fault`](Self::record_fault) is called directly.
    #[must_use]
    pub fn new(
        marker_path: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
        app_version: impl Into<String>,
        registry: Arc<TaskRegistry>,
        interceptors: Vec<Box<dyn FaultInterceptor>>,
    ) -> Self {
        Self {
            marker: MarkerStore::new(marker_path),
            log_path: log_path.into(),
            app_version: app_version.into(),
            registry,
            inner: Mutex::new(Inner {
                state: ReporterState::Idle,
                capture: None,
                interceptors,
                prior: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check for a stale marker, write a fresh one and arm the interceptors.
    ///
    /// A stale marker is reported once, then deleted. Installing a reporter
    /// that is armed or has already recorded a fault logs a warning and
    /// returns the original result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Signal` if an interceptor cannot be armed. Marker
    /// persistence failures are logged and never fail the install.
    pub fn install(&self) -> Result<PriorSession> {
        let _span = info_span!("crash_reporter_install").entered();
        let mut inner = self.lock();

        if inner.capture.is_some() {
            warn!(state = ?inner.state, "crash reporter already installed");
            return Ok(inner.prior.clone().unwrap_or(PriorSession::NoPriorMarker));
        }

        let prior = self.take_prior_marker();
        inner.prior = Some(prior.clone());

        let marker = CrashMarker::current(self.app_version.clone());
        if let Err(err) = self.marker.write(&marker) {
            warn!(%err, "failed to write crash marker");
        }

        let capture = Arc::new(FaultCapture::new(
            Arc::clone(&self.registry),
            self.log_path.clone(),
        ));

        let mut armed = 0usize;
        let mut failure = None;
        for interceptor in &mut inner.interceptors {
            if let Err(err) = interceptor.arm(Arc::clone(&capture)) {
                error!(interceptor = interceptor.name(), %err, "failed to arm fault interceptor");
                failure = Some(err);
                break;
            }
            armed += 1;
        }

        if let Some(err) = failure {
            for interceptor in inner.interceptors.iter_mut().take(armed) {
                interceptor.disarm();
            }
            if let Err(remove_err) = self.marker.remove() {
                warn!(%remove_err, "failed to delete crash marker after failed install");
            }
            return Err(err);
        }

        inner.capture = Some(capture);
        inner.state = ReporterState::Armed;
        info!(
            pid = marker.pid,
            version = %marker.app_version,
            interceptors = armed,
            "crash reporter installed"
        );
        Ok(prior)
    }

    fn take_prior_marker(&self) -> PriorSession {
        let Some(raw) = self.marker.read() else {
            debug!("no crash marker from a previous session");
            return PriorSession::NoPriorMarker;
        };

        let marker = CrashMarker::parse(&raw);
        match &marker {
            Some(marker) => error!(
                session_start = %marker.session_start.to_rfc3339(),
                pid = marker.pid,
                version = %marker.app_version,
                "previous session crashed"
            ),
            None => error!(contents = %raw.trim(), "previous session crashed"),
        }

        if let Err(err) = self.marker.remove() {
            warn!(%err, "failed to delete stale crash marker");
        }
        PriorSession::PriorCrashDetected(PriorCrash { raw, marker })
    }

    /// Disarm the interceptors and delete the marker.
    ///
    /// Call on every intentional shutdown path; skipping it leaves the
    /// marker as crash evidence for the next launch.
    pub fn uninstall(&self) {
        let mut inner = self.lock();
        if matches!(inner.state, ReporterState::Idle | ReporterState::Uninstalled) {
            debug!("crash reporter not installed; nothing to uninstall");
            return;
        }

        for interceptor in &mut inner.interceptors {
            interceptor.disarm();
        }
        inner.capture = None;
        inner.state = ReporterState::Uninstalled;
        drop(inner);

        match self.marker.remove() {
            Ok(_) => info!("crash reporter uninstalled"),
            Err(err) => warn!(%err, "failed to delete crash marker on shutdown"),
        }
    }

    /// Append a crash block for `fault` to the crash log.
    ///
    /// Platform-independent entry point used by the interceptors and usable
    /// directly with synthetic faults. Best-effort; returns whether the
    /// block was written.
    pub fn record_fault(&self, fault: &FaultDescription) -> bool {
        let capture = {
            let mut inner = self.lock();
            if inner.state == ReporterState::Armed {
                inner.state = ReporterState::Faulted;
            }
            inner.capture.clone()
        };
        match capture {
            Some(capture) => capture.record(fault),
            None => FaultCapture::new(Arc::clone(&self.registry), self.log_path.clone())
                .record(fault),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ReporterState {
        let inner = self.lock();
        match (&inner.state, &inner.capture) {
            (ReporterState::Armed, Some(capture)) if capture.recorded() > 0 => {
                ReporterState::Faulted
            }
            (state, _) => *state,
        }
    }

    /// What the last [`install`](Self::install) found.
    #[must_use]
    pub fn prior_session(&self) -> Option<PriorSession> {
        self.lock().prior.clone()
    }

    /// Marker file location.
    #[must_use]
    pub fn marker_path(&self) -> &Path {
        self.marker.path()
    }

    /// Crash log location.
    #[must_use]
    pub fn crash_log_path(&self) -> &Path {
        &self.log_path
    }

    /// Full crash log text; empty when no crash was ever recorded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the log exists but cannot be read.
    pub fn read_crash_log(&self) -> Result<String> {
        match fs::read_to_string(&self.log_path) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(AppError::Io(format!(
                "failed to read crash log {}: {err}",
                self.log_path.display()
            ))),
        }
    }
}
