//! Process-wide diagnostics context.
//!
//! Built once at startup and handed to every component that launches
//! background work, registers an execution context, or needs the crash
//! reporter. There are no global instances.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::DiagnosticsConfig;
use crate::crash::CrashReporter;
use crate::health::{ExecutionContext, HealthMonitor};
use crate::models::crash::PriorSession;
use crate::tasks::{spawn_sweeper, TaskRegistry};
use crate::Result;

/// Owns the task registry, health monitor and crash reporter.
pub struct DiagnosticsContext {
    config: DiagnosticsConfig,
    tasks: Arc<TaskRegistry>,
    health: Arc<HealthMonitor>,
    crash: Arc<CrashReporter>,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl DiagnosticsContext {
    /// Build the context with the platform's default fault interceptors.
    #[must_use]
    pub fn new(config: DiagnosticsConfig) -> Self {
        let tasks = Arc::new(Self::registry_for(&config));
        let crash = Arc::new(CrashReporter::from_config(&config, Arc::clone(&tasks)));
        Self::assemble(config, tasks, crash)
    }

    /// Build the context around a caller-supplied crash reporter that must
    /// share `tasks`.
    #[must_use]
    pub fn with_reporter(
        config: DiagnosticsConfig,
        tasks: Arc<TaskRegistry>,
        crash: Arc<CrashReporter>,
    ) -> Self {
        Self::assemble(config, tasks, crash)
    }

    /// Task registry configured from `config.tasks`.
    #[must_use]
    pub fn registry_for(config: &DiagnosticsConfig) -> TaskRegistry {
        TaskRegistry::new(config.tasks.retention(), config.tasks.sweep_interval())
    }

    fn assemble(
        config: DiagnosticsConfig,
        tasks: Arc<TaskRegistry>,
        crash: Arc<CrashReporter>,
    ) -> Self {
        let health = Arc::new(HealthMonitor::new(
            config.health.thresholds(),
            config.health.interval(),
            config.health.ping_timeout(),
        ));
        Self {
            config,
            tasks,
            health,
            crash,
            cancel: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// Install the crash reporter, start the ping cycle and the retention
    /// sweeper. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the crash reporter's install error.
    pub fn start(&self) -> Result<PriorSession> {
        let prior = self.crash.install()?;
        self.health.start();

        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.is_none() {
            *sweeper = Some(spawn_sweeper(Arc::clone(&self.tasks), self.cancel.clone()));
        }
        info!(prior_crash = prior.crashed(), "diagnostics started");
        Ok(prior)
    }

    /// Clean shutdown: stop background work and remove the crash marker.
    pub async fn shutdown(&self) {
        self.health.stop();
        self.cancel.cancel();
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = sweeper {
            let _ = handle.await;
        }
        self.crash.uninstall();
        info!("diagnostics shut down");
    }

    /// Register an execution context for liveness probing.
    pub fn register_queue(&self, name: impl Into<String>, context: Arc<dyn ExecutionContext>) {
        self.health.register(name, context);
    }

    /// Record the start of a background task.
    pub fn track_task(&self, id: impl Into<String>, name: impl Into<String>) {
        self.tasks.start(id, name);
    }

    /// Record completion of a background task.
    pub fn task_completed(&self, id: &str, success: bool, error: Option<String>) -> bool {
        self.tasks.complete(id, success, error)
    }

    /// Record cancellation of a background task.
    pub fn task_cancelled(&self, id: &str, reason: impl Into<String>) -> bool {
        self.tasks.cancel(id, reason)
    }

    /// Run `operation` as a tracked task.
    ///
    /// # Errors
    ///
    /// Returns `operation`'s own error unchanged.
    pub async fn track<F, T, E>(
        &self,
        name: impl Into<String>,
        operation: F,
    ) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        self.tasks.track(name, operation).await
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    /// Shared task registry.
    #[must_use]
    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    /// Shared health monitor.
    #[must_use]
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Shared crash reporter.
    #[must_use]
    pub fn crash(&self) -> &Arc<CrashReporter> {
        &self.crash
    }
}
