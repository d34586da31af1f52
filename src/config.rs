//! Diagnostics configuration parsing and validation.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::health::ProbeThresholds;
use crate::{AppError, Result};

/// Task registry retention settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskConfig {
    /// Minimum age of a terminal task record before the sweep may drop it.
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: u64,
    /// Minimum spacing between two retention sweeps.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            retention_seconds: default_retention_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl TaskConfig {
    /// Retention window as a [`Duration`].
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    /// Sweep spacing as a [`Duration`].
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

fn default_retention_seconds() -> u64 {
    300
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

/// Liveness probe cadence and classification thresholds (milliseconds).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    /// Spacing between two ping cycles.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Delay after which an unacknowledged ping counts as a timeout.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Outstanding wait above which a probe is degraded.
    #[serde(default = "default_warn_latency_ms")]
    pub warn_latency_ms: u64,
    /// Outstanding wait above which a probe is unresponsive.
    #[serde(default = "default_fail_latency_ms")]
    pub fail_latency_ms: u64,
    /// Consecutive timeouts that mark a probe unresponsive.
    #[serde(default = "default_max_consecutive_timeouts")]
    pub max_consecutive_timeouts: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            warn_latency_ms: default_warn_latency_ms(),
            fail_latency_ms: default_fail_latency_ms(),
            max_consecutive_timeouts: default_max_consecutive_timeouts(),
        }
    }
}

impl HealthConfig {
    /// Ping cycle spacing.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Per-ping timeout.
    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Default thresholds applied to probes registered without their own.
    #[must_use]
    pub fn thresholds(&self) -> ProbeThresholds {
        ProbeThresholds {
            warn_latency: Duration::from_millis(self.warn_latency_ms),
            fail_latency: Duration::from_millis(self.fail_latency_ms),
            max_consecutive_timeouts: self.max_consecutive_timeouts,
        }
    }
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_ping_timeout_ms() -> u64 {
    3_000
}

fn default_warn_latency_ms() -> u64 {
    1_000
}

fn default_fail_latency_ms() -> u64 {
    3_000
}

fn default_max_consecutive_timeouts() -> u32 {
    3
}

/// Crash marker and crash log settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CrashConfig {
    /// Marker file name, relative to `data_dir`.
    #[serde(default = "default_marker_file")]
    pub marker_file: String,
    /// Crash log file name, relative to `data_dir`.
    #[serde(default = "default_log_file")]
    pub log_file: String,
    /// Install fatal-signal handlers.
    #[serde(default = "default_true")]
    pub capture_signals: bool,
    /// Install the panic hook.
    #[serde(default = "default_true")]
    pub capture_panics: bool,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            marker_file: default_marker_file(),
            log_file: default_log_file(),
            capture_signals: true,
            capture_panics: true,
        }
    }
}

fn default_marker_file() -> String {
    "session.marker".into()
}

fn default_log_file() -> String {
    "crash.log".into()
}

fn default_true() -> bool {
    true
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

/// Top-level configuration parsed from `diagnostics.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DiagnosticsConfig {
    /// Directory holding the crash marker and crash log.
    pub data_dir: PathBuf,
    /// Application version recorded in the crash marker.
    #[serde(default = "default_app_version")]
    pub app_version: String,
    /// Task registry settings.
    #[serde(default)]
    pub tasks: TaskConfig,
    /// Health monitor settings.
    #[serde(default)]
    pub health: HealthConfig,
    /// Crash reporter settings.
    #[serde(default)]
    pub crash: CrashConfig,
}

impl DiagnosticsConfig {
    /// Configuration with every default applied, rooted at `data_dir`.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            app_version: default_app_version(),
            tasks: TaskConfig::default(),
            health: HealthConfig::default(),
            crash: CrashConfig::default(),
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the file does not exist, and
    /// `AppError::Config` if it cannot be read, contains invalid TOML, or
    /// fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => {
                AppError::NotFound(format!("config file {}", path.display()))
            }
            _ => AppError::Config(format!("failed to read config: {err}")),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the session marker file.
    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.data_dir.join(&self.crash.marker_file)
    }

    /// Path of the append-only crash log.
    #[must_use]
    pub fn crash_log_path(&self) -> PathBuf {
        self.data_dir.join(&self.crash.log_file)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(AppError::Config("data_dir must not be empty".into()));
        }

        if self.tasks.retention_seconds == 0 {
            return Err(AppError::Config(
                "tasks.retention_seconds must be greater than zero".into(),
            ));
        }

        if self.tasks.sweep_interval_seconds == 0 {
            return Err(AppError::Config(
                "tasks.sweep_interval_seconds must be greater than zero".into(),
            ));
        }

        if self.health.interval_ms == 0 || self.health.ping_timeout_ms == 0 {
            return Err(AppError::Config(
                "health.interval_ms and health.ping_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.health.warn_latency_ms >= self.health.fail_latency_ms {
            return Err(AppError::Config(format!(
                "health.warn_latency_ms ({}) must be below health.fail_latency_ms ({})",
                self.health.warn_latency_ms, self.health.fail_latency_ms
            )));
        }

        if self.health.max_consecutive_timeouts == 0 {
            return Err(AppError::Config(
                "health.max_consecutive_timeouts must be greater than zero".into(),
            ));
        }

        if self.crash.marker_file == self.crash.log_file {
            return Err(AppError::Config(
                "crash.marker_file and crash.log_file must differ".into(),
            ));
        }

        Ok(())
    }
}
