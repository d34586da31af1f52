//! Offline inspection of the marker and crash log left on disk.
//!
//! Backs `whisperer-diag status`. Nothing here installs hooks or writes
//! files, so it is safe to run next to a live session.

use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::DiagnosticsConfig;
use crate::crash::report::split_blocks;
use crate::crash::MarkerStore;
use crate::models::crash::CrashMarker;
use crate::{AppError, Result};

/// Marker and crash log state as reported by `whisperer-diag status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// A marker file exists: a session is live or the last one crashed.
    pub marker_present: bool,
    /// Parsed marker, when present and well formed.
    pub marker: Option<CrashMarker>,
    /// Crash log location.
    pub crash_log: PathBuf,
    /// Number of crash blocks in the log.
    pub crash_reports: usize,
    /// Text of the most recent crash block.
    pub latest_report: Option<String>,
}

impl StatusReport {
    /// Read the marker and crash log configured in `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the crash log exists but cannot be read.
    pub fn collect(config: &DiagnosticsConfig) -> Result<Self> {
        let raw_marker = MarkerStore::new(config.marker_path()).read();
        let crash_log = config.crash_log_path();
        let text = match fs::read_to_string(&crash_log) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => {
                return Err(AppError::Io(format!(
                    "failed to read crash log {}: {err}",
                    crash_log.display()
                )))
            }
        };
        let blocks = split_blocks(&text);

        Ok(Self {
            marker_present: raw_marker.is_some(),
            marker: raw_marker.as_deref().and_then(CrashMarker::parse),
            crash_log,
            crash_reports: blocks.len(),
            latest_report: blocks.last().map(|block| (*block).to_owned()),
        })
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| AppError::Io(format!("failed to serialize status: {err}")))
    }

    /// Human-readable summary.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = match &self.marker {
            Some(marker) => writeln!(
                out,
                "Session marker: present (pid {}, version {}, started {})",
                marker.pid,
                marker.app_version,
                marker.session_start.to_rfc3339()
            ),
            None if self.marker_present => writeln!(out, "Session marker: present (unreadable)"),
            None => writeln!(out, "Session marker: absent"),
        };
        let _ = writeln!(
            out,
            "Crash log: {} ({} report(s))",
            self.crash_log.display(),
            self.crash_reports
        );
        if let Some(latest) = &self.latest_report {
            let _ = write!(out, "\nLatest report:\n{latest}\n");
        }
        out
    }
}
