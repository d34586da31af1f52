//! On-disk session marker.
//!
//! The marker is written when the crash reporter is installed and deleted on
//! clean shutdown. Finding one at startup means the previous run never got
//! that far.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::models::crash::CrashMarker;
use crate::{AppError, Result};

/// Reads, writes and deletes the marker file.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    path: PathBuf,
}

impl MarkerStore {
    /// Store backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a marker is present.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Raw marker text, or `None` when no marker exists.
    ///
    /// A marker that exists but cannot be read yields an empty string: its
    /// presence is the evidence, not its contents.
    #[must_use]
    pub fn read(&self) -> Option<String> {
        match fs::read(&self.path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "crash marker present but unreadable");
                Some(String::new())
            }
        }
    }

    /// Write `marker`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the parent directory cannot be created or
    /// the file cannot be written.
    pub fn write(&self, marker: &CrashMarker) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Io(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        fs::write(&self.path, marker.to_text()).map_err(|err| {
            AppError::Io(format!(
                "failed to write crash marker {}: {err}",
                self.path.display()
            ))
        })
    }

    /// Delete the marker. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` for failures other than the file being absent.
    pub fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(AppError::Io(format!(
                "failed to remove crash marker {}: {err}",
                self.path.display()
            ))),
        }
    }
}
