//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration for the setup paths of the diagnostics subsystem.
///
/// Runtime misuse (unknown task ids, probe timeouts) is never surfaced as an
/// error value; it is logged and absorbed where it happens.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Installing or restoring a signal disposition failed.
    Signal(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Async runtime construction or scheduling failure.
    Runtime(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Signal(msg) => write!(f, "signal: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
