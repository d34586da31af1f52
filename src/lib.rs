//! Runtime health and crash diagnostics for the Whisperer dictation app.

pub mod config;
pub mod context;
pub mod crash;
pub mod errors;
pub mod health;
pub mod models;
pub mod status;
pub mod tasks;

pub use config::DiagnosticsConfig;
pub use context::DiagnosticsContext;
pub use errors::{AppError, Result};
