//! Crash marker and fault description models.

use std::fmt::{self, Display, Formatter};
use std::panic::PanicHookInfo;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Persisted evidence that a session started and has not exited cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashMarker {
    /// When the session installed the crash reporter.
    pub session_start: DateTime<Utc>,
    /// Process id of that session.
    pub pid: u32,
    /// Application version of that session.
    pub app_version: String,
}

impl CrashMarker {
    /// Marker describing the current process.
    #[must_use]
    pub fn current(app_version: impl Into<String>) -> Self {
        Self {
            session_start: Utc::now(),
            pid: std::process::id(),
            app_version: app_version.into(),
        }
    }

    /// Plain-text file representation.
    #[must_use]
    pub fn to_text(&self) -> String {
        format!(
            "Session started: {}\nPID: {}\nVersion: {}\n",
            self.session_start.to_rfc3339(),
            self.pid,
            self.app_version
        )
    }

    /// Parse the plain-text representation. Returns `None` when any field is
    /// missing or malformed; a marker that fails to parse still counts as
    /// crash evidence.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let mut session_start = None;
        let mut pid = None;
        let mut app_version = None;

        for line in raw.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Session started" => {
                    session_start = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|ts| ts.with_timezone(&Utc));
                }
                "PID" => pid = value.parse().ok(),
                "Version" => app_version = Some(value.to_owned()),
                _ => {}
            }
        }

        Some(Self {
            session_start: session_start?,
            pid: pid?,
            app_version: app_version?,
        })
    }
}

/// What the crash reporter found when it was installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriorSession {
    /// The previous session shut down cleanly (or this is the first run).
    NoPriorMarker,
    /// A marker was left behind: the previous session crashed or was killed.
    PriorCrashDetected(PriorCrash),
}

impl PriorSession {
    /// Whether the previous session crashed.
    #[must_use]
    pub fn crashed(&self) -> bool {
        matches!(self, Self::PriorCrashDetected(_))
    }
}

/// Contents of a stale marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorCrash {
    /// Raw marker text, possibly empty if unreadable.
    pub raw: String,
    /// Parsed marker, if the text was well formed.
    pub marker: Option<CrashMarker>,
}

/// Description of a fatal event, rendered into the crash log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultDescription {
    /// A panic that reached the panic hook.
    Panic {
        /// Panic payload as text.
        message: String,
        /// `file:line:column` of the panic site.
        location: Option<String>,
        /// Name of the panicking thread.
        thread: Option<String>,
        /// Raw captured backtrace.
        backtrace: Option<String>,
    },
    /// A fatal OS signal.
    Signal {
        /// Signal name, e.g. `SIGSEGV`.
        name: &'static str,
        /// Signal number.
        number: i32,
    },
}

impl FaultDescription {
    /// Build a description from a panic hook invocation, capturing a
    /// backtrace regardless of `RUST_BACKTRACE`.
    #[must_use]
    pub fn from_panic(info: &PanicHookInfo<'_>) -> Self {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|msg| (*msg).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());

        Self::Panic {
            message,
            location: info
                .location()
                .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column())),
            thread: std::thread::current().name().map(str::to_owned),
            backtrace: Some(std::backtrace::Backtrace::force_capture().to_string()),
        }
    }
}

impl Display for FaultDescription {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panic {
                message,
                location,
                thread,
                backtrace,
            } => {
                write!(f, "Uncaught panic: {message}")?;
                if let Some(location) = location {
                    write!(f, "\n  Location: {location}")?;
                }
                if let Some(thread) = thread {
                    write!(f, "\n  Thread: {thread}")?;
                }
                if let Some(backtrace) = backtrace {
                    write!(f, "\n  Backtrace:")?;
                    for frame in backtrace.lines() {
                        write!(f, "\n    {frame}")?;
                    }
                }
                Ok(())
            }
            Self::Signal { name, number } => write!(f, "Fatal signal {name} ({number})"),
        }
    }
}
