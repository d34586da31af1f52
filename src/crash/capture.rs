//! Fault capture shared by every interceptor.
//!
//! [`FaultCapture`] owns everything the fault path needs up front: the task
//! registry, the crash log opened for appending, and a scratch buffer for
//! signal-context rendering.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, error};

use super::report::{render_report_block, write_report_block, FixedBuffer};
use crate::models::crash::FaultDescription;
use crate::tasks::TaskRegistry;

/// Size of the buffer used to render a report inside a signal handler.
pub const SIGNAL_BUFFER_BYTES: usize = 16 * 1024;

/// Builds fault reports and appends them to the crash log.
pub struct FaultCapture {
    registry: Arc<TaskRegistry>,
    log_path: PathBuf,
    log_file: Option<File>,
    scratch: Mutex<Box<[u8]>>,
    signal_captured: AtomicBool,
    recorded: AtomicUsize,
}

impl FaultCapture {
    /// Prepare a capture writing to `log_path`.
    ///
    /// The log is opened for appending now so the signal path never has to
    /// open a file. Failure to open is tolerated; the panic path retries.
    #[must_use]
    pub fn new(registry: Arc<TaskRegistry>, log_path: impl Into<PathBuf>) -> Self {
        let log_path = log_path.into();
        let log_file = open_append(&log_path)
            .map_err(|err| {
                debug!(path = %log_path.display(), %err, "crash log not pre-opened");
            })
            .ok();

        Self {
            registry,
            log_path,
            log_file,
            scratch: Mutex::new(vec![0u8; SIGNAL_BUFFER_BYTES].into_boxed_slice()),
            signal_captured: AtomicBool::new(false),
            recorded: AtomicUsize::new(0),
        }
    }

    /// Crash log path.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Task registry whose state is merged into each report.
    #[must_use]
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Number of faults recorded through this capture.
    #[must_use]
    pub fn recorded(&self) -> usize {
        self.recorded.load(Ordering::SeqCst)
    }

    /// Append a report for `fault`, outside any signal handler.
    ///
    /// Best-effort: returns whether the block reached the file and never
    /// propagates an error, since there is nothing safer to fall back to.
    pub fn record(&self, fault: &FaultDescription) -> bool {
        self.recorded.fetch_add(1, Ordering::SeqCst);
        let block = render_report_block(Utc::now(), fault, &self.registry);

        let summary = fault.to_string();
        error!(fault = %first_line(&summary), "fatal fault captured");
        let _ = std::io::stderr().write_all(block.as_bytes());
        let _ = std::io::stderr().flush();

        match append(&self.log_path, block.as_bytes()) {
            Ok(()) => true,
            Err(err) => {
                debug!(path = %self.log_path.display(), %err, "crash log append failed");
                false
            }
        }
    }

    /// Append a report from inside a signal handler.
    ///
    /// Renders into the preallocated scratch buffer and writes it with a
    /// single `write(2)` per destination. Only the first call per capture
    /// does any work; the registry and buffer are only ever `try_lock`ed.
    pub fn record_in_signal_context(&self, fault: &FaultDescription) -> bool {
        if self.signal_captured.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.recorded.fetch_add(1, Ordering::SeqCst);

        let Ok(mut scratch) = self.scratch.try_lock() else {
            return false;
        };
        let mut buffer = FixedBuffer::new(&mut scratch[..]);
        let _ = write_report_block(&mut buffer, Utc::now(), fault, &self.registry);
        let bytes = buffer.finish();

        write_stderr(bytes);
        match &self.log_file {
            Some(file) => {
                let mut file: &File = file;
                file.write_all(bytes).is_ok()
            }
            None => false,
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn append(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = open_append(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()
}

/// Raw `write(2)` to stderr, bypassing the std stderr lock which the
/// interrupted thread may hold.
#[cfg(unix)]
fn write_stderr(bytes: &[u8]) {
    use std::os::fd::AsFd;

    let stderr = std::io::stderr();
    let _ = nix::unistd::write(stderr.as_fd(), bytes);
}

#[cfg(not(unix))]
fn write_stderr(_bytes: &[u8]) {}
