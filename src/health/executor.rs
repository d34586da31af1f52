//! Execution contexts that liveness pings are dispatched onto.

use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::{AppError, Result};

/// Unit of work submitted to an execution context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Anything that can run a submitted closure at some later point.
///
/// A context that stops draining its work never runs the ping job, which is
/// exactly what the health monitor detects. Implementations must not run the
/// job inline on the caller's thread.
pub trait ExecutionContext: Send + Sync {
    /// Submit `job` for asynchronous execution.
    fn dispatch(&self, job: Job);
}

impl ExecutionContext for tokio::runtime::Handle {
    fn dispatch(&self, job: Job) {
        self.spawn(async move { job() });
    }
}

/// A named worker thread that runs jobs one at a time in submission order.
///
/// Mirrors a serial dispatch queue: a long job blocks everything behind it,
/// including liveness pings.
pub struct SerialQueue {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialQueue {
    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` if the OS refuses to create the thread.
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread_name = name.clone();

        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
                debug!(queue = %thread_name, "serial queue drained");
            })
            .map_err(|err| AppError::Runtime(format!("failed to spawn queue {name}: {err}")))?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue name, also used as the worker thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting jobs and wait for the queued ones to finish.
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!(queue = %self.name, "serial queue worker panicked");
            }
        }
    }
}

impl ExecutionContext for SerialQueue {
    fn dispatch(&self, job: Job) {
        let Ok(sender) = self.sender.lock() else {
            warn!(queue = %self.name, "serial queue sender poisoned; job dropped");
            return;
        };
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(job).is_err() {
                    warn!(queue = %self.name, "serial queue worker gone; job dropped");
                }
            }
            None => debug!(queue = %self.name, "serial queue shut down; job dropped"),
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}
