//! Periodic liveness probing of registered execution contexts.
//!
//! Each cycle dispatches a trivial ack job onto every registered context and
//! arms a timeout check for it. Nothing in a cycle waits on a context, so one
//! stuck queue never delays probing the others.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::executor::{ExecutionContext, Job};
use super::probe::{ProbeState, ProbeStatus, ProbeThresholds};

/// One row of a status dump.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    /// Probe name.
    pub name: String,
    /// Derived status at dump time.
    pub status: ProbeStatus,
    /// Timeouts counted since the last acknowledgement.
    pub consecutive_timeouts: u32,
    /// Last measured round trip in milliseconds.
    pub last_latency_ms: Option<f64>,
}

type ProbeMap = Mutex<BTreeMap<String, ProbeState>>;

/// One issued ping, as seen by its ack job and timeout check.
struct Ping {
    name: String,
    epoch: u64,
    generation: u64,
    issued_at: Instant,
}

struct Scheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the monitored execution contexts and drives the ping cycle.
pub struct HealthMonitor {
    probes: Arc<ProbeMap>,
    thresholds: ProbeThresholds,
    interval: Duration,
    ping_timeout: Duration,
    next_epoch: AtomicU64,
    scheduler: Mutex<Option<Scheduler>>,
}

impl HealthMonitor {
    /// Create a monitor with no registered probes.
    ///
    /// * `thresholds`: defaults for probes registered via [`register`](Self::register).
    /// * `interval`: ping cycle spacing.
    /// * `ping_timeout`: delay before an unacknowledged ping counts as a timeout.
    #[must_use]
    pub fn new(thresholds: ProbeThresholds, interval: Duration, ping_timeout: Duration) -> Self {
        Self {
            probes: Arc::new(Mutex::new(BTreeMap::new())),
            thresholds,
            interval,
            ping_timeout,
            next_epoch: AtomicU64::new(0),
            scheduler: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ProbeState>> {
        self.probes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an execution context with the default thresholds.
    pub fn register(&self, name: impl Into<String>, context: Arc<dyn ExecutionContext>) {
        self.register_with(name, context, self.thresholds);
    }

    /// Register an execution context with explicit thresholds.
    ///
    /// Re-registering a name replaces the previous probe. Acks and timeouts
    /// of pings issued before the replacement are discarded.
    pub fn register_with(
        &self,
        name: impl Into<String>,
        context: Arc<dyn ExecutionContext>,
        thresholds: ProbeThresholds,
    ) {
        let name = name.into();
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let probe = ProbeState::new(name.clone(), epoch, context, thresholds);
        if self.lock().insert(name.clone(), probe).is_some() {
            warn!(probe = %name, "probe re-registered; previous state discarded");
        } else {
            info!(probe = %name, "probe registered");
        }
    }

    /// Remove a probe. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    /// Registered probe names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Issue one ping to the named probe.
    ///
    /// Must be called from within a Tokio runtime, which hosts the timeout
    /// check. Returns `false` if no probe has that name.
    pub fn ping(&self, name: &str, timeout: Duration) -> bool {
        let now = Instant::now();
        let (context, epoch, generation) = {
            let mut probes = self.lock();
            let Some(probe) = probes.get_mut(name) else {
                warn!(probe = name, "ping requested for unknown probe");
                return false;
            };
            let generation = probe.issue(now);
            (Arc::clone(&probe.context), probe.epoch, generation)
        };

        let ping = Ping {
            name: name.to_owned(),
            epoch,
            generation,
            issued_at: now,
        };
        Self::dispatch_ping(&self.probes, ping, context, timeout);
        true
    }

    /// Ping every registered probe once.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn ping_all(&self) {
        Self::ping_cycle(&self.probes, self.ping_timeout);
    }

    fn ping_cycle(probes: &Arc<ProbeMap>, timeout: Duration) {
        let now = Instant::now();
        let issued: Vec<(Ping, Arc<dyn ExecutionContext>)> = {
            let mut guard = probes.lock().unwrap_or_else(PoisonError::into_inner);
            guard
                .values_mut()
                .map(|probe| {
                    let ping = Ping {
                        name: probe.name.clone(),
                        epoch: probe.epoch,
                        generation: probe.issue(now),
                        issued_at: now,
                    };
                    (ping, Arc::clone(&probe.context))
                })
                .collect()
        };

        debug!(probes = issued.len(), "ping cycle");
        for (ping, context) in issued {
            Self::dispatch_ping(probes, ping, context, timeout);
        }
    }

    /// Dispatch the ack job and arm the timeout check. Runs without the
    /// probe lock held.
    fn dispatch_ping(
        probes: &Arc<ProbeMap>,
        ping: Ping,
        context: Arc<dyn ExecutionContext>,
        timeout: Duration,
    ) {
        let Ping {
            name,
            epoch,
            generation,
            issued_at,
        } = ping;

        let ack_probes = Arc::clone(probes);
        let ack_name = name.clone();
        let ack: Job = Box::new(move || {
            let now = Instant::now();
            let mut guard = ack_probes.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.get_mut(&ack_name) {
                Some(probe) if probe.epoch == epoch => {
                    probe.acknowledge(generation, issued_at, now);
                }
                _ => debug!(probe = %ack_name, generation, "ack for replaced probe dropped"),
            }
        });
        context.dispatch(ack);

        let timeout_probes = Arc::clone(probes);
        let deadline = issued_at + timeout;
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut guard = timeout_probes.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(probe) = guard.get_mut(&name).filter(|probe| probe.epoch == epoch) else {
                return;
            };
            if probe.time_out(generation) {
                warn!(
                    probe = %name,
                    generation,
                    consecutive_timeouts = probe.consecutive_timeouts,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "liveness ping timed out"
                );
            }
        });
    }

    /// Derived status of the named probe, or `None` if it is not registered.
    #[must_use]
    pub fn status(&self, name: &str) -> Option<ProbeStatus> {
        let now = Instant::now();
        self.lock().get(name).map(|probe| probe.status_at(now))
    }

    /// Timeouts counted for the named probe since its last acknowledgement.
    #[must_use]
    pub fn consecutive_timeouts(&self, name: &str) -> Option<u32> {
        self.lock().get(name).map(ProbeState::consecutive_timeouts)
    }

    /// Whether every registered probe is healthy.
    #[must_use]
    pub fn all_healthy(&self) -> bool {
        let now = Instant::now();
        self.lock()
            .values()
            .all(|probe| probe.status_at(now).is_healthy())
    }

    /// Names of probes that are degraded or unresponsive.
    #[must_use]
    pub fn unhealthy_names(&self) -> Vec<String> {
        let now = Instant::now();
        self.lock()
            .values()
            .filter(|probe| !probe.status_at(now).is_healthy())
            .map(|probe| probe.name.clone())
            .collect()
    }

    /// Status of every probe, sorted by name.
    #[must_use]
    pub fn status_report(&self) -> Vec<ProbeReport> {
        let now = Instant::now();
        self.lock()
            .values()
            .map(|probe| ProbeReport {
                name: probe.name.clone(),
                status: probe.status_at(now),
                consecutive_timeouts: probe.consecutive_timeouts,
                last_latency_ms: probe.last_latency.map(|latency| latency.as_secs_f64() * 1000.0),
            })
            .collect()
    }

    /// Whether the ping scheduler is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Start the periodic ping cycle.
    ///
    /// Runs one cycle immediately, then one per interval. Starting an
    /// already-running monitor logs a warning and does nothing. Must be
    /// called from within a Tokio runtime.
    pub fn start(&self) {
        let mut scheduler = self.scheduler.lock().unwrap_or_else(PoisonError::into_inner);
        if scheduler.is_some() {
            warn!("health monitor already running");
            return;
        }

        Self::ping_cycle(&self.probes, self.ping_timeout);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            Self::run(
                Arc::clone(&self.probes),
                Instant::now() + self.interval,
                self.interval,
                self.ping_timeout,
                cancel.clone(),
            )
            .instrument(info_span!("health_monitor")),
        );

        info!(
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "health monitor started"
        );
        *scheduler = Some(Scheduler { cancel, handle });
    }

    /// Stop the ping cycle. Stopping a stopped monitor does nothing.
    ///
    /// Pings already in flight still record their acks and timeouts.
    pub fn stop(&self) {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.cancel.cancel();
            scheduler.handle.abort();
            info!("health monitor stopped");
        }
    }

    async fn run(
        probes: Arc<ProbeMap>,
        first_tick: Instant,
        interval: Duration,
        ping_timeout: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval_at(first_tick, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("health monitor loop cancelled");
                    return;
                }
                _ = ticker.tick() => Self::ping_cycle(&probes, ping_timeout),
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
