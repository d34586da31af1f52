//! Per-context liveness probe state and status classification.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::executor::ExecutionContext;

/// Latency bounds used to classify a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeThresholds {
    /// Wait above which the probe is degraded.
    pub warn_latency: Duration,
    /// Wait above which the probe is unresponsive.
    pub fail_latency: Duration,
    /// Consecutive ping timeouts that make the probe unresponsive.
    pub max_consecutive_timeouts: u32,
}

impl Default for ProbeThresholds {
    fn default() -> Self {
        Self {
            warn_latency: Duration::from_secs(1),
            fail_latency: Duration::from_secs(3),
            max_consecutive_timeouts: 3,
        }
    }
}

/// Derived health of a probed execution context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProbeStatus {
    /// Acknowledging pings within `warn_latency`.
    Healthy,
    /// Slower than `warn_latency`, faster than `fail_latency`.
    Degraded {
        /// Measured or outstanding wait.
        #[serde(with = "duration_secs")]
        latency: Duration,
    },
    /// Never acknowledged, past `fail_latency`, or timing out repeatedly.
    Unresponsive,
}

impl ProbeStatus {
    /// Whether the status is [`ProbeStatus::Healthy`].
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl Display for ProbeStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded { latency } => write!(f, "degraded({:.3}s)", latency.as_secs_f64()),
            Self::Unresponsive => write!(f, "unresponsive"),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

/// Ping round-trip phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingPhase {
    /// No ping outstanding.
    Idle,
    /// At least one ping has not been acknowledged.
    AwaitingAck {
        /// Issue time of the oldest unacknowledged ping.
        since: Instant,
        /// Generation of the newest outstanding ping.
        generation: u64,
    },
}

/// Liveness state for one registered execution context.
pub struct ProbeState {
    pub(crate) name: String,
    pub(crate) epoch: u64,
    pub(crate) context: Arc<dyn ExecutionContext>,
    pub(crate) thresholds: ProbeThresholds,
    pub(crate) last_ping_sent_at: Option<Instant>,
    pub(crate) last_ping_ack_at: Option<Instant>,
    pub(crate) last_latency: Option<Duration>,
    pub(crate) consecutive_timeouts: u32,
    pub(crate) phase: PingPhase,
    pub(crate) next_generation: u64,
    pub(crate) acked_generation: Option<u64>,
}

impl ProbeState {
    /// `epoch` identifies this registration; callbacks from pings issued
    /// under an earlier registration of the same name carry another epoch.
    pub(crate) fn new(
        name: String,
        epoch: u64,
        context: Arc<dyn ExecutionContext>,
        thresholds: ProbeThresholds,
    ) -> Self {
        Self {
            name,
            epoch,
            context,
            thresholds,
            last_ping_sent_at: None,
            last_ping_ack_at: None,
            last_latency: None,
            consecutive_timeouts: 0,
            phase: PingPhase::Idle,
            next_generation: 0,
            acked_generation: None,
        }
    }

    /// Mark a new ping as issued at `now` and return its generation.
    pub(crate) fn issue(&mut self, now: Instant) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.last_ping_sent_at = Some(now);
        self.phase = match self.phase {
            PingPhase::Idle => PingPhase::AwaitingAck {
                since: now,
                generation,
            },
            PingPhase::AwaitingAck { since, .. } => PingPhase::AwaitingAck { since, generation },
        };
        generation
    }

    /// Record the acknowledgement of ping `generation`, issued at `issued_at`.
    pub(crate) fn acknowledge(&mut self, generation: u64, issued_at: Instant, now: Instant) {
        self.last_ping_ack_at = Some(now);
        self.last_latency = Some(now.saturating_duration_since(issued_at));
        self.consecutive_timeouts = 0;
        if self.acked_generation.is_none_or(|acked| acked < generation) {
            self.acked_generation = Some(generation);
        }

        if let PingPhase::AwaitingAck {
            generation: newest, ..
        } = self.phase
        {
            if generation >= newest {
                self.phase = PingPhase::Idle;
            } else if let Some(sent) = self.last_ping_sent_at {
                // Pings after `generation` are still in flight; the newest
                // issue time is the closest bound we keep.
                self.phase = PingPhase::AwaitingAck {
                    since: sent,
                    generation: newest,
                };
            }
        }
    }

    /// Count a timeout for ping `generation` unless it (or a later ping) was
    /// acknowledged. Returns whether the timeout was counted.
    pub(crate) fn time_out(&mut self, generation: u64) -> bool {
        if self.acked_generation.is_some_and(|acked| acked >= generation) {
            return false;
        }
        self.consecutive_timeouts += 1;
        true
    }

    /// Classify the probe as of `now`.
    #[must_use]
    pub fn status_at(&self, now: Instant) -> ProbeStatus {
        let thresholds = &self.thresholds;

        if self.consecutive_timeouts >= thresholds.max_consecutive_timeouts {
            return ProbeStatus::Unresponsive;
        }

        if let PingPhase::AwaitingAck { since, .. } = self.phase {
            let waited = now.saturating_duration_since(since);
            if waited > thresholds.fail_latency {
                return ProbeStatus::Unresponsive;
            }
            if waited > thresholds.warn_latency {
                return ProbeStatus::Degraded { latency: waited };
            }
        }

        let Some(latency) = self.last_latency else {
            // Never acknowledged: only a first ping still inside its warn
            // window gets the benefit of the doubt.
            return match self.phase {
                PingPhase::AwaitingAck { .. } => ProbeStatus::Healthy,
                PingPhase::Idle => ProbeStatus::Unresponsive,
            };
        };

        if latency > thresholds.fail_latency {
            ProbeStatus::Unresponsive
        } else if latency > thresholds.warn_latency {
            ProbeStatus::Degraded { latency }
        } else {
            ProbeStatus::Healthy
        }
    }

    /// Probe name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Classification thresholds.
    #[must_use]
    pub fn thresholds(&self) -> ProbeThresholds {
        self.thresholds
    }

    /// Timeouts counted since the last acknowledgement.
    #[must_use]
    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Round-trip time of the most recently acknowledged ping.
    #[must_use]
    pub fn last_latency(&self) -> Option<Duration> {
        self.last_latency
    }

    /// When the latest ping was issued.
    #[must_use]
    pub fn last_ping_sent_at(&self) -> Option<Instant> {
        self.last_ping_sent_at
    }

    /// When the latest acknowledgement was recorded.
    #[must_use]
    pub fn last_ping_ack_at(&self) -> Option<Instant> {
        self.last_ping_ack_at
    }

    /// Current ping phase.
    #[must_use]
    pub fn phase(&self) -> PingPhase {
        self.phase
    }
}
