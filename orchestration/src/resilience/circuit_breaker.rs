//! Circuit breaker guarding the engine pipeline.
//!
//! The breaker counts consecutive pipeline failures. When failures reach a
//! configurable threshold the circuit *opens* and every call fails fast.
//! After a cooldown the circuit becomes *half-open* and admits a single
//! probe: success closes it again, failure re-opens it.
//!
//! ```text
//! Closed ──(failures ≥ threshold)──▶ Open ──(cooldown)──▶ HalfOpen
//!   ▲                                 ▲                      │
//!   └────────────(probe ok)───────────┼──────────────────────┤
//!                                     └─────(probe fails)────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests allowed.
    Closed,
    /// Requests blocked until the cooldown expires.
    Open,
    /// Cooldown expired; one probe request allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Serializable view of the breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub threshold: u32,
    pub cooldown_ms: u64,
    pub opened_at: Option<DateTime<Utc>>,
    /// Times the circuit has tripped since the last reset.
    pub trips: u64,
}

/// Outcome of asking the breaker for permission to run.
///
/// Admitted calls carry the breaker epoch they were admitted in. Outcomes
/// from an earlier epoch are ignored, so a call that started before a
/// transition cannot drive the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal call while closed.
    Allowed { epoch: u64 },
    /// The single half-open probe.
    Probe { epoch: u64 },
    /// Fail fast; retry after the given delay.
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_probe(&self) -> bool {
        matches!(self, Self::Probe { .. })
    }

    fn epoch(&self) -> Option<u64> {
        match self {
            Self::Allowed { epoch } | Self::Probe { epoch } => Some(*epoch),
            Self::Rejected { .. } => None,
        }
    }
}

/// Consecutive-failure circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_utc: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    trips: u64,
    /// Bumped on every state transition and reset.
    epoch: u64,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a probe is allowed.
    pub cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            opened_at_utc: None,
            probe_in_flight: false,
            trips: 0,
            epoch: 0,
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    /// Ask to run a call. Moves Open → HalfOpen once the cooldown elapsed.
    pub fn try_acquire(&mut self) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allowed { epoch: self.epoch },
            CircuitState::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    self.state = CircuitState::HalfOpen;
                    self.epoch += 1;
                    self.probe_in_flight = true;
                    Admission::Probe { epoch: self.epoch }
                } else {
                    Admission::Rejected {
                        retry_after: self.cooldown - elapsed,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    Admission::Rejected {
                        retry_after: Duration::ZERO,
                    }
                } else {
                    self.probe_in_flight = true;
                    Admission::Probe { epoch: self.epoch }
                }
            }
        }
    }

    fn is_current(&self, admission: &Admission) -> bool {
        admission.epoch() == Some(self.epoch)
    }

    /// Record a success for `admission`. Returns true when the probe closed
    /// the circuit.
    ///
    /// While closed a success clears the failure streak. Only the half-open
    /// probe may close the circuit; stale successes are ignored.
    pub fn record_success(&mut self, admission: &Admission) -> bool {
        if !self.is_current(admission) {
            return false;
        }
        match (self.state, admission) {
            (CircuitState::Closed, Admission::Allowed { .. }) => {
                self.consecutive_failures = 0;
                false
            }
            (CircuitState::HalfOpen, Admission::Probe { .. }) => {
                self.state = CircuitState::Closed;
                self.epoch += 1;
                self.consecutive_failures = 0;
                self.opened_at = None;
                self.opened_at_utc = None;
                self.probe_in_flight = false;
                true
            }
            _ => false,
        }
    }

    /// Record a failure for `admission`. Returns true when it tripped the
    /// circuit to Open. Stale failures are ignored.
    pub fn record_failure(&mut self, admission: &Admission) -> bool {
        if !self.is_current(admission) {
            return false;
        }
        let trip = match (self.state, admission) {
            (CircuitState::Closed, Admission::Allowed { .. }) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.consecutive_failures >= self.failure_threshold
            }
            (CircuitState::HalfOpen, Admission::Probe { .. }) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                true
            }
            _ => false,
        };
        if trip {
            self.state = CircuitState::Open;
            self.epoch += 1;
            self.opened_at = Some(Instant::now());
            self.opened_at_utc = Some(Utc::now());
            self.probe_in_flight = false;
            self.trips += 1;
        }
        trip
    }

    /// Free the probe slot held by `admission` without recording an outcome.
    pub fn release_probe(&mut self, admission: &Admission) {
        if admission.is_probe() && self.is_current(admission) {
            self.probe_in_flight = false;
        }
    }

    /// Observed state; an Open circuit whose cooldown elapsed reports HalfOpen.
    pub fn state(&self) -> CircuitState {
        match self.state {
            CircuitState::Open
                if self
                    .opened_at
                    .is_some_and(|t| t.elapsed() >= self.cooldown) =>
            {
                CircuitState::HalfOpen
            }
            state => state,
        }
    }

    /// Consecutive failures recorded.
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: self.state(),
            failure_count: self.consecutive_failures,
            threshold: self.failure_threshold,
            cooldown_ms: self.cooldown.as_millis() as u64,
            opened_at: self.opened_at_utc,
            trips: self.trips,
        }
    }

    /// Back to a fresh Closed circuit, keeping the configuration. Calls
    /// admitted before the reset no longer count.
    pub fn reset(&mut self) {
        let epoch = self.epoch + 1;
        *self = Self::new(self.failure_threshold, self.cooldown);
        self.epoch = epoch;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}
