//! Circuit breaker state machine.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                                │ reset timeout elapsed
//!     │ probe succeeds                 ▼
//!     └──────────────────────────── HalfOpen ──▶ Open (probe fails)
//! ```
//!
//! Time is passed in by the caller; the breaker itself holds no clock.
//!
//! A probe that never reports back (its caller gave up on it) holds the
//! half-open slot for at most one reset timeout; after that the next call
//! becomes the probe.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Answer to "may this call go out?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Cool-down elapsed; this call is the single half-open probe
    Probe,
    Rejected { retry_in_ms: u64 },
}

impl Admission {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }
}

/// Diagnostic snapshot of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at: Option<Timestamp>,
    pub next_attempt_at: Option<Timestamp>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Timestamp>,
    probe_started_at: Option<Timestamp>,
    failure_threshold: u32,
    reset_timeout_ms: u64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, 60_000)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            probe_started_at: None,
            failure_threshold: failure_threshold.max(1),
            reset_timeout_ms,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Check whether a call may proceed at `now`.
    pub fn admit(&mut self, now: Timestamp) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let reopen_at = self.opened_at.unwrap_or(now) + self.reset_timeout_ms;
                if now < reopen_at {
                    return Admission::Rejected {
                        retry_in_ms: reopen_at - now,
                    };
                }
                tracing::info!("circuit half-open, admitting probe");
                self.state = CircuitState::HalfOpen;
                self.probe_started_at = Some(now);
                Admission::Probe
            }
            CircuitState::HalfOpen => match self.probe_started_at {
                Some(started) if now < started + self.reset_timeout_ms => Admission::Rejected {
                    retry_in_ms: started + self.reset_timeout_ms - now,
                },
                Some(_) => {
                    tracing::warn!("half-open probe never settled, admitting another");
                    self.probe_started_at = Some(now);
                    Admission::Probe
                }
                None => {
                    self.probe_started_at = Some(now);
                    Admission::Probe
                }
            },
        }
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            tracing::info!("circuit closed");
        }
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
        self.probe_started_at = None;
    }

    pub fn record_failure(&mut self, now: Timestamp) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.probe_started_at = None;

        let trip = self.state == CircuitState::HalfOpen || self.failure_count >= self.failure_threshold;
        if trip && self.state != CircuitState::Open {
            tracing::error!(
                failures = self.failure_count,
                reset_timeout_ms = self.reset_timeout_ms,
                "circuit opened"
            );
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
        }
    }

    /// Manual reset to a closed breaker.
    pub fn reset(&mut self) {
        self.record_success();
    }

    pub fn status(&self) -> CircuitStatus {
        CircuitStatus {
            state: self.state,
            failure_count: self.failure_count,
            opened_at: self.opened_at,
            next_attempt_at: match self.state {
                CircuitState::Open => self.opened_at.map(|at| at + self.reset_timeout_ms),
                _ => None,
            },
        }
    }
}
