use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use strand_core::errors::AgentError;

/// Circuit breaker state machine.
///
/// closed → open after `failure_threshold` consecutive failures;
/// open → half-open once `recovery_timeout` elapses; half-open admits
/// exactly one probe — success closes, failure reopens and resets the
/// timer.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: Mutex<BreakerState>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum BreakerState {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { probe_in_flight: bool },
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            state: Mutex::new(BreakerState::Closed { failures: 0 }),
        }
    }

    /// Gate a request. Returns `CircuitOpen` while open, and while a
    /// half-open probe is already in flight.
    pub fn check(&self) -> Result<(), AgentError> {
        let mut state = self.state.lock();
        match &*state {
            BreakerState::Closed { .. } => Ok(()),
            BreakerState::Open { since } => {
                let elapsed = since.elapsed();
                if elapsed >= self.recovery_timeout {
                    *state = BreakerState::HalfOpen {
                        probe_in_flight: true,
                    };
                    info!(circuit = %self.name, "circuit half-open, admitting probe");
                    Ok(())
                } else {
                    Err(AgentError::CircuitOpen {
                        name: self.name.clone(),
                        retry_in: self.recovery_timeout - elapsed,
                    })
                }
            }
            BreakerState::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    Err(AgentError::CircuitOpen {
                        name: self.name.clone(),
                        retry_in: Duration::ZERO,
                    })
                } else {
                    *state = BreakerState::HalfOpen {
                        probe_in_flight: true,
                    };
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if *state != (BreakerState::Closed { failures: 0 }) {
            if matches!(*state, BreakerState::HalfOpen { .. }) {
                info!(circuit = %self.name, "circuit closed after successful probe");
            }
            *state = BreakerState::Closed { failures: 0 };
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        match &mut *state {
            BreakerState::Closed { failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failures = *failures,
                        timeout_secs = self.recovery_timeout.as_secs(),
                        "circuit opened"
                    );
                    *state = BreakerState::Open {
                        since: Instant::now(),
                    };
                }
            }
            BreakerState::HalfOpen { .. } => {
                warn!(circuit = %self.name, "probe failed, circuit reopened");
                *state = BreakerState::Open {
                    since: Instant::now(),
                };
            }
            BreakerState::Open { .. } => {}
        }
    }

    pub fn state_name(&self) -> &'static str {
        match &*self.state.lock() {
            BreakerState::Closed { .. } => "closed",
            BreakerState::Open { .. } => "open",
            BreakerState::HalfOpen { .. } => "half_open",
        }
    }
}
