//! Circuit Breaker Implementation
//!
//! Shared guard in front of the remote endpoint. After `failure_threshold`
//! consecutive failures it rejects calls until `recovery_timeout` has elapsed,
//! then lets trial calls through in the half-open state.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CircuitBreakerState {
    /// Calls flow through normally
    #[default]
    Closed,

    /// Calls are rejected until the recovery timeout elapses
    Open,

    /// Probing whether the remote side has recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "closed"),
            CircuitBreakerState::Open => write!(f, "open"),
            CircuitBreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// Time to stay open before probing
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&common::CircuitBreakerConfigBase> for CircuitBreakerConfig {
    fn from(base: &common::CircuitBreakerConfigBase) -> Self {
        Self {
            failure_threshold: base.failure_threshold.max(1),
            recovery_timeout: Duration::from_millis(base.recovery_timeout_ms),
        }
    }
}

/// Snapshot for diagnostics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub current_state: CircuitBreakerState,
    pub consecutive_failures: u32,
    pub blocked_requests: u64,
    pub trips: u64,
    pub recovery_attempts: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitBreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    blocked_requests: u64,
    trips: u64,
    recovery_attempts: u64,
}

/// Circuit breaker implementation
///
/// All transitions happen under one internal mutex, so the breaker can be
/// shared by reference across every in-flight request.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitBreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                blocked_requests: 0,
                trips: 0,
                recovery_attempts: 0,
            }),
        }
    }

    /// Check whether a call may proceed.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// and clears its failure counter before admitting the call.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);

                if elapsed {
                    info!("Circuit breaker transitioning to half-open - testing recovery");
                    inner.state = CircuitBreakerState::HalfOpen;
                    inner.consecutive_failures = 0;
                    inner.recovery_attempts += 1;
                    true
                } else {
                    inner.blocked_requests += 1;
                    false
                }
            }
        }
    }

    /// Time left before an open circuit starts probing.
    pub fn retry_after(&self) -> Duration {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (CircuitBreakerState::Open, Some(at)) => {
                self.config.recovery_timeout.saturating_sub(at.elapsed())
            }
            _ => Duration::ZERO,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitBreakerState::Closed {
            info!(previous = %inner.state, "Circuit breaker closing - service recovered");
        }
        inner.state = CircuitBreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed call. Returns `true` when this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;

        debug!(
            state = %inner.state,
            consecutive_failures = inner.consecutive_failures,
            "Recorded failed operation"
        );

        let should_open = match inner.state {
            // Any failure while probing re-opens and restarts the cool-down
            CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Closed => {
                inner.consecutive_failures >= self.config.failure_threshold
            }
            CircuitBreakerState::Open => false,
        };

        if should_open {
            warn!(
                consecutive_failures = inner.consecutive_failures,
                recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                "Circuit breaker opening - blocking requests"
            );
            inner.state = CircuitBreakerState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trips += 1;
        }

        should_open
    }

    /// Manual override: close the circuit and forget past failures.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!(previous = %inner.state, "Circuit breaker reset");
        inner.state = CircuitBreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            current_state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            blocked_requests: inner.blocked_requests,
            trips: inner.trips,
            recovery_attempts: inner.recovery_attempts,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
