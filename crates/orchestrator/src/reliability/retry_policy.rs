//! Retry Policy Implementation
//!
//! Exponential backoff with jitter around a single remote call, guarded by the
//! shared [`CircuitBreaker`]. The breaker is checked before every attempt and
//! every failed attempt counts toward its threshold, so a loop stops as soon
//! as any caller of the same engine opens the circuit.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerState};
use crate::endpoint::RemoteError;
use crate::telemetry::TelemetryRecorder;
use common::{ErrorKind, GenerationError, RetryConfigBase};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a single attempt (or the whole call) failed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryError {
    #[error("{0}")]
    Remote(RemoteError),

    #[error("remote returned no result")]
    EmptyResult,

    #[error("circuit breaker is open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },
}

impl RetryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RetryError::Remote(err) => err.kind,
            RetryError::EmptyResult => ErrorKind::Transient,
            RetryError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
        }
    }

    /// Map into the pipeline error surfaced to callers.
    pub fn to_generation_error(&self, operation: &str) -> GenerationError {
        match self {
            RetryError::Remote(err) => GenerationError::from_kind(err.kind, err.message.clone()),
            RetryError::EmptyResult => GenerationError::EmptyResult {
                operation: operation.to_string(),
            },
            RetryError::CircuitOpen { retry_after } => GenerationError::CircuitOpen {
                retry_after_ms: retry_after.as_millis() as u64,
            },
        }
    }
}

/// Configuration for retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Upper bound of the uniform jitter added to each sleep
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl From<&RetryConfigBase> for RetryConfig {
    fn from(base: &RetryConfigBase) -> Self {
        Self {
            max_attempts: base.max_attempts.max(1),
            initial_delay: Duration::from_millis(base.initial_delay_ms),
            max_delay: Duration::from_millis(base.max_delay_ms),
            backoff_multiplier: base.backoff_multiplier.max(1.0),
            max_jitter: Duration::from_millis(base.max_jitter_ms),
        }
    }
}

impl RetryConfig {
    /// Delay that follows `current`, capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let scaled = current.as_secs_f64() * self.backoff_multiplier;
        Duration::try_from_secs_f64(scaled)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Result of one `execute_with_retry` call
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Success { value: T, attempt: u32 },
    Failure { attempts: u32, errors: Vec<RetryError> },
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    /// Value on success, otherwise the last error seen.
    pub fn into_result(self) -> Result<T, RetryError> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Failure { mut errors, .. } => {
                Err(errors.pop().unwrap_or(RetryError::EmptyResult))
            }
        }
    }
}

/// Retry executor shared by every sub-request of one orchestrator
#[derive(Debug)]
pub struct RetryEngine {
    config: RetryConfig,
    breaker: CircuitBreaker,
    telemetry: Arc<TelemetryRecorder>,
}

impl RetryEngine {
    pub fn new(
        config: RetryConfig,
        breaker: CircuitBreaker,
        telemetry: Arc<TelemetryRecorder>,
    ) -> Self {
        Self {
            config,
            breaker,
            telemetry,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// [`Self::execute_with_retry`] with the engine's own configuration.
    pub async fn execute<T, F, Fut>(&self, request_id: &str, operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, RemoteError>>,
    {
        let config = self.config.clone();
        self.execute_with_retry(request_id, &config, operation).await
    }

    /// Run `operation` until it yields a value, attempts run out, a
    /// non-retryable kind shows up, or the circuit opens.
    ///
    /// `operation` receives the 1-based attempt number. `Ok(None)` counts as
    /// a failure.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        request_id: &str,
        config: &RetryConfig,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, RemoteError>>,
    {
        if !self.breaker.try_acquire() {
            let retry_after = self.breaker.retry_after();
            warn!(
                request_id,
                retry_after_ms = retry_after.as_millis() as u64,
                "Circuit breaker open, rejecting call"
            );
            return RetryOutcome::Failure {
                attempts: 0,
                errors: vec![RetryError::CircuitOpen { retry_after }],
            };
        }

        let max_attempts = config.max_attempts.max(1);
        let mut delay = config.initial_delay;
        let mut errors = Vec::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                // Another caller may have opened the shared breaker while we slept
                if !self.breaker.try_acquire() {
                    let retry_after = self.breaker.retry_after();
                    warn!(
                        request_id,
                        attempt,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Circuit opened during backoff, abandoning retries"
                    );
                    errors.push(RetryError::CircuitOpen { retry_after });
                    return RetryOutcome::Failure {
                        attempts: attempt - 1,
                        errors,
                    };
                }
                self.telemetry.record_retry(request_id, attempt);
            }

            let error = match operation(attempt).await {
                Ok(Some(value)) => {
                    self.breaker.record_success();
                    if attempt > 1 {
                        info!(request_id, attempt, "Operation succeeded after retries");
                    }
                    return RetryOutcome::Success { value, attempt };
                }
                Ok(None) => RetryError::EmptyResult,
                Err(err) => RetryError::Remote(err),
            };

            let kind = error.kind();
            warn!(
                request_id,
                attempt,
                max_attempts,
                error_kind = %kind,
                retryable = kind.is_retryable(),
                error = %error,
                "Attempt failed"
            );
            errors.push(error);

            if self.breaker.record_failure() {
                self.telemetry.record_circuit_trip();
            }
            if self.breaker.state() == CircuitBreakerState::Open {
                return RetryOutcome::Failure {
                    attempts: attempt,
                    errors,
                };
            }

            if kind.aborts_retry() {
                debug!(request_id, error_kind = %kind, "Not retrying");
                return RetryOutcome::Failure {
                    attempts: attempt,
                    errors,
                };
            }

            if attempt < max_attempts {
                let sleep_for = delay + config.jitter();
                debug!(
                    request_id,
                    attempt,
                    delay_ms = sleep_for.as_millis() as u64,
                    "Backing off before next attempt"
                );
                tokio::time::sleep(sleep_for).await;
                delay = config.next_delay(delay);
            }
        }

        RetryOutcome::Failure {
            attempts: max_attempts,
            errors,
        }
    }

    /// Content-based check used for logging; the loop itself switches on
    /// [`ErrorKind`].
    pub fn is_retryable(error: &RemoteError) -> bool {
        error.kind.is_retryable() || ErrorKind::classify_message(&error.message).is_retryable()
    }

    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
            max_jitter: Duration::ZERO,
        }
    }

    fn engine() -> RetryEngine {
        RetryEngine::new(
            quick_config(3),
            CircuitBreaker::new(CircuitBreakerConfig::default()),
            Arc::new(TelemetryRecorder::new()),
        )
    }

    #[tokio::test]
    async fn test_successful_operation_no_retries() {
        let engine = engine();
        let outcome = engine.execute("r1", |_| async { Ok(Some(42)) }).await;
        assert_eq!(outcome, RetryOutcome::Success { value: 42, attempt: 1 });
    }

    #[tokio::test]
    async fn test_empty_result_is_retried() {
        let engine = engine();
        let calls = AtomicU32::new(0);

        let outcome = engine
            .execute("r1", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(if attempt == 2 { Some("ok") } else { None }) }
            })
            .await;

        assert_eq!(outcome, RetryOutcome::Success { value: "ok", attempt: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let engine = engine();
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = engine
            .execute("r1", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::new(ErrorKind::Auth, "401 Unauthorized")) }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Failure { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_errors_are_still_retried() {
        let engine = engine();
        let outcome: RetryOutcome<()> = engine
            .execute("r1", |_| async { Err(RemoteError::new(ErrorKind::Unknown, "malformed")) })
            .await;

        match outcome {
            RetryOutcome::Failure { attempts, errors } => {
                assert_eq!(attempts, 3);
                assert_eq!(errors.len(), 3);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stops_when_breaker_opened_elsewhere() {
        let engine = engine();
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = engine
            .execute("r1", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                // A concurrent caller trips the shared breaker mid-call
                for _ in 0..5 {
                    engine.circuit_breaker().record_failure();
                }
                async { Err(RemoteError::transient("timeout")) }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Failure { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.circuit_breaker().state(), CircuitBreakerState::Open);
    }

    #[test]
    fn test_backoff_growth_is_capped() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            ..RetryConfig::default()
        };

        let second = config.next_delay(config.initial_delay);
        let third = config.next_delay(second);
        let fourth = config.next_delay(third);

        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(third, Duration::from_millis(350));
        assert_eq!(fourth, Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let config = RetryConfig::default();
        for _ in 0..100 {
            assert!(config.jitter() <= Duration::from_millis(500));
        }
        assert_eq!(quick_config(1).jitter(), Duration::ZERO);
    }

    #[test]
    fn test_error_mapping() {
        let open = RetryError::CircuitOpen {
            retry_after: Duration::from_secs(2),
        };
        assert_eq!(open.kind(), ErrorKind::CircuitOpen);
        assert_eq!(
            open.to_generation_error("image"),
            GenerationError::CircuitOpen { retry_after_ms: 2000 }
        );
        assert!(matches!(
            RetryError::EmptyResult.to_generation_error("text"),
            GenerationError::EmptyResult { .. }
        ));
        assert!(RetryEngine::is_retryable(&RemoteError::new(
            ErrorKind::Unknown,
            "connection reset"
        )));
    }
}
