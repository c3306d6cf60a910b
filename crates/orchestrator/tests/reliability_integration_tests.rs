//! Reliability Integration Tests
//!
//! Retry engine and circuit breaker working together:
//! - exponential backoff until success
//! - exhaustion and per-kind abort rules
//! - breaker opening, rejection and half-open recovery
//! - one breaker shared by concurrent retry loops

use orchestrator::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, ErrorKind, RemoteError,
    RetryConfig, RetryEngine, RetryError, RetryOutcome, TelemetryRecorder,
};
use rstest::rstest;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fixed_retry(max_attempts: u32, delay: Duration) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: delay,
        max_delay: delay,
        backoff_multiplier: 1.0,
        max_jitter: Duration::ZERO,
    }
}

fn quick_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        max_jitter: Duration::ZERO,
    }
}

fn engine(max_attempts: u32, failure_threshold: u32, recovery: Duration) -> RetryEngine {
    RetryEngine::new(
        quick_retry(max_attempts),
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout: recovery,
        }),
        Arc::new(TelemetryRecorder::new()),
    )
}

/// Test that the third attempt's value is returned after two transient failures
#[tokio::test]
async fn test_succeeds_on_third_attempt() {
    let engine = engine(3, 5, Duration::from_secs(60));
    let calls = AtomicU32::new(0);

    let outcome = engine
        .execute("req-1", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(RemoteError::transient("connection reset"))
                } else {
                    Ok(Some("done"))
                }
            }
        })
        .await;

    assert_eq!(
        outcome,
        RetryOutcome::Success {
            value: "done",
            attempt: 3
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(engine.circuit_breaker().state(), CircuitBreakerState::Closed);
}

/// Test that every attempt's error is kept when retries run out
#[tokio::test]
async fn test_exhaustion_reports_every_error() {
    let engine = engine(3, 10, Duration::from_secs(60));

    let outcome: RetryOutcome<()> = engine
        .execute("req-2", |_| async { Err(RemoteError::transient("timeout")) })
        .await;

    match outcome {
        RetryOutcome::Failure { attempts, errors } => {
            assert_eq!(attempts, 3);
            assert_eq!(errors.len(), 3);
            assert!(errors.iter().all(|e| e.kind() == ErrorKind::Transient));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

/// Test which kinds stop the loop after a single attempt
#[rstest]
#[case(ErrorKind::Auth, 1)]
#[case(ErrorKind::ResourceConstraint, 1)]
#[case(ErrorKind::Transient, 3)]
#[case(ErrorKind::Unknown, 3)]
#[tokio::test]
async fn test_attempts_by_error_kind(#[case] kind: ErrorKind, #[case] expected_calls: u32) {
    let engine = engine(3, 10, Duration::from_secs(60));
    let calls = AtomicU32::new(0);

    let outcome: RetryOutcome<()> = engine
        .execute("req-kind", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(RemoteError::new(kind, "scripted")) }
        })
        .await;

    assert!(!outcome.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
}

/// Test that the breaker opens after five failures and blocks the sixth call
#[tokio::test]
async fn test_breaker_blocks_after_threshold() {
    let engine = engine(1, 5, Duration::from_secs(60));
    let calls = AtomicU32::new(0);

    for _ in 0..5 {
        let _: RetryOutcome<()> = engine
            .execute("req-3", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::transient("503")) }
            })
            .await;
    }
    assert_eq!(engine.circuit_breaker().state(), CircuitBreakerState::Open);

    let outcome: RetryOutcome<()> = engine
        .execute("req-3", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Some(())) }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 5, "sixth call must not run");
    assert!(matches!(
        outcome.into_result(),
        Err(RetryError::CircuitOpen { .. })
    ));
    assert_eq!(engine.circuit_breaker().stats().blocked_requests, 1);
}

/// Test half-open recovery after the recovery timeout
#[tokio::test]
async fn test_breaker_recovers_through_half_open() {
    let engine = engine(1, 2, Duration::from_millis(20));

    for _ in 0..2 {
        let _: RetryOutcome<()> = engine
            .execute("req-4", |_| async { Err(RemoteError::transient("network down")) })
            .await;
    }
    assert_eq!(engine.circuit_breaker().state(), CircuitBreakerState::Open);

    tokio::time::sleep(Duration::from_millis(40)).await;

    let outcome = engine.execute("req-4", |_| async { Ok(Some(42)) }).await;
    assert_eq!(outcome.into_result(), Ok(42));
    assert_eq!(engine.circuit_breaker().state(), CircuitBreakerState::Closed);
    assert_eq!(engine.circuit_breaker().stats().recovery_attempts, 1);
}

/// Test that a failed half-open call re-opens the circuit
#[tokio::test]
async fn test_failed_half_open_call_reopens() {
    let engine = engine(3, 1, Duration::from_millis(10));

    let _: RetryOutcome<()> = engine
        .execute("req-5", |_| async { Err(RemoteError::transient("timeout")) })
        .await;
    tokio::time::sleep(Duration::from_millis(25)).await;

    let calls = AtomicU32::new(0);
    let _: RetryOutcome<()> = engine
        .execute("req-5", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RemoteError::transient("timeout")) }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.circuit_breaker().state(), CircuitBreakerState::Open);
    assert_eq!(engine.circuit_breaker().stats().trips, 2);
}

/// Test that concurrent retry loops on one engine stop once the shared breaker opens
#[tokio::test]
async fn test_concurrent_loops_stop_at_threshold() {
    let engine = Arc::new(RetryEngine::new(
        fixed_retry(5, Duration::from_millis(10)),
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }),
        Arc::new(TelemetryRecorder::new()),
    ));
    let calls = Arc::new(AtomicU32::new(0));
    let calls_while_open = Arc::new(AtomicU32::new(0));

    let workers: Vec<_> = (0..2)
        .map(|worker| {
            let engine = engine.clone();
            let calls = calls.clone();
            let calls_while_open = calls_while_open.clone();
            tokio::spawn(async move {
                let request_id = format!("req-concurrent-{}", worker);
                let outcome: RetryOutcome<()> = engine
                    .execute(&request_id, |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if engine.circuit_breaker().state() == CircuitBreakerState::Open {
                            calls_while_open.fetch_add(1, Ordering::SeqCst);
                        }
                        async { Err(RemoteError::transient("upstream timeout")) }
                    })
                    .await;
                outcome
            })
        })
        .collect();

    for worker in workers {
        let outcome = worker.await.expect("worker task");
        assert!(!outcome.is_success());
    }

    assert_eq!(engine.circuit_breaker().state(), CircuitBreakerState::Open);
    // Five failures open the circuit; at most one call was already in flight
    assert!(calls.load(Ordering::SeqCst) <= 6, "calls = {}", calls.load(Ordering::SeqCst));
    assert!(calls_while_open.load(Ordering::SeqCst) <= 1);
    assert_eq!(engine.circuit_breaker().stats().trips, 1);
}
