//! Reliability Module
//!
//! Retry with exponential backoff and a circuit breaker shared by every call
//! to the remote generation endpoint.

pub mod circuit_breaker;
pub mod retry_policy;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitBreakerStats,
};
pub use retry_policy::{RetryConfig, RetryEngine, RetryError, RetryOutcome};
