//! Configuration base types
//!
//! Plain serde structs with defaults. Each component converts its section into
//! its own runtime config; validation lives in [`OrchestratorSettings::validate`].

use crate::errors::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// Retry with exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfigBase {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Upper bound of the random jitter added to every backoff sleep
    pub max_jitter_ms: u64,
}

impl Default for RetryConfigBase {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            max_jitter_ms: 500,
        }
    }
}

/// Circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfigBase {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfigBase {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
        }
    }
}

/// Generation cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfigBase {
    pub image_capacity: usize,
    pub text_capacity: usize,
    /// JPEG quality, 1..=100
    pub image_quality: u8,
    /// Let device capabilities override the three values above
    pub adapt_to_device: bool,
}

impl Default for CacheConfigBase {
    fn default() -> Self {
        Self {
            image_capacity: 20,
            text_capacity: 50,
            image_quality: 85,
            adapt_to_device: true,
        }
    }
}

/// Task scheduler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfigBase {
    /// Fixed pool size; `None` uses the device recommendation
    pub max_concurrent_tasks: Option<usize>,
}

/// Telemetry recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfigBase {
    pub recent_metrics_capacity: usize,
    /// Frames slower than this count as dropped
    pub frame_drop_threshold_ms: u64,
}

impl Default for TelemetryConfigBase {
    fn default() -> Self {
        Self {
            recent_metrics_capacity: 100,
            frame_drop_threshold_ms: 16,
        }
    }
}

/// Everything the orchestrator reads at construction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub retry: RetryConfigBase,
    pub circuit_breaker: CircuitBreakerConfigBase,
    pub cache: CacheConfigBase,
    pub scheduler: SchedulerConfigBase,
    pub telemetry: TelemetryConfigBase,
}

impl OrchestratorSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        let fail = |reason: &str| {
            Err(ConfigError::ValidationFailed {
                reason: reason.to_string(),
            })
        };

        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1");
        }
        if self.retry.backoff_multiplier < 1.0 {
            return fail("retry.backoff_multiplier must be >= 1.0");
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return fail("retry.max_delay_ms must be >= retry.initial_delay_ms");
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return fail("circuit_breaker.failure_threshold must be at least 1");
        }
        if self.cache.image_capacity == 0 || self.cache.text_capacity == 0 {
            return fail("cache capacities must be at least 1");
        }
        if !(1..=100).contains(&self.cache.image_quality) {
            return fail("cache.image_quality must be within 1..=100");
        }
        if self.scheduler.max_concurrent_tasks == Some(0) {
            return fail("scheduler.max_concurrent_tasks must be at least 1");
        }
        if self.telemetry.recent_metrics_capacity == 0 {
            return fail("telemetry.recent_metrics_capacity must be at least 1");
        }

        Ok(())
    }
}
