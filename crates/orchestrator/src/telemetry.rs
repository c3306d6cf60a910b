//! Telemetry recorder for the generation pipeline
//!
//! Counters that many in-flight requests bump concurrently are atomics; keyed
//! maps sit behind their own `RwLock`s so unrelated updates never contend on a
//! single global lock.

use chrono::{DateTime, Utc};
use common::ErrorKind;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Size of the ring buffer behind [`TelemetryRecorder::get_recent_metrics`]
    pub recent_capacity: usize,
    /// Frames slower than this count as dropped
    pub frame_drop_threshold: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            recent_capacity: 100,
            frame_drop_threshold: Duration::from_millis(16),
        }
    }
}

impl From<&common::TelemetryConfigBase> for TelemetryConfig {
    fn from(base: &common::TelemetryConfigBase) -> Self {
        Self {
            recent_capacity: base.recent_metrics_capacity.max(1),
            frame_drop_threshold: Duration::from_millis(base.frame_drop_threshold_ms),
        }
    }
}

/// Which cache store an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheStore {
    Image,
    Text,
}

/// Completed request, kept for debugging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub retries: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
}

/// Aggregated view for diagnostics surfaces
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub in_flight_requests: u64,
    /// Percentage of completed requests that succeeded
    pub success_rate: f64,
    /// Failure count per error kind
    pub error_distribution: HashMap<String, u64>,
    pub per_operation: HashMap<String, OperationSummary>,
    pub total_retries: u64,
    pub circuit_breaker_trips: u64,
    pub image_cache: StoreSummary,
    pub text_cache: StoreSummary,
    pub frames_recorded: u64,
    pub frame_drops: u64,
    /// Percentage of recorded frames that were dropped
    pub frame_drop_rate: f64,
}

#[derive(Debug, Default)]
struct StoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
}

impl StoreCounters {
    fn summary(&self) -> StoreSummary {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        StoreSummary {
            hits,
            misses,
            puts: self.puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: ratio(hits, hits + misses),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct OperationCounters {
    started: u64,
    succeeded: u64,
    failed: u64,
    total_latency_ms: u64,
}

#[derive(Debug)]
struct InFlight {
    operation: String,
    started: Instant,
    started_at: DateTime<Utc>,
    retries: u32,
}

/// Process-wide counters for one orchestrator instance
#[derive(Debug)]
pub struct TelemetryRecorder {
    config: TelemetryConfig,
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    circuit_trips: AtomicU64,
    frames: AtomicU64,
    frame_drops: AtomicU64,
    image_cache: StoreCounters,
    text_cache: StoreCounters,
    in_flight: RwLock<HashMap<String, InFlight>>,
    operations: RwLock<HashMap<String, OperationCounters>>,
    error_kinds: RwLock<HashMap<ErrorKind, u64>>,
    recent: RwLock<VecDeque<RequestRecord>>,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self::with_config(TelemetryConfig::default())
    }

    pub fn with_config(config: TelemetryConfig) -> Self {
        let capacity = config.recent_capacity.max(1);
        Self {
            config,
            started: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            circuit_trips: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            frame_drops: AtomicU64::new(0),
            image_cache: StoreCounters::default(),
            text_cache: StoreCounters::default(),
            in_flight: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            error_kinds: RwLock::new(HashMap::new()),
            recent: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record_request_start(&self, request_id: &str, operation: &str) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.operations
            .write()
            .entry(operation.to_string())
            .or_default()
            .started += 1;
        self.in_flight.write().insert(
            request_id.to_string(),
            InFlight {
                operation: operation.to_string(),
                started: Instant::now(),
                started_at: Utc::now(),
                retries: 0,
            },
        );
        debug!(request_id, operation, "Request started");
    }

    pub fn record_request_success(&self, request_id: &str) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.complete(request_id, true, None);
    }

    pub fn record_request_failure(&self, request_id: &str, kind: ErrorKind, message: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self.error_kinds.write().entry(kind).or_insert(0) += 1;
        debug!(request_id, error_kind = %kind, error = message, "Request failed");
        self.complete(request_id, false, Some(kind));
    }

    pub fn record_retry(&self, request_id: &str, attempt: u32) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        if let Some(entry) = self.in_flight.write().get_mut(request_id) {
            entry.retries += 1;
        }
        debug!(request_id, attempt, "Retry recorded");
    }

    pub fn record_circuit_trip(&self) {
        self.circuit_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self, store: CacheStore) {
        self.store(store).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self, store: CacheStore) {
        self.store(store).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_put(&self, store: CacheStore) {
        self.store(store).puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_eviction(&self, store: CacheStore) {
        self.store(store).evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_error(&self, store: CacheStore) {
        self.store(store).errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one rendered frame; slow frames also count as drops.
    pub fn record_frame(&self, frame_time: Duration) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        if frame_time > self.config.frame_drop_threshold {
            self.frame_drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a drop reported directly by the renderer.
    pub fn record_frame_drop(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.frame_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_telemetry_report(&self) -> TelemetryReport {
        let successful = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let frames = self.frames.load(Ordering::Relaxed);
        let drops = self.frame_drops.load(Ordering::Relaxed);

        let error_distribution = self
            .error_kinds
            .read()
            .iter()
            .map(|(kind, count)| (kind.as_str().to_string(), *count))
            .collect();

        let per_operation = self
            .operations
            .read()
            .iter()
            .map(|(name, c)| {
                let completed = c.succeeded + c.failed;
                let avg_latency_ms = if completed == 0 {
                    0.0
                } else {
                    c.total_latency_ms as f64 / completed as f64
                };
                (
                    name.clone(),
                    OperationSummary {
                        started: c.started,
                        succeeded: c.succeeded,
                        failed: c.failed,
                        avg_latency_ms,
                    },
                )
            })
            .collect();

        TelemetryReport {
            total_requests: self.started.load(Ordering::Relaxed),
            successful_requests: successful,
            failed_requests: failed,
            in_flight_requests: self.in_flight.read().len() as u64,
            success_rate: ratio(successful, successful + failed) * 100.0,
            error_distribution,
            per_operation,
            total_retries: self.retries.load(Ordering::Relaxed),
            circuit_breaker_trips: self.circuit_trips.load(Ordering::Relaxed),
            image_cache: self.image_cache.summary(),
            text_cache: self.text_cache.summary(),
            frames_recorded: frames,
            frame_drops: drops,
            frame_drop_rate: ratio(drops, frames) * 100.0,
        }
    }

    /// The last `n` completed requests, oldest first.
    pub fn get_recent_metrics(&self, n: usize) -> Vec<RequestRecord> {
        let recent = self.recent.read();
        let skip = recent.len().saturating_sub(n);
        recent.iter().skip(skip).cloned().collect()
    }

    /// Log the current report and return it.
    pub fn flush_summary(&self) -> TelemetryReport {
        let report = self.get_telemetry_report();
        info!(
            total_requests = report.total_requests,
            successful = report.successful_requests,
            failed = report.failed_requests,
            success_rate = report.success_rate,
            retries = report.total_retries,
            image_hit_rate = report.image_cache.hit_rate,
            text_hit_rate = report.text_cache.hit_rate,
            frame_drop_rate = report.frame_drop_rate,
            errors = %serde_json::to_string(&report.error_distribution).unwrap_or_default(),
            "Telemetry summary"
        );
        report
    }

    fn store(&self, store: CacheStore) -> &StoreCounters {
        match store {
            CacheStore::Image => &self.image_cache,
            CacheStore::Text => &self.text_cache,
        }
    }

    fn complete(&self, request_id: &str, success: bool, error_kind: Option<ErrorKind>) {
        let entry = self.in_flight.write().remove(request_id);

        let record = match entry {
            Some(entry) => RequestRecord {
                request_id: request_id.to_string(),
                operation: entry.operation,
                started_at: entry.started_at,
                duration_ms: entry.started.elapsed().as_millis() as u64,
                success,
                error_kind,
                retries: entry.retries,
            },
            None => RequestRecord {
                request_id: request_id.to_string(),
                operation: "unknown".to_string(),
                started_at: Utc::now(),
                duration_ms: 0,
                success,
                error_kind,
                retries: 0,
            },
        };

        {
            let mut operations = self.operations.write();
            let counters = operations.entry(record.operation.clone()).or_default();
            if success {
                counters.succeeded += 1;
            } else {
                counters.failed += 1;
            }
            counters.total_latency_ms += record.duration_ms;
        }

        let mut recent = self.recent.write();
        if recent.len() >= self.config.recent_capacity.max(1) {
            recent.pop_front();
        }
        recent.push_back(record);
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
