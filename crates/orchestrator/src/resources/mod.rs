//! Device Capability Adapter
//!
//! Turns sampled system signals into tuning parameters: cache sizes, JPEG
//! quality, concurrency and a temperature adjustment. Lower tiers always use
//! strictly fewer resources than higher ones.

pub mod signals;

pub use signals::{
    FixedSignalSource, MemorySnapshot, SignalSource, SysinfoSignalSource, SystemSignals,
    ThermalState,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const GIB: u64 = 1024 * 1024 * 1024;
const LOW_MEMORY_FLOOR: u64 = 512 * 1024 * 1024;
const LOW_MEMORY_RATIO: f64 = 0.15;

/// Coarse device classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PerformanceTier {
    Low,
    Mid,
    High,
}

impl PerformanceTier {
    fn downgrade(self) -> Self {
        match self {
            PerformanceTier::High => PerformanceTier::Mid,
            PerformanceTier::Mid | PerformanceTier::Low => PerformanceTier::Low,
        }
    }
}

impl std::fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PerformanceTier::Low => write!(f, "low"),
            PerformanceTier::Mid => write!(f, "mid"),
            PerformanceTier::High => write!(f, "high"),
        }
    }
}

/// Tuning derived from one signal sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub performance_tier: PerformanceTier,
    /// Image cache entries
    pub recommended_cache_size: usize,
    pub recommended_text_cache_size: usize,
    /// JPEG quality for cached images
    pub recommended_image_quality: u8,
    pub max_concurrent_operations: usize,
}

impl DeviceCapabilities {
    pub fn for_tier(tier: PerformanceTier) -> Self {
        let (images, texts, quality, concurrency) = match tier {
            PerformanceTier::High => (30, 80, 90, 4),
            PerformanceTier::Mid => (20, 50, 85, 3),
            PerformanceTier::Low => (10, 25, 70, 2),
        };

        Self {
            performance_tier: tier,
            recommended_cache_size: images,
            recommended_text_cache_size: texts,
            recommended_image_quality: quality,
            max_concurrent_operations: concurrency,
        }
    }

    /// Pure classification of a sample.
    pub fn from_signals(signals: &SystemSignals) -> Self {
        let total = signals.memory.total;
        let cores = signals.cpu_count;

        let mut tier = if total >= 8 * GIB && cores >= 8 {
            PerformanceTier::High
        } else if total >= 4 * GIB && cores >= 4 {
            PerformanceTier::Mid
        } else {
            PerformanceTier::Low
        };

        if signals.thermal == Some(ThermalState::Critical) {
            tier = tier.downgrade();
        }

        Self::for_tier(tier)
    }
}

pub struct DeviceCapabilityAdapter {
    source: Arc<dyn SignalSource>,
    capabilities: DeviceCapabilities,
}

impl std::fmt::Debug for DeviceCapabilityAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCapabilityAdapter")
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl DeviceCapabilityAdapter {
    /// Samples `source` once and keeps the result for the adapter's lifetime.
    pub fn new(source: Arc<dyn SignalSource>) -> Self {
        let capabilities = DeviceCapabilities::from_signals(&source.sample());
        info!(
            tier = %capabilities.performance_tier,
            image_cache = capabilities.recommended_cache_size,
            text_cache = capabilities.recommended_text_cache_size,
            quality = capabilities.recommended_image_quality,
            concurrency = capabilities.max_concurrent_operations,
            "Device capabilities detected"
        );

        Self {
            source,
            capabilities,
        }
    }

    /// Adapter over the host machine.
    pub fn system() -> Self {
        Self::new(Arc::new(SysinfoSignalSource::new()))
    }

    /// Capabilities computed at construction.
    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    /// Fresh classification of the current signals.
    pub fn detect_capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::from_signals(&self.source.sample())
    }

    pub fn is_under_memory_pressure(&self) -> bool {
        let memory = self.source.memory();
        if memory.total == 0 {
            return false;
        }

        let ratio = memory.available as f64 / memory.total as f64;
        let pressured = ratio < LOW_MEMORY_RATIO || memory.available < LOW_MEMORY_FLOOR;
        if pressured {
            warn!(
                available = memory.available,
                total = memory.total,
                "Device under memory pressure"
            );
        }
        pressured
    }

    /// Temperature handed to the remote model for a given creativity.
    pub fn adjust_temperature(&self, creativity: f32) -> f32 {
        match self.capabilities.performance_tier {
            PerformanceTier::Low => (creativity * 0.9).clamp(0.1, 1.0),
            PerformanceTier::Mid | PerformanceTier::High => creativity,
        }
    }
}
