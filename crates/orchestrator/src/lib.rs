//! Generation Orchestrator
//!
//! Turns one user action (prompt, optional input images, output mode and
//! tuning parameters) into a stream of [`GenerationResult`] events by
//! composing a content-addressed cache, a priority scheduler, a retry engine
//! guarded by a circuit breaker, and a device-aware capability adapter around
//! a pluggable [`RemoteGenerationEndpoint`].
//!
//! # Architecture
//!
//! - **GenerationOrchestrator**: request driver and public entry point
//! - **GenerationCache**: bounded LRU stores for images and texts
//! - **PriorityScheduler**: bounded task pool with priority queueing
//! - **RetryEngine**: exponential backoff with jitter, per-kind abort rules
//! - **CircuitBreaker**: Closed / Open / HalfOpen failure gate
//! - **DeviceCapabilityAdapter**: tiering from memory, cores and thermals
//! - **TelemetryRecorder**: request, cache and frame counters
//!
//! # Usage
//!
//! ```no_run
//! use futures::StreamExt;
//! use orchestrator::{GenerationOrchestrator, GenerationRequest, OutputMode};
//! # use orchestrator::RemoteGenerationEndpoint;
//! # use std::sync::Arc;
//!
//! # async fn run(endpoint: Arc<dyn RemoteGenerationEndpoint>) -> anyhow::Result<()> {
//! let orchestrator = GenerationOrchestrator::builder(endpoint).build();
//!
//! let request = GenerationRequest::new(
//!     "a lighthouse at dusk",
//!     vec![],
//!     OutputMode::Combined,
//!     Default::default(),
//! )?;
//!
//! let mut events = orchestrator.generate_content(request);
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod endpoint;
pub mod orchestrator;
pub mod reliability;
pub mod resources;
pub mod scheduler;
pub mod settings;
pub mod telemetry;
pub mod types;

pub use cache::{BoundedLru, CacheConfig, CacheStats, GenerationCache};
pub use endpoint::{RemoteError, RemoteGenerationEndpoint, RemoteResult};
pub use orchestrator::{GenerationOrchestrator, OrchestratorBuilder};
pub use reliability::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitBreakerStats, RetryConfig,
    RetryEngine, RetryError, RetryOutcome,
};
pub use resources::{
    DeviceCapabilities, DeviceCapabilityAdapter, FixedSignalSource, PerformanceTier,
    SignalSource, SysinfoSignalSource, ThermalState,
};
pub use scheduler::{PriorityScheduler, QueueStats, SchedulerError, TaskHandle, TaskPriority};
pub use settings::{InMemorySettingsStore, SettingsStore};
pub use telemetry::{CacheStore, RequestRecord, TelemetryConfig, TelemetryRecorder, TelemetryReport};
pub use types::{
    GeneratedText, GenerationParameters, GenerationRequest, GenerationResult, ImageData,
    OutputMode, OutputStyle, RequestKind,
};

pub use common::{ErrorKind, GenerationError, OrchestratorSettings};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::types::ImageData;

    /// Single-colour RGBA image.
    pub fn solid_image(width: u32, height: u32, rgba: [u8; 4]) -> ImageData {
        ImageData::from_rgba(width, height, rgba.repeat((width * height) as usize))
            .expect("pixel buffer matches dimensions")
    }
}
