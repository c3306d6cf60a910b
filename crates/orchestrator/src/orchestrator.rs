//! Generation Orchestrator
//!
//! Drives one [`GenerationRequest`] to a finite, ordered stream of
//! [`GenerationResult`]s: zero or more `Loading` events followed by exactly
//! one `Success` or `Error`.
//!
//! # Flow
//!
//! 1. Cache lookup by fingerprint; a hit ends the stream with `Success`.
//! 2. API key check when a settings store is attached.
//! 3. Optional low-memory notice.
//! 4. Dispatch by output mode through the scheduler and the retry engine.
//!    Combined requests run image and text as two independent tasks, or as
//!    one combined call when memory is tight.
//! 5. Successful artifacts are cached before the terminal event is sent.
//!
//! Cancellation is cooperative: queued sub-requests are dropped and nothing
//! more is emitted, but calls already handed to the endpoint run to
//! completion in the background.

use crate::cache::{CacheConfig, CacheStats, GenerationCache};
use crate::endpoint::RemoteGenerationEndpoint;
use crate::reliability::{CircuitBreaker, CircuitBreakerState, RetryEngine, RetryOutcome};
use crate::resources::{DeviceCapabilities, DeviceCapabilityAdapter, SignalSource};
use crate::scheduler::{PriorityScheduler, QueueStats, SchedulerError, TaskHandle, TaskPriority};
use crate::settings::{self, SettingsStore};
use crate::telemetry::{RequestRecord, TelemetryRecorder, TelemetryReport};
use crate::types::{GeneratedText, GenerationRequest, GenerationResult, ImageData, OutputMode};

use anyhow::Context;
use common::{
    ConfigurationLoader, GenerationError, OperationTimer, OrchestratorSettings, RequestContext,
};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 8;

pub const MSG_LOW_MEMORY: &str = "Low memory detected, using reduced quality mode";
pub const MSG_GENERATING_IMAGE: &str = "Generating image...";
pub const MSG_GENERATING_TEXT: &str = "Generating text...";
pub const MSG_GENERATING_COMBINED: &str = "Generating image and text...";
pub const MSG_FINALIZING: &str = "Finalizing response...";

/// Builder for [`GenerationOrchestrator`]
pub struct OrchestratorBuilder {
    endpoint: Arc<dyn RemoteGenerationEndpoint>,
    settings: OrchestratorSettings,
    signal_source: Option<Arc<dyn SignalSource>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
}

impl OrchestratorBuilder {
    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Signals for the capability adapter; defaults to the host via `sysinfo`.
    pub fn signal_source(mut self, source: Arc<dyn SignalSource>) -> Self {
        self.signal_source = Some(source);
        self
    }

    /// Require an API key from `store` before dispatching.
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn build(self) -> GenerationOrchestrator {
        let settings = self.settings;
        let device = match self.signal_source {
            Some(source) => DeviceCapabilityAdapter::new(source),
            None => DeviceCapabilityAdapter::system(),
        };

        let telemetry = Arc::new(TelemetryRecorder::with_config((&settings.telemetry).into()));
        let capabilities = device.capabilities();

        let cache = GenerationCache::new(
            CacheConfig::resolve(&settings.cache, &capabilities),
            telemetry.clone(),
        );
        let retry = RetryEngine::new(
            (&settings.retry).into(),
            CircuitBreaker::new((&settings.circuit_breaker).into()),
            telemetry.clone(),
        );
        let scheduler = PriorityScheduler::new(
            settings
                .scheduler
                .max_concurrent_tasks
                .unwrap_or(capabilities.max_concurrent_operations),
        );

        info!(
            tier = %capabilities.performance_tier,
            max_concurrent = scheduler.get_queue_stats().max_concurrent,
            "Generation orchestrator ready"
        );

        GenerationOrchestrator {
            pipeline: Arc::new(Pipeline {
                endpoint: self.endpoint,
                cache,
                retry: Arc::new(retry),
                telemetry,
                device,
                scheduler,
                settings_store: self.settings_store,
            }),
            active: Mutex::new(None),
        }
    }
}

/// Shared state every request driver works against
struct Pipeline {
    endpoint: Arc<dyn RemoteGenerationEndpoint>,
    cache: GenerationCache,
    retry: Arc<RetryEngine>,
    telemetry: Arc<TelemetryRecorder>,
    device: DeviceCapabilityAdapter,
    scheduler: PriorityScheduler,
    settings_store: Option<Arc<dyn SettingsStore>>,
}

pub struct GenerationOrchestrator {
    pipeline: Arc<Pipeline>,
    /// Most recent request
    active: Mutex<Option<ActiveRequest>>,
}

struct ActiveRequest {
    request_id: String,
    token: CancellationToken,
}

impl GenerationOrchestrator {
    pub fn builder(endpoint: Arc<dyn RemoteGenerationEndpoint>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            endpoint,
            settings: OrchestratorSettings::default(),
            signal_source: None,
            settings_store: None,
        }
    }

    pub fn new(
        endpoint: Arc<dyn RemoteGenerationEndpoint>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self::builder(endpoint).settings(settings).build()
    }

    /// Validated settings from config files and `GENAI_*` environment overrides.
    pub fn from_loader(
        endpoint: Arc<dyn RemoteGenerationEndpoint>,
        loader: &ConfigurationLoader,
    ) -> anyhow::Result<Self> {
        let settings = loader
            .load()
            .context("Failed to load orchestrator settings")?;
        Ok(Self::new(endpoint, settings))
    }

    /// Lazy result stream for `request`.
    ///
    /// Nothing runs until the stream is first polled. The stream ends after
    /// the terminal event, or silently once [`Self::cancel_generation`] is
    /// called.
    pub fn generate_content(
        &self,
        request: GenerationRequest,
    ) -> BoxStream<'static, GenerationResult> {
        let ctx = RequestContext::new();
        let token = CancellationToken::new();
        *self.active.lock() = Some(ActiveRequest {
            request_id: ctx.request_id.clone(),
            token: token.clone(),
        });

        let pipeline = self.pipeline.clone();
        let driver_token = token.clone();

        stream::once(async move {
            let (tx, rx) = mpsc::channel(EVENT_BUFFER);
            let emitter = Emitter {
                tx,
                token: driver_token,
            };
            tokio::spawn(async move { pipeline.run(ctx, request, emitter).await });
            ReceiverStream::new(rx)
        })
        .flatten()
        .take_while(move |_| {
            let live = !token.is_cancelled();
            async move { live }
        })
        .boxed()
    }

    /// Stop emitting for the active request and drop its queued sub-requests.
    ///
    /// Sub-requests of earlier requests stay queued and run to completion.
    pub fn cancel_generation(&self) {
        if let Some(active) = self.active.lock().take() {
            active.token.cancel();
            let dropped = self.pipeline.scheduler.clear_group(&active.request_id);
            info!(request_id = %active.request_id, dropped, "Generation cancelled");
        }
    }

    /// Close the circuit after a user-initiated retry.
    pub fn reset_circuit_breaker(&self) {
        self.pipeline.retry.reset_circuit_breaker();
    }

    pub fn circuit_state(&self) -> CircuitBreakerState {
        self.pipeline.retry.circuit_breaker().state()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.pipeline.cache.get_stats()
    }

    pub fn clear_cache(&self) {
        self.pipeline.cache.clear();
    }

    pub fn telemetry_report(&self) -> TelemetryReport {
        self.pipeline.telemetry.get_telemetry_report()
    }

    pub fn recent_metrics(&self, n: usize) -> Vec<RequestRecord> {
        self.pipeline.telemetry.get_recent_metrics(n)
    }

    /// Recorder handle, e.g. for frame timing from the render loop.
    pub fn telemetry(&self) -> Arc<TelemetryRecorder> {
        self.pipeline.telemetry.clone()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.pipeline.scheduler.get_queue_stats()
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.pipeline.device.capabilities()
    }
}

struct Emitter {
    tx: mpsc::Sender<GenerationResult>,
    token: CancellationToken,
}

impl Emitter {
    /// `false` once the request is cancelled or the consumer is gone.
    async fn emit(&self, result: GenerationResult) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.tx.send(result).await.is_ok()
    }
}

/// Inputs shared by the sub-requests of one request
#[derive(Clone)]
struct SubRequest {
    request_id: String,
    prompt: Arc<str>,
    images: Arc<Vec<ImageData>>,
    temperature: f32,
}

impl Pipeline {
    async fn run(
        self: Arc<Self>,
        ctx: RequestContext,
        request: GenerationRequest,
        emitter: Emitter,
    ) {
        let mode = request.output_mode();
        let key = request.fingerprint();
        let timer = OperationTimer::new(format!("generate_{}", mode)).for_request(&ctx.request_id);

        self.telemetry.record_request_start(&ctx.request_id, mode.as_str());
        debug!(request_id = %ctx.request_id, mode = %mode, key = %key, "Generation started");

        let outcome = self.resolve(&ctx, &request, &key, &emitter).await;

        match &outcome {
            Ok(result) => {
                self.telemetry.record_request_success(&ctx.request_id);
                emitter.emit(result.clone()).await;
            }
            Err(GenerationFailure::Cancelled) => {
                self.telemetry.record_request_failure(
                    &ctx.request_id,
                    GenerationError::Cancelled.kind(),
                    "cancelled",
                );
            }
            Err(GenerationFailure::Failed { message, cause }) => {
                self.telemetry
                    .record_request_failure(&ctx.request_id, cause.kind(), message);
                emitter
                    .emit(GenerationResult::error(message.clone(), Some(cause.clone())))
                    .await;
            }
        }

        timer.finish_with_result(&outcome);
        self.telemetry.flush_summary();
    }

    async fn resolve(
        &self,
        ctx: &RequestContext,
        request: &GenerationRequest,
        key: &str,
        emitter: &Emitter,
    ) -> Result<GenerationResult, GenerationFailure> {
        if let Some(hit) = self.lookup_cache(request.output_mode(), key) {
            info!(request_id = %ctx.request_id, "Served from cache");
            return Ok(hit);
        }

        if let Some(store) = &self.settings_store {
            if settings::api_key(store.as_ref()).is_none() {
                let cause = GenerationError::Auth {
                    reason: "no API key configured".to_string(),
                };
                return Err(GenerationFailure::Failed {
                    message: cause.user_message(),
                    cause,
                });
            }
        }

        let low_memory = self.device.is_under_memory_pressure();
        if low_memory && !emitter.emit(GenerationResult::loading(0.1, MSG_LOW_MEMORY)).await {
            return Err(GenerationFailure::Cancelled);
        }

        let sub = SubRequest {
            request_id: ctx.request_id.clone(),
            prompt: Arc::from(request.prompt()),
            images: Arc::new(request.images().to_vec()),
            temperature: self.device.adjust_temperature(request.parameters().creativity()),
        };

        let result = match request.output_mode() {
            OutputMode::ImageOnly => self.image_only(sub, emitter).await?,
            OutputMode::TextOnly => self.text_only(sub, emitter).await?,
            OutputMode::Combined if low_memory => self.combined_single_call(sub, emitter).await?,
            OutputMode::Combined => self.combined_parallel(sub, emitter).await?,
        };

        if let GenerationResult::Success {
            reasoning: Some(reasoning),
            ..
        } = &result
        {
            let notice = GenerationResult::Loading {
                progress: 0.9,
                message: MSG_FINALIZING.to_string(),
                partial_reasoning: Some(reasoning.clone()),
            };
            if !emitter.emit(notice).await {
                return Err(GenerationFailure::Cancelled);
            }
        }

        self.store(key, &result);
        Ok(result)
    }

    fn lookup_cache(&self, mode: OutputMode, key: &str) -> Option<GenerationResult> {
        match mode {
            OutputMode::ImageOnly => {
                GenerationResult::success(self.cache.get_image(key), None, None)
            }
            OutputMode::TextOnly => GenerationResult::success(None, self.cache.get_text(key), None),
            OutputMode::Combined => {
                let image = self.cache.get_image(key);
                let text = self.cache.get_text(key);
                GenerationResult::success(image, text, None)
            }
        }
    }

    fn store(&self, key: &str, result: &GenerationResult) {
        if let GenerationResult::Success { image, text, .. } = result {
            if let Some(image) = image {
                self.cache.put_image(key, image);
            }
            if let Some(text) = text {
                self.cache.put_text(key, text);
            }
        }
    }

    async fn image_only(
        &self,
        sub: SubRequest,
        emitter: &Emitter,
    ) -> Result<GenerationResult, GenerationFailure> {
        if !emitter.emit(GenerationResult::loading(0.3, MSG_GENERATING_IMAGE)).await {
            return Err(GenerationFailure::Cancelled);
        }

        let handle = self.submit_image(sub, TaskPriority::High);
        let image = await_task(handle, &emitter.token)
            .await?
            .map_err(|cause| GenerationFailure::failed("image", cause))?;

        Ok(GenerationResult::Success {
            image: Some(image),
            text: None,
            reasoning: None,
        })
    }

    async fn text_only(
        &self,
        sub: SubRequest,
        emitter: &Emitter,
    ) -> Result<GenerationResult, GenerationFailure> {
        if !emitter.emit(GenerationResult::loading(0.3, MSG_GENERATING_TEXT)).await {
            return Err(GenerationFailure::Cancelled);
        }

        let handle = self.submit_text(sub, TaskPriority::High);
        let text = await_task(handle, &emitter.token)
            .await?
            .map_err(|cause| GenerationFailure::failed("text", cause))?;

        Ok(GenerationResult::Success {
            image: None,
            text: Some(text.content),
            reasoning: text.reasoning,
        })
    }

    /// Image and text as two independent tasks; either one is enough.
    async fn combined_parallel(
        &self,
        sub: SubRequest,
        emitter: &Emitter,
    ) -> Result<GenerationResult, GenerationFailure> {
        if !emitter.emit(GenerationResult::loading(0.3, MSG_GENERATING_COMBINED)).await {
            return Err(GenerationFailure::Cancelled);
        }

        let image_handle = self.submit_image(sub.clone(), TaskPriority::Normal);
        let text_handle = self.submit_text(sub.clone(), TaskPriority::Normal);

        let (image, text) = tokio::select! {
            _ = emitter.token.cancelled() => return Err(GenerationFailure::Cancelled),
            joined = async { tokio::join!(image_handle.join(), text_handle.join()) } => joined,
        };
        let image = flatten_join(image);
        let text = flatten_join(text);

        match (image, text) {
            (Err(image_err), Err(text_err)) => {
                warn!(
                    request_id = %sub.request_id,
                    image_error = %image_err,
                    text_error = %text_err,
                    "Both sub-requests failed"
                );
                Err(GenerationFailure::failed("image and text", image_err))
            }
            (image, text) => {
                if let Err(e) = &image {
                    warn!(request_id = %sub.request_id, error = %e, "Image sub-request failed");
                }
                if let Err(e) = &text {
                    warn!(request_id = %sub.request_id, error = %e, "Text sub-request failed");
                }
                let text = text.ok();
                let reasoning = text.as_ref().and_then(|t| t.reasoning.clone());
                Ok(GenerationResult::Success {
                    image: image.ok(),
                    text: text.map(|t| t.content),
                    reasoning,
                })
            }
        }
    }

    /// Degraded Combined path: one remote call instead of two.
    async fn combined_single_call(
        &self,
        sub: SubRequest,
        emitter: &Emitter,
    ) -> Result<GenerationResult, GenerationFailure> {
        if !emitter.emit(GenerationResult::loading(0.3, MSG_GENERATING_COMBINED)).await {
            return Err(GenerationFailure::Cancelled);
        }

        let endpoint = self.endpoint.clone();
        let retry = self.retry.clone();
        let request_id = sub.request_id.clone();

        let group = sub.request_id.clone();
        let handle = self.pipeline_task(group, TaskPriority::Normal, async move {
            let outcome = retry
                .execute(&sub.request_id, |_| {
                    let endpoint = endpoint.clone();
                    let sub = sub.clone();
                    async move {
                        let pair = endpoint
                            .generate_combined(&sub.prompt, &sub.images, sub.temperature)
                            .await?;
                        Ok(pair.filter(|(image, text)| image.is_some() || text.is_some()))
                    }
                })
                .await;
            settle(outcome, "combined")
        });

        let (image, text) = await_task(handle, &emitter.token)
            .await?
            .map_err(|cause| GenerationFailure::failed("image and text", cause))?;

        debug!(request_id = %request_id, "Combined call completed");
        let reasoning = text.as_ref().and_then(|t| t.reasoning.clone());
        Ok(GenerationResult::Success {
            image,
            text: text.map(|t| t.content),
            reasoning,
        })
    }

    fn submit_image(
        &self,
        sub: SubRequest,
        priority: TaskPriority,
    ) -> TaskHandle<Result<ImageData, GenerationError>> {
        let endpoint = self.endpoint.clone();
        let retry = self.retry.clone();

        let group = sub.request_id.clone();
        self.pipeline_task(group, priority, async move {
            let outcome = retry
                .execute(&sub.request_id, |_| {
                    let endpoint = endpoint.clone();
                    let sub = sub.clone();
                    async move {
                        endpoint
                            .generate_image(&sub.prompt, &sub.images, sub.temperature)
                            .await
                    }
                })
                .await;
            settle(outcome, "image")
        })
    }

    fn submit_text(
        &self,
        sub: SubRequest,
        priority: TaskPriority,
    ) -> TaskHandle<Result<GeneratedText, GenerationError>> {
        let endpoint = self.endpoint.clone();
        let retry = self.retry.clone();

        let group = sub.request_id.clone();
        self.pipeline_task(group, priority, async move {
            let outcome = retry
                .execute(&sub.request_id, |_| {
                    let endpoint = endpoint.clone();
                    let sub = sub.clone();
                    async move {
                        endpoint
                            .generate_text(&sub.prompt, &sub.images, sub.temperature)
                            .await
                    }
                })
                .await;
            settle(outcome, "text")
        })
    }

    /// Queue `work` under its request's id so cancelling the request drops it.
    fn pipeline_task<T, F>(
        &self,
        request_id: String,
        priority: TaskPriority,
        work: F,
    ) -> TaskHandle<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.scheduler.submit_task_for(request_id, priority, work)
    }
}

/// Internal terminal outcome of a request
#[derive(Debug)]
enum GenerationFailure {
    Cancelled,
    Failed {
        message: String,
        cause: GenerationError,
    },
}

impl GenerationFailure {
    fn failed(artifact: &str, cause: GenerationError) -> Self {
        GenerationFailure::Failed {
            message: format!("Failed to generate {}: {}", artifact, cause.user_message()),
            cause,
        }
    }
}

impl std::fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationFailure::Cancelled => write!(f, "cancelled"),
            GenerationFailure::Failed { message, .. } => write!(f, "{}", message),
        }
    }
}

fn settle<T>(outcome: RetryOutcome<T>, operation: &str) -> Result<T, GenerationError> {
    outcome
        .into_result()
        .map_err(|err| err.to_generation_error(operation))
}

fn flatten_join<T>(
    joined: Result<Result<T, GenerationError>, SchedulerError>,
) -> Result<T, GenerationError> {
    match joined {
        Ok(result) => result,
        Err(SchedulerError::Cancelled) => Err(GenerationError::Cancelled),
        Err(SchedulerError::Panicked(reason)) => Err(GenerationError::Unknown { reason }),
    }
}

/// Wait for a scheduled sub-request unless the request is cancelled first.
async fn await_task<T>(
    handle: TaskHandle<Result<T, GenerationError>>,
    token: &CancellationToken,
) -> Result<Result<T, GenerationError>, GenerationFailure> {
    tokio::select! {
        _ = token.cancelled() => Err(GenerationFailure::Cancelled),
        joined = handle.join() => Ok(flatten_join(joined)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{RemoteError, RemoteResult};
    use crate::resources::FixedSignalSource;
    use crate::settings::InMemorySettingsStore;
    use crate::test_support::solid_image;
    use async_trait::async_trait;
    use common::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct ScriptedEndpoint {
        text_calls: AtomicU32,
        combined_calls: AtomicU32,
        reasoning: Option<String>,
        fail_text_with: Option<ErrorKind>,
    }

    #[async_trait]
    impl RemoteGenerationEndpoint for ScriptedEndpoint {
        async fn generate_image(
            &self,
            _prompt: &str,
            _images: &[ImageData],
            _temperature: f32,
        ) -> RemoteResult<ImageData> {
            Ok(Some(solid_image(8, 8, [10, 20, 30, 255])))
        }

        async fn generate_text(
            &self,
            prompt: &str,
            _images: &[ImageData],
            _temperature: f32,
        ) -> RemoteResult<GeneratedText> {
            self.text_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(kind) = self.fail_text_with {
                return Err(RemoteError::new(kind, "scripted failure"));
            }
            let mut text = GeneratedText::new(format!("about {}", prompt));
            if let Some(reasoning) = &self.reasoning {
                text = text.with_reasoning(reasoning.clone());
            }
            Ok(Some(text))
        }

        async fn generate_combined(
            &self,
            _prompt: &str,
            _images: &[ImageData],
            _temperature: f32,
        ) -> RemoteResult<(Option<ImageData>, Option<GeneratedText>)> {
            self.combined_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some((None, Some(GeneratedText::new("combined")))))
        }
    }

    fn fast_settings() -> OrchestratorSettings {
        let mut settings = OrchestratorSettings::default();
        settings.retry.initial_delay_ms = 1;
        settings.retry.max_delay_ms = 2;
        settings.retry.max_jitter_ms = 0;
        settings
    }

    fn orchestrator_with(
        endpoint: Arc<ScriptedEndpoint>,
        source: Arc<FixedSignalSource>,
    ) -> GenerationOrchestrator {
        GenerationOrchestrator::builder(endpoint)
            .settings(fast_settings())
            .signal_source(source)
            .build()
    }

    fn request(prompt: &str, mode: OutputMode) -> GenerationRequest {
        GenerationRequest::new(prompt, vec![], mode, Default::default()).expect("valid request")
    }

    #[tokio::test]
    async fn test_reasoning_is_surfaced_before_success() {
        let endpoint = Arc::new(ScriptedEndpoint {
            reasoning: Some("considered the prompt".into()),
            ..Default::default()
        });
        let orchestrator =
            orchestrator_with(endpoint, Arc::new(FixedSignalSource::with_memory_gib(16, 8, 8)));

        let events: Vec<_> = orchestrator
            .generate_content(request("a poem", OutputMode::TextOnly))
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], GenerationResult::loading(0.3, MSG_GENERATING_TEXT));
        assert!(matches!(
            &events[1],
            GenerationResult::Loading { partial_reasoning: Some(r), .. } if r == "considered the prompt"
        ));
        assert!(matches!(
            &events[2],
            GenerationResult::Success { reasoning: Some(_), text: Some(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_low_memory_uses_single_combined_call() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let source = Arc::new(FixedSignalSource::with_memory_gib(8, 0, 8));
        let orchestrator = orchestrator_with(endpoint.clone(), source);

        let events: Vec<_> = orchestrator
            .generate_content(request("sunset", OutputMode::Combined))
            .collect()
            .await;

        assert_eq!(events[0], GenerationResult::loading(0.1, MSG_LOW_MEMORY));
        assert!(matches!(
            events.last(),
            Some(GenerationResult::Success { image: None, text: Some(t), .. }) if t == "combined"
        ));
        assert_eq!(endpoint.combined_calls.load(Ordering::SeqCst), 1);
        assert_eq!(endpoint.text_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_reported() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let orchestrator = GenerationOrchestrator::builder(endpoint.clone())
            .settings(fast_settings())
            .signal_source(Arc::new(FixedSignalSource::with_memory_gib(16, 8, 8)))
            .settings_store(Arc::new(InMemorySettingsStore::new()))
            .build();

        let events: Vec<_> = orchestrator
            .generate_content(request("a poem", OutputMode::TextOnly))
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            GenerationResult::Error { message, cause } => {
                assert!(message.contains("API key"));
                assert_eq!(cause.as_ref().map(|c| c.kind()), Some(ErrorKind::Auth));
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(endpoint.text_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_maps_to_actionable_message() {
        let endpoint = Arc::new(ScriptedEndpoint {
            fail_text_with: Some(ErrorKind::Auth),
            ..Default::default()
        });
        let orchestrator = GenerationOrchestrator::builder(endpoint.clone())
            .settings(fast_settings())
            .signal_source(Arc::new(FixedSignalSource::with_memory_gib(16, 8, 8)))
            .settings_store(Arc::new(InMemorySettingsStore::with_api_key("sk-test")))
            .build();

        let events: Vec<_> = orchestrator
            .generate_content(request("a poem", OutputMode::TextOnly))
            .collect()
            .await;

        match events.last() {
            Some(GenerationResult::Error { message, .. }) => {
                assert!(message.starts_with("Failed to generate text"));
                assert!(message.contains("API key"));
            }
            other => panic!("expected error, got {:?}", other),
        }
        // Auth failures are not retried
        assert_eq!(endpoint.text_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_without_active_request_is_noop() {
        tokio_test::block_on(async {
            let orchestrator = orchestrator_with(
                Arc::new(ScriptedEndpoint::default()),
                Arc::new(FixedSignalSource::with_memory_gib(16, 8, 8)),
            );
            orchestrator.cancel_generation();
            assert_eq!(orchestrator.queue_stats().queued_tasks, 0);
        });
    }

    #[tokio::test]
    async fn test_capabilities_drive_cache_and_pool() {
        let orchestrator = orchestrator_with(
            Arc::new(ScriptedEndpoint::default()),
            Arc::new(FixedSignalSource::with_memory_gib(2, 1, 2)),
        );

        let caps = orchestrator.capabilities();
        assert_eq!(orchestrator.queue_stats().max_concurrent, caps.max_concurrent_operations);
        assert_eq!(orchestrator.pipeline.cache.config().image_capacity, caps.recommended_cache_size);
        assert_eq!(orchestrator.circuit_state(), CircuitBreakerState::Closed);
    }
}
