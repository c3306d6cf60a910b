#![allow(dead_code)]
//! Shared fixtures for the integration tests

use async_trait::async_trait;
use orchestrator::{
    ErrorKind, GeneratedText, GenerationRequest, ImageData, OrchestratorSettings, OutputMode,
    RemoteError, RemoteGenerationEndpoint, RemoteResult,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// What a stubbed remote call does
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    Succeed,
    Empty,
    Fail(ErrorKind),
}

/// Endpoint double that counts calls and answers from a fixed script.
pub struct StubEndpoint {
    pub image: Behavior,
    pub text: Behavior,
    pub latency: Duration,
    pub image_calls: AtomicU32,
    pub text_calls: AtomicU32,
    pub combined_calls: AtomicU32,
}

impl StubEndpoint {
    pub fn new(image: Behavior, text: Behavior) -> Self {
        Self {
            image,
            text,
            latency: Duration::ZERO,
            image_calls: AtomicU32::new(0),
            text_calls: AtomicU32::new(0),
            combined_calls: AtomicU32::new(0),
        }
    }

    pub fn healthy() -> Self {
        Self::new(Behavior::Succeed, Behavior::Succeed)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn image_calls(&self) -> u32 {
        self.image_calls.load(Ordering::SeqCst)
    }

    pub fn text_calls(&self) -> u32 {
        self.text_calls.load(Ordering::SeqCst)
    }

    async fn answer<T>(&self, behavior: Behavior, value: impl FnOnce() -> T) -> RemoteResult<T> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match behavior {
            Behavior::Succeed => Ok(Some(value())),
            Behavior::Empty => Ok(None),
            Behavior::Fail(kind) => Err(RemoteError::new(kind, "stubbed failure")),
        }
    }
}

#[async_trait]
impl RemoteGenerationEndpoint for StubEndpoint {
    async fn generate_image(
        &self,
        _prompt: &str,
        _images: &[ImageData],
        _temperature: f32,
    ) -> RemoteResult<ImageData> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(self.image, || solid_image(16, 12, [200, 80, 40, 255]))
            .await
    }

    async fn generate_text(
        &self,
        prompt: &str,
        _images: &[ImageData],
        _temperature: f32,
    ) -> RemoteResult<GeneratedText> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        let content = format!("A description of {}", prompt);
        self.answer(self.text, || GeneratedText::new(content)).await
    }

    async fn generate_combined(
        &self,
        _prompt: &str,
        _images: &[ImageData],
        _temperature: f32,
    ) -> RemoteResult<(Option<ImageData>, Option<GeneratedText>)> {
        self.combined_calls.fetch_add(1, Ordering::SeqCst);
        let image = (self.image == Behavior::Succeed).then(|| solid_image(16, 12, [0, 0, 0, 255]));
        let text = (self.text == Behavior::Succeed).then(|| GeneratedText::new("combined"));
        self.answer(Behavior::Succeed, || (image, text)).await
    }
}

pub fn solid_image(width: u32, height: u32, rgba: [u8; 4]) -> ImageData {
    ImageData::from_rgba(width, height, rgba.repeat((width * height) as usize))
        .expect("pixel buffer matches dimensions")
}

/// Defaults with millisecond backoff so retries do not slow the suite down.
pub fn fast_settings() -> OrchestratorSettings {
    let mut settings = OrchestratorSettings::default();
    settings.retry.initial_delay_ms = 1;
    settings.retry.max_delay_ms = 4;
    settings.retry.max_jitter_ms = 0;
    settings
}

pub fn request(prompt: &str, mode: OutputMode) -> GenerationRequest {
    GenerationRequest::new(prompt, vec![], mode, Default::default()).expect("valid request")
}
