//! Request and result types for the generation pipeline

use common::GenerationError;
use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Decoded raster shared between the request, the cache and the caller.
///
/// Cloning is cheap; the pixels live behind an `Arc`.
#[derive(Clone)]
pub struct ImageData {
    inner: Arc<DynamicImage>,
}

impl ImageData {
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self {
            inner: Arc::new(image),
        }
    }

    /// Build from tightly packed RGBA8 pixels.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, GenerationError> {
        RgbaImage::from_raw(width, height, pixels)
            .map(|buffer| Self::from_dynamic(DynamicImage::ImageRgba8(buffer)))
            .ok_or_else(|| {
                GenerationError::invalid(
                    "image",
                    format!("pixel buffer does not match {}x{} RGBA", width, height),
                )
            })
    }

    /// Decode PNG/JPEG bytes.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, GenerationError> {
        image::load_from_memory(bytes)
            .map(Self::from_dynamic)
            .map_err(|e| GenerationError::invalid("image", e.to_string()))
    }

    pub fn width(&self) -> u32 {
        self.inner.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.height()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.inner
    }

    pub fn raw_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("color", &self.inner.color())
            .finish()
    }
}

impl PartialEq for ImageData {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.width() == other.width()
                && self.height() == other.height()
                && self.inner.color() == other.inner.color()
                && self.raw_bytes() == other.raw_bytes())
    }
}

/// Which artifacts a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputMode {
    ImageOnly,
    TextOnly,
    Combined,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::ImageOnly => "image",
            OutputMode::TextOnly => "text",
            OutputMode::Combined => "combined",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputStyle {
    #[default]
    Natural,
    Vivid,
    Artistic,
    Technical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RequestKind {
    /// Create new content from the prompt
    #[default]
    Generate,
    /// Improve the supplied images; at least one is required
    Enhance,
}

/// Tuning knobs for one request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    creativity: f32,
    detail: u8,
    reasoning_depth: u8,
    style: OutputStyle,
}

impl GenerationParameters {
    pub fn new(
        creativity: f32,
        detail: u8,
        reasoning_depth: u8,
        style: OutputStyle,
    ) -> Result<Self, GenerationError> {
        if !(0.0..=1.0).contains(&creativity) {
            return Err(GenerationError::invalid(
                "creativity",
                format!("{} is outside [0, 1]", creativity),
            ));
        }
        if !(1..=5).contains(&detail) {
            return Err(GenerationError::invalid(
                "detail",
                format!("{} is outside [1, 5]", detail),
            ));
        }
        if !(1..=3).contains(&reasoning_depth) {
            return Err(GenerationError::invalid(
                "reasoning_depth",
                format!("{} is outside [1, 3]", reasoning_depth),
            ));
        }

        Ok(Self {
            creativity,
            detail,
            reasoning_depth,
            style,
        })
    }

    pub fn creativity(&self) -> f32 {
        self.creativity
    }

    pub fn detail(&self) -> u8 {
        self.detail
    }

    pub fn reasoning_depth(&self) -> u8 {
        self.reasoning_depth
    }

    pub fn style(&self) -> OutputStyle {
        self.style
    }
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            creativity: 0.7,
            detail: 3,
            reasoning_depth: 2,
            style: OutputStyle::Natural,
        }
    }
}

/// Immutable description of one user action
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    images: Vec<ImageData>,
    output_mode: OutputMode,
    parameters: GenerationParameters,
    kind: RequestKind,
}

impl GenerationRequest {
    pub fn new(
        prompt: impl Into<String>,
        images: Vec<ImageData>,
        output_mode: OutputMode,
        parameters: GenerationParameters,
    ) -> Result<Self, GenerationError> {
        Self::build(prompt.into(), images, output_mode, parameters, RequestKind::Generate)
    }

    /// Enhancement of existing images; fails when `images` is empty.
    pub fn enhance(
        prompt: impl Into<String>,
        images: Vec<ImageData>,
        output_mode: OutputMode,
        parameters: GenerationParameters,
    ) -> Result<Self, GenerationError> {
        Self::build(prompt.into(), images, output_mode, parameters, RequestKind::Enhance)
    }

    fn build(
        prompt: String,
        images: Vec<ImageData>,
        output_mode: OutputMode,
        parameters: GenerationParameters,
        kind: RequestKind,
    ) -> Result<Self, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::invalid("prompt", "prompt is empty"));
        }
        if kind == RequestKind::Enhance && images.is_empty() {
            return Err(GenerationError::invalid("images", "no images selected"));
        }

        Ok(Self {
            prompt,
            images,
            output_mode,
            parameters,
            kind,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn images(&self) -> &[ImageData] {
        &self.images
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    pub fn parameters(&self) -> &GenerationParameters {
        &self.parameters
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Stable cache key.
    ///
    /// Covers prompt, output mode, creativity and the content of every input
    /// image, so two requests that differ only in their images never share an
    /// entry.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prompt.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.output_mode.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.parameters.creativity.to_bits().to_le_bytes());

        for image in &self.images {
            hasher.update(image.width().to_le_bytes());
            hasher.update(image.height().to_le_bytes());
            hasher.update(Sha256::digest(image.raw_bytes()));
        }

        format!("{:x}", hasher.finalize())
    }
}

/// Text returned by the remote endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub content: String,
    /// Model reasoning, when the endpoint exposes it
    pub reasoning: Option<String>,
}

impl GeneratedText {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// One event in a request's result sequence
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    Loading {
        progress: f32,
        message: String,
        partial_reasoning: Option<String>,
    },
    Success {
        image: Option<ImageData>,
        text: Option<String>,
        reasoning: Option<String>,
    },
    Error {
        message: String,
        cause: Option<GenerationError>,
    },
}

impl GenerationResult {
    pub fn loading(progress: f32, message: impl Into<String>) -> Self {
        GenerationResult::Loading {
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
            partial_reasoning: None,
        }
    }

    pub fn error(message: impl Into<String>, cause: Option<GenerationError>) -> Self {
        GenerationResult::Error {
            message: message.into(),
            cause,
        }
    }

    /// `Success` with at least one artifact, otherwise `None`.
    pub fn success(
        image: Option<ImageData>,
        text: Option<String>,
        reasoning: Option<String>,
    ) -> Option<Self> {
        if image.is_none() && text.is_none() {
            return None;
        }
        Some(GenerationResult::Success {
            image,
            text,
            reasoning,
        })
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, GenerationResult::Loading { .. })
    }
}
