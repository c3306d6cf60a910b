//! Remote generation endpoint seam
//!
//! The transport is external. Implementations tag every failure with an
//! [`ErrorKind`] where it is raised; [`RemoteError::from_message`] exists for
//! transports that only have free text.

use crate::types::{GeneratedText, ImageData};
use async_trait::async_trait;
use common::ErrorKind;
use std::fmt;

/// Failure raised by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status, when the transport has one
    pub status: Option<u16>,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    /// Classify from an HTTP status; the message is kept verbatim.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::from_status(status),
            message: message.into(),
            status: Some(status),
        }
    }

    /// Classify by content for untagged transports.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorKind::classify_message(&message), message)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {}): {}", self.kind, status, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

pub type RemoteResult<T> = Result<Option<T>, RemoteError>;

/// Image and text generation service.
///
/// `Ok(None)` means the service answered without producing the artifact.
#[async_trait]
pub trait RemoteGenerationEndpoint: Send + Sync {
    async fn generate_image(
        &self,
        prompt: &str,
        images: &[ImageData],
        temperature: f32,
    ) -> RemoteResult<ImageData>;

    async fn generate_text(
        &self,
        prompt: &str,
        images: &[ImageData],
        temperature: f32,
    ) -> RemoteResult<GeneratedText>;

    /// Both artifacts from one call. The outer `Option` is `None` when the
    /// call produced nothing at all.
    async fn generate_combined(
        &self,
        prompt: &str,
        images: &[ImageData],
        temperature: f32,
    ) -> RemoteResult<(Option<ImageData>, Option<GeneratedText>)>;
}
