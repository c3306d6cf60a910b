//! Error taxonomy for the generation pipeline
//!
//! Remote failures are tagged with an explicit [`ErrorKind`] at the point where
//! the transport raises them. The retry engine and the orchestrator switch on
//! that kind; free-text classification survives only as a fallback for
//! transports that cannot tag their errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Network, timeout, 5xx, 429
    Transient,
    /// Missing or rejected credential
    Auth,
    /// Circuit breaker rejected the call
    CircuitOpen,
    /// Out of memory, input too large
    ResourceConstraint,
    /// Anything the transport could not classify
    Unknown,
}

impl ErrorKind {
    /// Whether this kind is worth retrying.
    ///
    /// `Unknown` reports `false` here even though the retry loop still gives it
    /// another attempt; this flag only feeds logging and telemetry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Kinds that stop the retry loop at once.
    pub fn aborts_retry(&self) -> bool {
        matches!(
            self,
            ErrorKind::Auth | ErrorKind::ResourceConstraint | ErrorKind::CircuitOpen
        )
    }

    /// Content-based classification for untagged transport errors.
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("401")
            || lower.contains("403")
            || lower.contains("api key")
            || lower.contains("unauthorized")
            || lower.contains("forbidden")
        {
            return ErrorKind::Auth;
        }

        if lower.contains("out of memory")
            || lower.contains("too large")
            || lower.contains("413")
        {
            return ErrorKind::ResourceConstraint;
        }

        if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("network")
            || lower.contains("connection")
            || lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("503")
            || lower.contains("unavailable")
        {
            return ErrorKind::Transient;
        }

        ErrorKind::Unknown
    }

    /// Classification of an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 429 | 500..=599 => ErrorKind::Transient,
            401 | 403 => ErrorKind::Auth,
            413 => ErrorKind::ResourceConstraint,
            _ => ErrorKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Auth => "auth",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::ResourceConstraint => "resource_constraint",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced through the generation pipeline
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum GenerationError {
    #[error("Transient remote failure: {reason}")]
    Transient { reason: String },

    #[error("Authentication failed: {reason}")]
    Auth { reason: String },

    #[error("Circuit breaker is open, retry after {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    #[error("Resource constraint: {reason}")]
    ResourceConstraint { reason: String },

    #[error("Remote returned no result for {operation}")]
    EmptyResult { operation: String },

    #[error("Invalid request: {field} - {reason}")]
    InvalidRequest { field: String, reason: String },

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Unknown failure: {reason}")]
    Unknown { reason: String },
}

impl GenerationError {
    /// Build an error of the given kind around a transport message.
    pub fn from_kind(kind: ErrorKind, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        match kind {
            ErrorKind::Transient => GenerationError::Transient { reason },
            ErrorKind::Auth => GenerationError::Auth { reason },
            ErrorKind::CircuitOpen => GenerationError::CircuitOpen { retry_after_ms: 0 },
            ErrorKind::ResourceConstraint => GenerationError::ResourceConstraint { reason },
            ErrorKind::Unknown => GenerationError::Unknown { reason },
        }
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        GenerationError::InvalidRequest {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::Transient { .. } => ErrorKind::Transient,
            GenerationError::Auth { .. } => ErrorKind::Auth,
            GenerationError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            GenerationError::ResourceConstraint { .. } => ErrorKind::ResourceConstraint,
            // An empty answer behaves like a transient hiccup for retry purposes
            GenerationError::EmptyResult { .. } => ErrorKind::Transient,
            GenerationError::InvalidRequest { .. }
            | GenerationError::Cancelled
            | GenerationError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Actionable text for the person who triggered the request.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::Transient { .. } => {
                "The AI service could not be reached. Check your connection and try again."
                    .to_string()
            }
            GenerationError::Auth { .. } => {
                "No valid API key configured. Add your API key in settings.".to_string()
            }
            GenerationError::CircuitOpen { .. } => {
                "Service unavailable, please retry later.".to_string()
            }
            GenerationError::ResourceConstraint { .. } => {
                "Not enough memory to process the input. Use fewer or smaller images.".to_string()
            }
            GenerationError::EmptyResult { .. } => {
                "The AI service returned an empty response. Try rephrasing your prompt."
                    .to_string()
            }
            GenerationError::InvalidRequest { field, reason } => match field.as_str() {
                "images" => "No images selected. Pick at least one image to enhance.".to_string(),
                "prompt" => "Enter a prompt before generating.".to_string(),
                _ => format!("Invalid {}: {}", field, reason),
            },
            GenerationError::Cancelled => "Generation was cancelled.".to_string(),
            GenerationError::Unknown { reason } => format!("Something went wrong: {}", reason),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {file_path}")]
    FileNotFound { file_path: String },

    #[error("Config parsing failed: {format} - {reason}")]
    ParsingFailed { format: String, reason: String },

    #[error("Environment variable error: {var_name} - {reason}")]
    EnvVarError { var_name: String, reason: String },

    #[error("Config validation failed: {reason}")]
    ValidationFailed { reason: String },
}

pub type GenerationResultOf<T> = Result<T, GenerationError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
