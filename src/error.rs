//! Error types for the edgequake-doc2json library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Doc2JsonError`] — **Fatal**: the batch cannot proceed at all
//!   (too many files, combined upload too large, provider not configured).
//!   Returned as `Err(Doc2JsonError)` from the top-level `convert*` functions
//!   before any per-file work starts.
//!
//! * [`FileError`] — **Non-fatal**: a single file failed (corrupt container,
//!   model returned garbage, rate limit never cleared) but its siblings are
//!   fine. Stored inside [`crate::output::ConversionResult::Failure`] so a
//!   batch always yields exactly one outcome per file.
//!
//! Each pipeline stage has its own narrow error ([`ExtractError`],
//! [`AiError`], [`AssembleError`]) which converts into a [`FileError`]
//! carrying a serialisable [`ErrorKind`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Extensions accepted by the format readers, in display order.
pub const ALLOWED_EXTENSIONS: [&str; 5] = [".pdf", ".doc", ".docx", ".ppt", ".pptx"];

/// All fatal errors returned by the edgequake-doc2json library.
///
/// Per-file failures use [`FileError`] and are stored in
/// [`crate::output::ConversionResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Doc2JsonError {
    // ── Pre-flight errors ─────────────────────────────────────────────────
    /// The batch contained no documents.
    #[error("No file provided")]
    EmptyBatch,

    /// More files than `max_files_per_batch` allows.
    #[error("Too many files. Maximum {max} files allowed per request (got {count}).")]
    TooManyFiles { count: usize, max: usize },

    /// Combined upload size exceeds `max_combined_upload_bytes`.
    #[error("Combined upload of {total_bytes} bytes exceeds the {max_bytes} byte limit")]
    BatchTooLarge { total_bytes: u64, max_bytes: u64 },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Doc2JsonError {
    /// Machine-readable kind for the batch-level failures that have one.
    pub fn kind(&self) -> Option<BatchErrorKind> {
        match self {
            Doc2JsonError::TooManyFiles { .. } => Some(BatchErrorKind::TooManyFiles),
            Doc2JsonError::BatchTooLarge { .. } => Some(BatchErrorKind::BatchTooLarge),
            _ => None,
        }
    }
}

/// Batch-level rejection kinds raised before any per-file work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchErrorKind {
    BatchTooLarge,
    TooManyFiles,
}

/// Per-file failure taxonomy, grouped by the stage that raises it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // extraction
    UnsupportedFormat,
    CorruptFile,
    InsufficientText,
    // external call
    AuthError,
    RateLimitError,
    TransientError,
    PermanentError,
    // assembly
    MalformedOutput,
    // batch was cancelled before this file started
    Cancelled,
}

impl ErrorKind {
    /// Only rate-limit and transient failures are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimitError | ErrorKind::TransientError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::CorruptFile => "corrupt_file",
            ErrorKind::InsufficientText => "insufficient_text",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::RateLimitError => "rate_limit_error",
            ErrorKind::TransientError => "transient_error",
            ErrorKind::PermanentError => "permanent_error",
            ErrorKind::MalformedOutput => "malformed_output",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal error for a single file.
///
/// `raw_output` is only populated for [`ErrorKind::MalformedOutput`] so the
/// offending model response can be inspected.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct FileError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl FileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_output: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(
            ErrorKind::Cancelled,
            "Batch was cancelled before this file was processed",
        )
    }

    pub fn insufficient_text(chars: usize, min: usize) -> Self {
        Self::new(
            ErrorKind::InsufficientText,
            format!(
                "Could not extract sufficient text from the file ({chars} of at least {min} characters). \
                 Please ensure the file contains readable content."
            ),
        )
    }
}

// ── Stage errors ─────────────────────────────────────────────────────────

/// Failure while turning document bytes into text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("Unsupported file type '{extension}'. Allowed types: {}", ALLOWED_EXTENSIONS.join(", "))]
    UnsupportedFormat { extension: String },

    #[error("Could not read {format} container: {detail}")]
    CorruptFile { format: &'static str, detail: String },
}

impl ExtractError {
    pub fn corrupt(format: &'static str, detail: impl fmt::Display) -> Self {
        ExtractError::CorruptFile {
            format,
            detail: detail.to_string(),
        }
    }
}

impl From<ExtractError> for FileError {
    fn from(e: ExtractError) -> Self {
        let kind = match e {
            ExtractError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            ExtractError::CorruptFile { .. } => ErrorKind::CorruptFile,
        };
        FileError::new(kind, e.to_string())
    }
}

/// Failure of a single call to the external generation service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AiError {
    /// 401/403 or a rejected key. Never retried.
    #[error("Authentication error: {detail}")]
    Auth { detail: String },

    /// 429. Retried after `retry_after` when the provider sent one.
    #[error("Rate limit exceeded: {detail}")]
    RateLimited {
        detail: String,
        retry_after: Option<Duration>,
    },

    /// Timeouts, 5xx, dropped connections.
    #[error("Transient API error: {detail}")]
    Transient { detail: String },

    /// Anything else, including errors that could not be classified.
    #[error("API error: {detail}")]
    Permanent { detail: String },
}

impl AiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AiError::Auth { .. } => ErrorKind::AuthError,
            AiError::RateLimited { .. } => ErrorKind::RateLimitError,
            AiError::Transient { .. } => ErrorKind::TransientError,
            AiError::Permanent { .. } => ErrorKind::PermanentError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AiError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<AiError> for FileError {
    fn from(e: AiError) -> Self {
        FileError::new(e.kind(), e.to_string())
    }
}

/// The model response could not be turned into a valid [`crate::output::SubjectDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid JSON response from model: {reason}")]
pub struct AssembleError {
    pub reason: String,
    pub raw_output: String,
}

impl From<AssembleError> for FileError {
    fn from(e: AssembleError) -> Self {
        FileError {
            kind: ErrorKind::MalformedOutput,
            message: e.to_string(),
            raw_output: Some(e.raw_output),
        }
    }
}
