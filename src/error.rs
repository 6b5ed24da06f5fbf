//! Error types for external API calls.
//!
//! Every failure that leaves this crate is an [`ApiError`]: a structured value
//! carrying a stable [`ErrorKind`], a developer-facing message, a fixed
//! user-facing message, and the retry metadata the retry engine needs.
//!
//! # Error Handling Example
//!
//! ```rust
//! use resilient_client::{ApiError, ErrorKind};
//!
//! fn show(err: &ApiError) {
//!     // Only the user message is safe to display
//!     println!("{}", err.user_message());
//!
//!     if err.kind() == ErrorKind::AuthenticationError {
//!         println!("Please sign in again");
//!     }
//! }
//!
//! let err = ApiError::new(ErrorKind::NetworkError, "connection reset by peer");
//! assert!(err.is_retryable());
//! assert_eq!(err.max_retries(), 5);
//! show(&err);
//! ```
//!
//! # Result Type
//!
//! Use [`ApiResult<T>`] as a convenient alias for `Result<T, ApiError>`.

use crate::logging::{log_error, log_info, log_warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error categorization types
// ============================================================================

/// High-level categorization of errors for routing and handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The caller sent something that can't succeed as-is (bad input,
    /// missing credentials, forbidden resource).
    Client,

    /// A downstream service failed (vision, language model, storage, ...).
    External,

    /// Temporary conditions that usually clear up on their own.
    Transient,

    /// Nothing more specific is known.
    Internal,
}

/// Severity level for logging and alerting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Action failed and someone should probably look at it.
    Error,

    /// Unexpected but recoverable.
    Warning,

    /// Expected failure, such as a rejected file.
    Info,
}

// ============================================================================
// Error kinds
// ============================================================================

/// The closed set of failure categories.
///
/// Each kind carries a fixed user-facing message, a default retryability
/// and a default retry ceiling. No other error codes exist in the crate.
///
/// | Kind | Category | Retryable | Max retries |
/// |------|----------|-----------|-------------|
/// | `UploadFailed` | External | Yes | 3 |
/// | `FileTooLarge` | Client | No | 3 |
/// | `InvalidFileType` | Client | No | 3 |
/// | `FaceNotDetected` | Client | No | 3 |
/// | `VisionServiceError` | External | Yes | 3 |
/// | `LanguageModelServiceError` | External | Yes | 3 |
/// | `CommentGenerationFailed` | External | Yes | 3 |
/// | `StorybookGenerationFailed` | External | Yes | 3 |
/// | `IllustrationGenerationFailed` | External | Yes | 3 |
/// | `SpeechSynthesisFailed` | External | Yes | 3 |
/// | `AudioPlaybackError` | Client | No | 3 |
/// | `NetworkError` | Transient | Yes | 5 |
/// | `TimeoutError` | Transient | Yes | 3 |
/// | `AuthenticationError` | Client | No | 3 |
/// | `PermissionDenied` | Client | No | 3 |
/// | `DatabaseError` | External | Yes | 3 |
/// | `StorageError` | External | Yes | 3 |
/// | `QuotaExceeded` | Client | No | 3 |
/// | `RateLimitExceeded` | Transient | Yes | 3 |
/// | `ValidationError` | Client | No | 3 |
/// | `UnknownError` | Internal | No | 3 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    UploadFailed,
    FileTooLarge,
    InvalidFileType,
    FaceNotDetected,
    VisionServiceError,
    LanguageModelServiceError,
    CommentGenerationFailed,
    StorybookGenerationFailed,
    IllustrationGenerationFailed,
    SpeechSynthesisFailed,
    AudioPlaybackError,
    NetworkError,
    TimeoutError,
    AuthenticationError,
    PermissionDenied,
    DatabaseError,
    StorageError,
    QuotaExceeded,
    RateLimitExceeded,
    ValidationError,
    UnknownError,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 21] = [
        Self::UploadFailed,
        Self::FileTooLarge,
        Self::InvalidFileType,
        Self::FaceNotDetected,
        Self::VisionServiceError,
        Self::LanguageModelServiceError,
        Self::CommentGenerationFailed,
        Self::StorybookGenerationFailed,
        Self::IllustrationGenerationFailed,
        Self::SpeechSynthesisFailed,
        Self::AudioPlaybackError,
        Self::NetworkError,
        Self::TimeoutError,
        Self::AuthenticationError,
        Self::PermissionDenied,
        Self::DatabaseError,
        Self::StorageError,
        Self::QuotaExceeded,
        Self::RateLimitExceeded,
        Self::ValidationError,
        Self::UnknownError,
    ];

    /// Stable code used in logs and serialized output.
    pub fn code(self) -> &'static str {
        match self {
            Self::UploadFailed => "UPLOAD_FAILED",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::InvalidFileType => "INVALID_FILE_TYPE",
            Self::FaceNotDetected => "FACE_NOT_DETECTED",
            Self::VisionServiceError => "VISION_SERVICE_ERROR",
            Self::LanguageModelServiceError => "LANGUAGE_MODEL_SERVICE_ERROR",
            Self::CommentGenerationFailed => "COMMENT_GENERATION_FAILED",
            Self::StorybookGenerationFailed => "STORYBOOK_GENERATION_FAILED",
            Self::IllustrationGenerationFailed => "ILLUSTRATION_GENERATION_FAILED",
            Self::SpeechSynthesisFailed => "SPEECH_SYNTHESIS_FAILED",
            Self::AudioPlaybackError => "AUDIO_PLAYBACK_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::AuthenticationError => "AUTHENTICATION_ERROR",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::StorageError => "STORAGE_ERROR",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// The fixed message shown to end users for this kind.
    ///
    /// These strings never include diagnostic detail.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::UploadFailed => "The photo could not be uploaded. Please try again",
            Self::FileTooLarge => "This file is too large. Please choose a smaller photo",
            Self::InvalidFileType => "This file type is not supported. Please choose an image",
            Self::FaceNotDetected => "We couldn't find a face in this photo. Please try another one",
            Self::VisionServiceError => "Photo analysis is temporarily unavailable. Please try again",
            Self::LanguageModelServiceError => {
                "The writing assistant is temporarily unavailable. Please try again"
            }
            Self::CommentGenerationFailed => "We couldn't write a comment for this photo",
            Self::StorybookGenerationFailed => "We couldn't create the storybook. Please try again",
            Self::IllustrationGenerationFailed => "We couldn't draw the illustration. Please try again",
            Self::SpeechSynthesisFailed => "We couldn't create the narration. Please try again",
            Self::AudioPlaybackError => "The audio could not be played",
            Self::NetworkError => "Network connection problem. Please check your connection",
            Self::TimeoutError => "The request took too long. Please try again",
            Self::AuthenticationError => "Please sign in again to continue",
            Self::PermissionDenied => "You don't have permission to do this",
            Self::DatabaseError => "We couldn't save or load your data. Please try again",
            Self::StorageError => "We couldn't access your files. Please try again",
            Self::QuotaExceeded => "You've reached your usage limit. Please try again later",
            Self::RateLimitExceeded => "Too many requests. Please wait a moment and try again",
            Self::ValidationError => "Some of the information provided is invalid",
            Self::UnknownError => "Something went wrong. Please try again later",
        }
    }

    /// Whether errors of this kind are retried unless overridden.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            Self::UploadFailed
                | Self::VisionServiceError
                | Self::LanguageModelServiceError
                | Self::CommentGenerationFailed
                | Self::StorybookGenerationFailed
                | Self::IllustrationGenerationFailed
                | Self::SpeechSynthesisFailed
                | Self::NetworkError
                | Self::TimeoutError
                | Self::DatabaseError
                | Self::StorageError
                | Self::RateLimitExceeded
        )
    }

    /// Retry ceiling for errors of this kind.
    pub fn default_max_retries(self) -> u32 {
        match self {
            Self::NetworkError => 5,
            _ => 3,
        }
    }

    pub fn category(self) -> ErrorCategory {
        match self {
            Self::FileTooLarge
            | Self::InvalidFileType
            | Self::FaceNotDetected
            | Self::AudioPlaybackError
            | Self::AuthenticationError
            | Self::PermissionDenied
            | Self::QuotaExceeded
            | Self::ValidationError => ErrorCategory::Client,
            Self::NetworkError | Self::TimeoutError | Self::RateLimitExceeded => {
                ErrorCategory::Transient
            }
            Self::UnknownError => ErrorCategory::Internal,
            _ => ErrorCategory::External,
        }
    }

    pub fn severity(self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Client => ErrorSeverity::Info,
            ErrorCategory::Transient => ErrorSeverity::Warning,
            ErrorCategory::External | ErrorCategory::Internal => ErrorSeverity::Error,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ============================================================================
// ApiError
// ============================================================================

/// Convenient result type for API calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

const CIRCUIT_OPEN_REASON: &str = "circuit_open";

/// A classified failure.
///
/// Constructed once per failure occurrence and never mutated afterwards,
/// except for the retry counter which only the retry engine advances.
///
/// `message`, `details` and the source chain are diagnostics. Only
/// [`user_message()`](Self::user_message) is meant for display.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct ApiError {
    id: Uuid,
    kind: ErrorKind,
    message: String,
    details: Option<serde_json::Value>,
    timestamp: DateTime<Utc>,
    retryable: bool,
    retry_count: u32,
    max_retries: u32,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ApiError {
    /// Create an error of the given kind (logs at the kind's severity).
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let error = Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
            retryable: kind.default_retryable(),
            retry_count: 0,
            max_retries: kind.default_max_retries(),
            source: None,
        };
        error.log_created();
        error
    }

    fn log_created(&self) {
        match self.kind.severity() {
            ErrorSeverity::Error => log_error!(
                error_id = %self.id,
                error_kind = %self.kind,
                message = %self.message,
                "API error created"
            ),
            ErrorSeverity::Warning => log_warn!(
                error_id = %self.id,
                error_kind = %self.kind,
                message = %self.message,
                "API error created"
            ),
            ErrorSeverity::Info => log_info!(
                error_id = %self.id,
                error_kind = %self.kind,
                message = %self.message,
                "API error created"
            ),
        }
    }

    // =========================================================================
    // Builders
    // =========================================================================

    /// Attach structured context, such as a raw response body.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Preserve the underlying failure for diagnostics.
    pub fn with_source(mut self, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Override the retryability derived from the kind.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Override the retry ceiling derived from the kind.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    // =========================================================================
    // Named constructors
    // =========================================================================

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::TimeoutError,
            format!("Request timed out after {}ms", after.as_millis()),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationError, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn upload_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UploadFailed, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownError, message)
    }

    /// The rejection produced by an open circuit breaker.
    ///
    /// Fatal to the current call, but retryable once `retry_after` has passed.
    pub fn circuit_open(retry_after: Duration) -> Self {
        Self::new(
            ErrorKind::UnknownError,
            "Circuit breaker is open - service temporarily unavailable",
        )
        .with_retryable(true)
        .with_details(serde_json::json!({
            "reason": CIRCUIT_OPEN_REASON,
            "retry_after_ms": u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
        }))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Correlation id, included in every log line about this error.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Developer-facing detail. Do not show this to users.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The fixed, display-safe message for this error's kind.
    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        self.details.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.kind.severity()
    }

    /// Whether this error is a circuit breaker rejection rather than a
    /// failure of the protected operation.
    pub fn is_circuit_open(&self) -> bool {
        self.details
            .as_ref()
            .and_then(|d| d.get("reason"))
            .and_then(|r| r.as_str())
            == Some(CIRCUIT_OPEN_REASON)
    }

    /// Whether this error itself permits another retry. A fresh error always
    /// does when retryable; one that already carries retries from an inner
    /// retry loop stops at its own ceiling. The policy bounds the rest.
    pub(crate) fn allows_retry(&self) -> bool {
        self.retryable && self.retry_count < self.max_retries
    }

    /// Advance the retry counter. Never decreases.
    pub(crate) fn record_retry(&mut self, prior_retries: u32) {
        self.retry_count = self.retry_count.max(prior_retries) + 1;
    }

    /// Carry the retries already spent on this call onto a terminal error.
    pub(crate) fn note_prior_retries(&mut self, prior_retries: u32) {
        self.retry_count = self.retry_count.max(prior_retries);
    }
}
