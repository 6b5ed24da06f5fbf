//! Conversion of raw failures into [`ApiError`]s.
//!
//! Classification is best-effort. Typed sources (`reqwest`, `std::io`, tokio
//! timers) are inspected first, then the rendered message is matched against
//! an ordered list of case-insensitive patterns. The first match wins and
//! anything unmatched becomes [`ErrorKind::UnknownError`].
//!
//! The default patterns are product-specific and will need tuning per
//! deployment; [`ErrorClassifier::with_rule`] adds patterns that are checked
//! before the defaults.
//!
//! ```rust
//! use resilient_client::{ErrorClassifier, ErrorKind};
//!
//! let classifier = ErrorClassifier::new();
//! let err = classifier.classify(anyhow::anyhow!("failed to fetch resource"), None);
//! assert_eq!(err.kind(), ErrorKind::NetworkError);
//!
//! // Re-classifying a typed error hands it back untouched
//! let id = err.id();
//! assert_eq!(classifier.classify(err, None).id(), id);
//! ```

use crate::error::{ApiError, ApiResult, ErrorKind};
use crate::logging::log_trace;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;

/// A message pattern and the kind it maps to.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pattern: Regex,
    kind: ErrorKind,
}

impl ClassificationRule {
    /// Build a rule from a regex. Matching is case-insensitive.
    pub fn new(pattern: &str, kind: ErrorKind) -> ApiResult<Self> {
        let pattern = Regex::new(&format!("(?i){pattern}")).map_err(|e| {
            ApiError::validation(format!("Invalid classification pattern '{pattern}': {e}"))
        })?;
        Ok(Self { pattern, kind })
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn matches(&self, message: &str) -> bool {
        self.pattern.is_match(message)
    }
}

static DEFAULT_RULES: Lazy<Vec<ClassificationRule>> = Lazy::new(|| {
    let table = [
        (r"fetch|network", ErrorKind::NetworkError),
        (r"timeout|timed out", ErrorKind::TimeoutError),
        (r"permission[-_ ]denied", ErrorKind::PermissionDenied),
        (r"unauthenticated", ErrorKind::AuthenticationError),
        (r"quota", ErrorKind::QuotaExceeded),
        (r"rate[-_ ]?limit|too many requests", ErrorKind::RateLimitExceeded),
        (r"vision", ErrorKind::VisionServiceError),
        (r"openai|language model|\bllm\b", ErrorKind::LanguageModelServiceError),
        (r"text-to-speech|\btts\b|speech", ErrorKind::SpeechSynthesisFailed),
        (r"firestore|database", ErrorKind::DatabaseError),
        (r"storage", ErrorKind::StorageError),
    ];

    let mut rules = Vec::with_capacity(table.len());
    for (pattern, kind) in table {
        if let Ok(rule) = ClassificationRule::new(pattern, kind) {
            rules.push(rule);
        }
    }
    rules
});

/// Maps raw failures to typed errors.
///
/// Cheap to clone. Holds only the deployment-specific rules; the defaults
/// are shared.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    custom_rules: Vec<ClassificationRule>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule checked before the defaults (and after earlier custom rules).
    pub fn with_rule(mut self, pattern: &str, kind: ErrorKind) -> ApiResult<Self> {
        self.custom_rules.push(ClassificationRule::new(pattern, kind)?);
        Ok(self)
    }

    /// Classify any failure.
    ///
    /// - An [`ApiError`] is returned unchanged.
    /// - With a `hint`, the error is built from that kind directly.
    /// - Otherwise typed sources, then message rules, decide the kind.
    ///
    /// The raw failure is kept as the error's source.
    pub fn classify(&self, raw: impl Into<anyhow::Error>, hint: Option<ErrorKind>) -> ApiError {
        let raw: anyhow::Error = raw.into();
        let raw = match raw.downcast::<ApiError>() {
            Ok(typed) => return typed,
            Err(raw) => raw,
        };

        let message = format!("{raw:#}");
        let kind = hint
            .or_else(|| kind_from_source_chain(&raw))
            .or_else(|| self.kind_from_message(&message))
            .unwrap_or(ErrorKind::UnknownError);

        log_trace!(
            error_kind = %kind,
            hinted = hint.is_some(),
            "Classified raw failure"
        );

        ApiError::new(kind, message).with_source(raw)
    }

    /// Run only the message rules. `None` when no rule matches.
    pub fn kind_from_message(&self, message: &str) -> Option<ErrorKind> {
        self.custom_rules
            .iter()
            .chain(DEFAULT_RULES.iter())
            .find(|rule| rule.matches(message))
            .map(ClassificationRule::kind)
    }

    /// Map a non-success HTTP status to a typed error.
    ///
    /// `detail` is the diagnostic extracted from the response body and ends
    /// up in the developer message only. Server errors are always retryable.
    pub fn classify_status(&self, status: StatusCode, detail: &str) -> ApiError {
        let kind = match status.as_u16() {
            400 => ErrorKind::ValidationError,
            401 => ErrorKind::AuthenticationError,
            403 => ErrorKind::PermissionDenied,
            408 => ErrorKind::TimeoutError,
            413 => ErrorKind::FileTooLarge,
            429 => ErrorKind::RateLimitExceeded,
            _ => ErrorKind::UnknownError,
        };

        let error = ApiError::new(kind, format!("HTTP {}: {detail}", status.as_u16()))
            .with_details(serde_json::json!({ "status": status.as_u16() }));

        if status.is_server_error() {
            error.with_retryable(true)
        } else {
            error
        }
    }
}

fn kind_from_source_chain(raw: &anyhow::Error) -> Option<ErrorKind> {
    raw.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            if e.is_timeout() {
                return Some(ErrorKind::TimeoutError);
            }
            if e.is_connect() || e.is_request() {
                return Some(ErrorKind::NetworkError);
            }
        }
        if cause.is::<tokio::time::error::Elapsed>() {
            return Some(ErrorKind::TimeoutError);
        }
        if let Some(e) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind as Io;
            return match e.kind() {
                Io::TimedOut => Some(ErrorKind::TimeoutError),
                Io::ConnectionRefused
                | Io::ConnectionReset
                | Io::ConnectionAborted
                | Io::NotConnected
                | Io::BrokenPipe => Some(ErrorKind::NetworkError),
                Io::PermissionDenied => Some(ErrorKind::PermissionDenied),
                _ => None,
            };
        }
        None
    })
}
