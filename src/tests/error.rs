// Unit Tests for the API Error Taxonomy
//
// UNIT UNDER TEST: ErrorKind, ApiError
//
// BUSINESS RESPONSIBILITY:
//   - Provides a closed set of failure kinds with fixed user messages
//   - Assigns default retryability and retry ceilings per kind
//   - Keeps diagnostic detail out of user-facing text
//   - Preserves the original cause for logs
//
// TEST COVERAGE:
//   - Retryability and ceiling tables
//   - User message isolation from diagnostics
//   - Stable serialized codes
//   - Circuit-open rejection shape
//   - Retry counter monotonicity

use crate::error::{ApiError, ErrorCategory, ErrorKind, ErrorSeverity};
use std::error::Error as _;
use std::time::Duration;

#[cfg(test)]
mod error_kind_table_tests {
    use super::*;

    #[test]
    fn test_transient_and_service_kinds_are_retryable_by_default() {
        // Test verifies failures that may clear up on their own get retried

        for kind in [
            ErrorKind::NetworkError,
            ErrorKind::TimeoutError,
            ErrorKind::VisionServiceError,
            ErrorKind::LanguageModelServiceError,
            ErrorKind::SpeechSynthesisFailed,
            ErrorKind::RateLimitExceeded,
        ] {
            assert!(kind.default_retryable(), "{kind} should be retryable");
        }
    }

    #[test]
    fn test_client_kinds_are_not_retryable_by_default() {
        // Test verifies failures the caller must fix never waste retries

        for kind in [
            ErrorKind::ValidationError,
            ErrorKind::PermissionDenied,
            ErrorKind::AuthenticationError,
            ErrorKind::FileTooLarge,
            ErrorKind::InvalidFileType,
            ErrorKind::QuotaExceeded,
            ErrorKind::UnknownError,
        ] {
            assert!(!kind.default_retryable(), "{kind} should not be retryable");
        }
    }

    #[test]
    fn test_network_errors_get_a_higher_retry_ceiling() {
        assert_eq!(ErrorKind::NetworkError.default_max_retries(), 5);

        for kind in ErrorKind::ALL
            .iter()
            .copied()
            .filter(|kind| *kind != ErrorKind::NetworkError)
        {
            assert_eq!(kind.default_max_retries(), 3, "{kind} should allow 3 retries");
        }
    }

    #[test]
    fn test_serialized_form_matches_stable_code() {
        // Test verifies logs and serialized payloads use the same code

        for kind in ErrorKind::ALL {
            let serialized = serde_json::to_value(kind).unwrap();
            assert_eq!(serialized, serde_json::Value::String(kind.code().to_string()));
        }

        let parsed: ErrorKind = serde_json::from_str("\"RATE_LIMIT_EXCEEDED\"").unwrap();
        assert_eq!(parsed, ErrorKind::RateLimitExceeded);
    }

    #[test]
    fn test_category_drives_severity() {
        assert_eq!(ErrorKind::ValidationError.category(), ErrorCategory::Client);
        assert_eq!(ErrorKind::ValidationError.severity(), ErrorSeverity::Info);
        assert_eq!(ErrorKind::TimeoutError.category(), ErrorCategory::Transient);
        assert_eq!(ErrorKind::TimeoutError.severity(), ErrorSeverity::Warning);
        assert_eq!(ErrorKind::StorageError.category(), ErrorCategory::External);
        assert_eq!(ErrorKind::UnknownError.category(), ErrorCategory::Internal);
        assert_eq!(ErrorKind::UnknownError.severity(), ErrorSeverity::Error);
    }
}

#[cfg(test)]
mod api_error_tests {
    use super::*;

    #[test]
    fn test_new_error_takes_defaults_from_kind() {
        // Arrange & Act
        let error = ApiError::network("connection reset by peer");

        // Assert
        assert_eq!(error.kind(), ErrorKind::NetworkError);
        assert!(error.is_retryable());
        assert_eq!(error.retry_count(), 0, "Fresh errors start with no retries");
        assert_eq!(error.max_retries(), 5);
        assert!(error.details().is_none());
        assert!(error.timestamp() <= chrono::Utc::now());
    }

    #[test]
    fn test_user_message_never_contains_diagnostics() {
        // Test verifies raw exception text can't leak into UI text

        // Arrange
        let error = ApiError::authentication("bad token sk-live-1234")
            .with_details(serde_json::json!({ "token": "sk-live-1234" }));

        // Act
        let user_message = error.user_message();

        // Assert
        assert_eq!(user_message, ErrorKind::AuthenticationError.user_message());
        assert!(!user_message.contains("bad token"));
        assert!(!user_message.contains("sk-live"));
        assert!(error.message().contains("bad token"), "Diagnostics stay available");
    }

    #[test]
    fn test_display_includes_code_and_diagnostic_message() {
        let error = ApiError::new(ErrorKind::StorageError, "bucket missing");

        assert_eq!(error.to_string(), "STORAGE_ERROR: bucket missing");
    }

    #[test]
    fn test_source_is_preserved_for_diagnostics() {
        // Arrange
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");

        // Act
        let error = ApiError::new(ErrorKind::StorageError, "write failed").with_source(cause);

        // Assert
        let source = error.source().expect("source should be preserved");
        assert_eq!(source.to_string(), "disk on fire");
        assert!(!error.user_message().contains("disk on fire"));
    }

    #[test]
    fn test_overrides_replace_kind_defaults() {
        let error = ApiError::unknown("upstream 503")
            .with_retryable(true)
            .with_max_retries(1);

        assert!(error.is_retryable());
        assert_eq!(error.max_retries(), 1);
    }

    #[test]
    fn test_each_error_gets_its_own_id() {
        let first = ApiError::unknown("a");
        let second = ApiError::unknown("a");

        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_retry_counter_only_moves_forward() {
        // Arrange
        let mut error = ApiError::network("flaky");

        // Act
        error.record_retry(0);
        error.record_retry(3);
        error.note_prior_retries(1);

        // Assert
        assert_eq!(error.retry_count(), 4);
    }

    #[test]
    fn test_retry_allowance_uses_error_own_count() {
        // Arrange
        let fresh = ApiError::new(ErrorKind::TimeoutError, "slow");
        let mut exhausted = ApiError::new(ErrorKind::TimeoutError, "slow");
        exhausted.record_retry(2);

        // Assert
        assert!(fresh.allows_retry(), "Fresh retryable errors defer to the policy");
        assert_eq!(exhausted.retry_count(), 3);
        assert!(!exhausted.allows_retry(), "Timeout ceiling is 3 retries");
        assert!(!ApiError::validation("bad").allows_retry());
    }

    #[test]
    fn test_circuit_open_error_is_distinguishable_and_retryable() {
        // Arrange & Act
        let error = ApiError::circuit_open(Duration::from_millis(1500));

        // Assert
        assert_eq!(error.kind(), ErrorKind::UnknownError);
        assert!(error.is_circuit_open());
        assert!(error.is_retryable(), "Callers may retry after the cooldown");
        assert_eq!(
            error.details().and_then(|d| d.get("retry_after_ms")),
            Some(&serde_json::json!(1500))
        );
        assert!(!ApiError::unknown("boom").is_circuit_open());
    }
}
