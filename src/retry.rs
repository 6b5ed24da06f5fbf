//! Retry with exponential backoff and jitter.
//!
//! - Backoff: `base_delay * backoff_factor^(attempt - 1)`, capped at `max_delay`
//! - Jitter: uniform `[0, 1000)` ms added on top when enabled
//! - Retry eligibility comes from the classified error, never from the raw one
//! - Retries of one logical call are strictly sequential
//!
//! ```rust,no_run
//! use resilient_client::retry::{with_retry, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> resilient_client::ApiResult<()> {
//! let policy = RetryPolicy {
//!     max_retries: 3,
//!     base_delay: Duration::from_millis(200),
//!     ..RetryPolicy::default()
//! };
//!
//! let body = with_retry(
//!     || async { reqwest::get("https://example.com/health").await?.text().await },
//!     &policy,
//! )
//! .await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

use crate::classify::ErrorClassifier;
use crate::error::{ApiError, ApiResult, ErrorKind};
use crate::logging::{log_debug, log_warn};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const JITTER_CEILING_MS: u64 = 1000;

/// Observer invoked before each retry with the classified error and the
/// attempt number that just failed. It has no say in control flow.
pub type RetryHook = Arc<dyn Fn(&ApiError, u32) + Send + Sync>;

/// Retry policy configuration
#[derive(Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for the exponential part of the delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Add up to a second of random delay to spread out retry bursts
    pub jitter: bool,
    #[serde(skip)]
    pub on_retry: Option<RetryHook>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
            jitter: true,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

impl RetryPolicy {
    /// Generative calls are slow and expensive, so they retry less and wait longer.
    pub fn ai_generation() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(2000),
            ..Self::default()
        }
    }

    /// Register an observer called before every retry.
    pub fn with_on_retry(mut self, hook: impl Fn(&ApiError, u32) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based),
    /// without jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let max_nanos = self.max_delay.as_nanos() as f64;
        let exponential_nanos = self.base_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);

        let capped_nanos = if exponential_nanos.is_nan() {
            max_nanos
        } else {
            exponential_nanos.clamp(0.0, max_nanos)
        };

        Duration::from_nanos(capped_nanos.round() as u64)
    }

    /// Backoff delay plus jitter when enabled.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if self.jitter {
            delay + Duration::from_millis(fastrand::u64(0..JITTER_CEILING_MS))
        } else {
            delay
        }
    }
}

/// Executes operations under a retry policy.
///
/// Holds no per-call state, so one executor can serve any number of
/// concurrent calls.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    classifier: ErrorClassifier,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: ErrorClassifier::default(),
        }
    }

    pub fn with_classifier(policy: RetryPolicy, classifier: ErrorClassifier) -> Self {
        Self { policy, classifier }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the retry budget is spent.
    ///
    /// The policy's `max_retries` sets the budget. An error's own ceiling only
    /// applies to retries it already carries from an inner retry loop.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let start_time = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let raw = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        log_debug!(
                            attempts = attempt + 1,
                            duration_ms = start_time.elapsed().as_millis(),
                            "Request succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(raw) => raw,
            };

            let mut error = self.classifier.classify(raw, None);
            let prior_retries = attempt;
            attempt += 1;

            if attempt > self.policy.max_retries || !error.allows_retry() {
                error.note_prior_retries(prior_retries);
                log_warn!(
                    error_id = %error.id(),
                    error_kind = %error.kind(),
                    attempts = attempt,
                    retryable = error.is_retryable(),
                    total_duration_ms = start_time.elapsed().as_millis(),
                    "Request failed, not retrying"
                );
                return Err(error);
            }

            error.record_retry(prior_retries);
            if let Some(hook) = &self.policy.on_retry {
                hook(&error, attempt);
            }

            let delay = self.policy.calculate_delay(attempt);
            log_debug!(
                error_id = %error.id(),
                error_kind = %error.kind(),
                attempt = attempt,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis(),
                "Request failed, retrying after delay"
            );
            sleep(delay).await;
        }
    }
}

/// Run `operation` under `policy` with the default classifier.
pub async fn with_retry<T, E, F, Fut>(operation: F, policy: &RetryPolicy) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    RetryExecutor::new(policy.clone()).execute(operation).await
}

/// Race `future` against a timer and an optional cancellation token.
///
/// Both the timer and the token resolve to [`ErrorKind::TimeoutError`]. A
/// cancelled call is not retryable, since the token stays cancelled. The
/// abandoned future is dropped, which aborts an in-flight `reqwest` request.
pub async fn with_timeout<T, Fut>(
    duration: Duration,
    cancel: Option<&CancellationToken>,
    future: Fut,
) -> ApiResult<T>
where
    Fut: Future<Output = ApiResult<T>>,
{
    let guarded = tokio::time::timeout(duration, future);

    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(cancelled()),
                result = guarded => result.unwrap_or_else(|_| Err(ApiError::timeout(duration))),
            }
        }
        None => guarded
            .await
            .unwrap_or_else(|_| Err(ApiError::timeout(duration))),
    }
}

/// The error produced when a caller's cancellation token fires.
pub(crate) fn cancelled() -> ApiError {
    ApiError::new(ErrorKind::TimeoutError, "Request cancelled").with_retryable(false)
}
