use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{ApiError, ApiResult};
use crate::logging::log_debug;
use crate::retry::RetryPolicy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const ENV_PROFILE: &str = "RESILIENT_API_PROFILE";
const ENV_BASE_URL: &str = "RESILIENT_API_BASE_URL";
const ENV_TIMEOUT_MS: &str = "RESILIENT_API_TIMEOUT_MS";
const ENV_MAX_RETRIES: &str = "RESILIENT_API_MAX_RETRIES";

/// Configuration for one [`ApiClient`](crate::ApiClient) instance.
///
/// Specialized clients (generic calls vs. AI generation) are just different
/// values of this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiClientConfig {
    /// Base for relative request paths. Absolute URLs bypass it.
    pub base_url: Option<String>,
    /// Per-attempt request timeout
    pub timeout: Duration,
    /// Headers sent with every request; per-call headers win on conflict
    pub default_headers: BTreeMap<String, String>,
    /// Policy used when a call doesn't bring its own
    pub retry_policy: RetryPolicy,
    /// Route every call through a circuit breaker when set
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        let mut default_headers = BTreeMap::new();
        default_headers.insert(CONTENT_TYPE.to_string(), "application/json".to_string());

        Self {
            base_url: None,
            timeout: Duration::from_millis(30_000),
            default_headers,
            retry_policy: RetryPolicy::default(),
            circuit_breaker: None,
        }
    }
}

impl ApiClientConfig {
    /// Generic calls: 30s timeout, default retry policy.
    pub fn standard() -> Self {
        Self::default()
    }

    /// Generative AI calls: long timeout, fewer and slower retries.
    pub fn ai_generation() -> Self {
        Self {
            timeout: Duration::from_millis(120_000),
            retry_policy: RetryPolicy::ai_generation(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Build configuration from environment variables
    ///
    /// - `RESILIENT_API_PROFILE`: `standard` (default) or `ai`
    /// - `RESILIENT_API_BASE_URL`
    /// - `RESILIENT_API_TIMEOUT_MS`
    /// - `RESILIENT_API_MAX_RETRIES`
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown profile, unparsable numbers,
    /// or a configuration that fails [`validate`](Self::validate).
    pub fn from_env() -> ApiResult<Self> {
        let profile = std::env::var(ENV_PROFILE).unwrap_or_else(|_| "standard".to_string());

        let mut config = match profile.to_lowercase().as_str() {
            "standard" => Self::standard(),
            "ai" => Self::ai_generation(),
            other => {
                return Err(ApiError::validation(format!(
                    "Unsupported {ENV_PROFILE}: {other}. Supported profiles: standard, ai"
                )));
            }
        };

        if let Ok(base_url) = std::env::var(ENV_BASE_URL) {
            config.base_url = Some(base_url);
        }
        if let Some(timeout_ms) = parse_env::<u64>(ENV_TIMEOUT_MS)? {
            config.timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(max_retries) = parse_env::<u32>(ENV_MAX_RETRIES)? {
            config.retry_policy.max_retries = max_retries;
        }

        log_debug!(
            profile = %profile,
            has_base_url = config.base_url.is_some(),
            timeout_ms = config.timeout.as_millis(),
            max_retries = config.retry_policy.max_retries,
            "Loaded API client configuration from environment"
        );

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a validation error if:
    /// - The timeout is zero
    /// - The base URL doesn't parse
    /// - A default header name or value is malformed
    /// - The backoff factor is below 1 or not finite
    /// - The max delay is shorter than the base delay
    pub fn validate(&self) -> ApiResult<()> {
        if self.timeout.is_zero() {
            return Err(ApiError::validation("Request timeout must be greater than zero"));
        }

        if let Some(base_url) = &self.base_url {
            reqwest::Url::parse(base_url).map_err(|e| {
                ApiError::validation(format!("Invalid base URL '{base_url}': {e}"))
            })?;
        }

        self.header_map()?;

        let policy = &self.retry_policy;
        if !policy.backoff_factor.is_finite() || policy.backoff_factor < 1.0 {
            return Err(ApiError::validation(format!(
                "Backoff factor must be a finite number >= 1, got {}",
                policy.backoff_factor
            )));
        }
        if policy.max_delay < policy.base_delay {
            return Err(ApiError::validation(
                "Maximum retry delay must not be shorter than the base delay",
            ));
        }

        Ok(())
    }

    /// Default headers as a `HeaderMap`.
    pub fn header_map(&self) -> ApiResult<HeaderMap> {
        to_header_map(&self.default_headers)
    }
}

pub(crate) fn to_header_map<'a>(
    headers: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> ApiResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::validation(format!("Invalid header name '{name}': {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::validation(format!("Invalid value for header '{name}': {e}")))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn parse_env<T: std::str::FromStr>(key: &str) -> ApiResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ApiError::validation(format!("Invalid value for {key}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}
