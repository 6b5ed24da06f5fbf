//! # resilient-client
//!
//! Resilient wrapper for calls to external services: document databases,
//! object storage, vision, language and speech APIs.
//!
//! ## Key Features
//!
//! - **Typed Errors**: every failure becomes an [`ApiError`] with a stable
//!   [`ErrorKind`], a display-safe user message and retry metadata
//! - **Classification**: raw failures, HTTP statuses and error messages are
//!   mapped to kinds by [`ErrorClassifier`]
//! - **Retry**: exponential backoff with jitter via [`retry::with_retry`]
//! - **Circuit Breaking**: fail fast on a dependency that keeps failing
//! - **HTTP Facade**: [`ApiClient`] applies all of the above to JSON calls,
//!   uploads and streams
//!
//! ## Example
//!
//! ```rust,no_run
//! use resilient_client::{ApiClient, ApiClientConfig, ErrorKind, RequestOptions};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = ApiClient::new(ApiClientConfig::standard().with_base_url("https://api.example.com"))?;
//!
//! match client.get::<serde_json::Value>("/photos/recent", RequestOptions::default()).await {
//!     Ok(photos) => println!("{photos}"),
//!     Err(err) if err.kind() == ErrorKind::AuthenticationError => println!("Please sign in"),
//!     Err(err) => println!("{}", err.user_message()),
//! }
//! # Ok(())
//! # }
//! ```

// Errors are self-documenting via the ApiError kind table
#![allow(clippy::missing_errors_doc)]

pub(crate) mod logging;

pub mod circuit_breaker;
pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod retry;

#[cfg(test)]
mod tests;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, SystemClock};
pub use classify::{ClassificationRule, ErrorClassifier};
pub use client::{ApiClient, RequestOptions, StreamChunk, UploadFile};
pub use config::ApiClientConfig;
pub use error::{ApiError, ApiResult, ErrorCategory, ErrorKind, ErrorSeverity};
pub use retry::{with_retry, with_timeout, RetryExecutor, RetryHook, RetryPolicy};
