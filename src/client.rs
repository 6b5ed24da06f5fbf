//! HTTP facade applying timeout, retry, error mapping and optional circuit
//! breaking to every call.
//!
//! ```rust,no_run
//! use resilient_client::{ApiClient, ApiClientConfig, RequestOptions};
//!
//! # async fn example() -> resilient_client::ApiResult<()> {
//! let client = ApiClient::new(ApiClientConfig::standard().with_base_url("https://api.example.com"))?;
//! let ai = ApiClient::new(ApiClientConfig::ai_generation().with_base_url("https://ai.example.com"))?;
//!
//! let profile: serde_json::Value = client.get("/profile", RequestOptions::default()).await?;
//! let comment: serde_json::Value = ai
//!     .post("/comments", &serde_json::json!({ "photo_id": "p1" }), RequestOptions::default())
//!     .await?;
//! # let _ = (profile, comment);
//! # Ok(())
//! # }
//! ```

use crate::circuit_breaker::CircuitBreaker;
use crate::classify::ErrorClassifier;
use crate::config::{to_header_map, ApiClientConfig};
use crate::error::{ApiError, ApiResult, ErrorKind};
use crate::logging::{log_debug, log_error};
use crate::retry::{cancelled, with_timeout, RetryExecutor, RetryPolicy};

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Per-call overrides. Everything left unset falls back to the client.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Merged over the client's default headers
    pub headers: BTreeMap<String, String>,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout: Option<Duration>,
    /// Cancelling resolves the call to a non-retryable timeout error
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// A file to send as multipart form data.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub field_name: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            field_name: "file".to_string(),
            file_name: file_name.into(),
            content_type: None,
            data,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One decoded unit of a streamed response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Json(Value),
    /// A line that isn't valid JSON, passed through untouched
    Text(String),
}

/// Everything needed to issue one attempt of a request.
struct PreparedRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    payload: Option<Vec<u8>>,
    timeout: Duration,
    cancel: Option<CancellationToken>,
    policy: RetryPolicy,
}

impl PreparedRequest {
    fn builder(&self, http: &reqwest::Client) -> RequestBuilder {
        let builder = http
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        match &self.payload {
            Some(payload) => builder.body(payload.clone()),
            None => builder,
        }
    }
}

/// HTTP client with consistent timeout, retry and error handling.
///
/// Cheap to clone; clones share the connection pool and circuit breaker.
/// Build one instance per call class (e.g. generic vs. AI generation) and
/// pass it where it's needed.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Option<String>,
    default_headers: HeaderMap,
    timeout: Duration,
    retry_policy: RetryPolicy,
    classifier: ErrorClassifier,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl ApiClient {
    /// Create a client from validated configuration.
    pub fn new(config: ApiClientConfig) -> ApiResult<Self> {
        let http = reqwest::Client::builder().build().map_err(|e| {
            ApiError::unknown(format!("Failed to build HTTP client: {e}")).with_source(e)
        })?;
        Self::with_http_client(config, http)
    }

    /// Create a client around an existing `reqwest::Client`.
    pub fn with_http_client(config: ApiClientConfig, http: reqwest::Client) -> ApiResult<Self> {
        config.validate()?;
        let default_headers = config.header_map()?;
        let circuit_breaker = config
            .circuit_breaker
            .map(|breaker| Arc::new(CircuitBreaker::new(breaker)));

        log_debug!(
            base_url = ?config.base_url,
            timeout_ms = config.timeout.as_millis(),
            max_retries = config.retry_policy.max_retries,
            circuit_breaker = circuit_breaker.is_some(),
            "ApiClient created"
        );

        Ok(Self {
            http,
            base_url: config.base_url,
            default_headers,
            timeout: config.timeout,
            retry_policy: config.retry_policy,
            classifier: ErrorClassifier::default(),
            circuit_breaker,
        })
    }

    /// Client for generic calls.
    pub fn standard() -> ApiResult<Self> {
        Self::new(ApiClientConfig::standard())
    }

    /// Client for generative AI calls.
    pub fn ai_generation() -> ApiResult<Self> {
        Self::new(ApiClientConfig::ai_generation())
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Route calls through `breaker`, which may be shared with other clients.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // =========================================================================
    // Verbs
    // =========================================================================

    pub async fn get<T: DeserializeOwned>(&self, path: &str, options: RequestOptions) -> ApiResult<T> {
        self.request::<T, ()>(Method::GET, path, None, options).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B, options: RequestOptions) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(body), options).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B, options: RequestOptions) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, Some(body), options).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B, options: RequestOptions) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PATCH, path, Some(body), options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> ApiResult<T> {
        self.request::<T, ()>(Method::DELETE, path, None, options).await
    }

    /// Issue a JSON request and decode the JSON response.
    ///
    /// A 2xx body of the form `{"success": false, ...}` is an error even
    /// though the transport succeeded; `{"success": true, "data": ...}` yields
    /// `data`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: RequestOptions,
    ) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let payload = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| {
                ApiError::validation(format!("Failed to serialize request body: {e}")).with_source(e)
            })?;
        let prepared = self.prepare(method, path, payload, options)?;
        let executor = self.executor(&prepared);

        self.guarded(|| executor.execute(|| self.attempt_json::<T>(&prepared)))
            .await
    }

    // =========================================================================
    // Upload
    // =========================================================================

    /// Upload a file as multipart form data, reporting progress in `[0, 1]`.
    ///
    /// Transport failures map to network or timeout errors; a non-2xx
    /// response maps to [`ErrorKind::UploadFailed`]. Progress restarts from
    /// zero on each retry.
    ///
    /// Progress is reported as the HTTP stack pulls each chunk of the body,
    /// not as bytes are acknowledged on the wire, so it can run slightly
    /// ahead of the actual transfer.
    pub async fn upload_file<T, P>(
        &self,
        path: &str,
        mut file: UploadFile,
        mut options: RequestOptions,
        on_progress: P,
    ) -> ApiResult<T>
    where
        T: DeserializeOwned,
        P: Fn(f64) + Send + Sync + 'static,
    {
        options.headers.retain(|name, _| !name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
        let mut prepared = self.prepare(Method::POST, path, None, options)?;
        prepared.headers.remove(CONTENT_TYPE);

        let executor = self.executor(&prepared);
        let data = Bytes::from(std::mem::take(&mut file.data));
        let on_progress: Arc<dyn Fn(f64) + Send + Sync> = Arc::new(on_progress);

        let result = self
            .guarded(|| {
                executor.execute(|| {
                    self.attempt_upload::<T>(&prepared, &file, data.clone(), Arc::clone(&on_progress))
                })
            })
            .await;

        if result.is_ok() && data.is_empty() {
            on_progress(1.0);
        }
        result
    }

    async fn attempt_upload<T: DeserializeOwned>(
        &self,
        prepared: &PreparedRequest,
        file: &UploadFile,
        data: Bytes,
        on_progress: Arc<dyn Fn(f64) + Send + Sync>,
    ) -> ApiResult<T> {
        let total = data.len();
        let mut part = Part::stream_with_length(progress_body(data, on_progress), total as u64)
            .file_name(file.file_name.clone());
        if let Some(content_type) = &file.content_type {
            part = part.mime_str(content_type).map_err(|e| {
                ApiError::new(ErrorKind::InvalidFileType, format!("Invalid content type: {e}"))
                    .with_source(e)
            })?;
        }
        let form = Form::new().part(file.field_name.clone(), part);
        let builder = prepared.builder(&self.http).multipart(form);

        with_timeout(prepared.timeout, prepared.cancel.as_ref(), async {
            let response = builder
                .send()
                .await
                .map_err(|e| self.transport_error(e, &prepared.url))?;

            let status = response.status();
            if !status.is_success() {
                let (detail, body) = read_error_body(response).await;
                log_error!(
                    url = %prepared.url,
                    status = %status,
                    detail = %detail,
                    "Upload rejected"
                );
                let retryable =
                    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                return Err(ApiError::upload_failed(format!(
                    "Upload failed with HTTP {}: {detail}",
                    status.as_u16()
                ))
                .with_retryable(retryable)
                .with_details(error_details(status, body)));
            }

            self.read_json(response, &prepared.url).await
        })
        .await
    }

    // =========================================================================
    // Streaming
    // =========================================================================

    /// Issue a request and feed the response body to `on_chunk` line by line.
    ///
    /// Each non-empty line (with any SSE `data:` prefix removed) is decoded as
    /// JSON, or passed through as text when it isn't JSON. Only establishing
    /// the response is retried; a failure mid-body ends the call. The request
    /// timeout bounds connecting and, separately, every wait for the next
    /// body chunk. Returns the number of chunks delivered.
    pub async fn stream<B, C>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: RequestOptions,
        mut on_chunk: C,
    ) -> ApiResult<usize>
    where
        B: Serialize + ?Sized,
        C: FnMut(StreamChunk),
    {
        let payload = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| {
                ApiError::validation(format!("Failed to serialize request body: {e}")).with_source(e)
            })?;
        let prepared = self.prepare(method, path, payload, options)?;
        let executor = self.executor(&prepared);

        let response = self
            .guarded(|| {
                executor.execute(|| {
                    with_timeout(
                        prepared.timeout,
                        prepared.cancel.as_ref(),
                        self.send_checked(prepared.builder(&self.http), &prepared.url),
                    )
                })
            })
            .await?;

        let mut body = std::pin::pin!(response.bytes_stream());
        let mut lines = LineBuffer::default();
        let mut delivered = 0;

        loop {
            // The request timeout doubles as an idle limit between chunks.
            let idle = tokio::time::timeout(prepared.timeout, body.next());
            let next = match &prepared.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(cancelled()),
                    next = idle => next,
                },
                None => idle.await,
            };
            let Ok(next) = next else {
                log_error!(
                    url = %prepared.url,
                    timeout_ms = prepared.timeout.as_millis(),
                    chunks = delivered,
                    "Stream stalled"
                );
                return Err(ApiError::timeout(prepared.timeout));
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| self.transport_error(e, &prepared.url))?;

            for line in lines.push(&chunk) {
                on_chunk(decode_line(&line));
                delivered += 1;
            }
        }
        if let Some(line) = lines.finish() {
            on_chunk(decode_line(&line));
            delivered += 1;
        }

        log_debug!(url = %prepared.url, chunks = delivered, "Stream completed");
        Ok(delivered)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn prepare(
        &self,
        method: Method,
        path: &str,
        payload: Option<Vec<u8>>,
        options: RequestOptions,
    ) -> ApiResult<PreparedRequest> {
        let url = self.resolve_url(path)?;

        let mut headers = self.default_headers.clone();
        for (name, value) in to_header_map(&options.headers)? {
            if let Some(name) = name {
                headers.insert(name, value);
            }
        }

        log_debug!(method = %method, url = %url, "Preparing API request");

        Ok(PreparedRequest {
            method,
            url,
            headers,
            payload,
            timeout: options.timeout.unwrap_or(self.timeout),
            cancel: options.cancel,
            policy: options
                .retry_policy
                .unwrap_or_else(|| self.retry_policy.clone()),
        })
    }

    fn resolve_url(&self, path: &str) -> ApiResult<Url> {
        if let Ok(url) = Url::parse(path) {
            return Ok(url);
        }

        let base = self.base_url.as_deref().ok_or_else(|| {
            ApiError::validation(format!("Relative path '{path}' requires a configured base URL"))
        })?;
        let joined = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined)
            .map_err(|e| ApiError::validation(format!("Invalid request URL '{joined}': {e}")))
    }

    fn executor(&self, prepared: &PreparedRequest) -> RetryExecutor {
        RetryExecutor::with_classifier(prepared.policy.clone(), self.classifier.clone())
    }

    async fn guarded<T, F, Fut>(&self, call: F) -> ApiResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        match &self.circuit_breaker {
            Some(breaker) => breaker.execute(call).await,
            None => call().await,
        }
    }

    async fn attempt_json<T: DeserializeOwned>(&self, prepared: &PreparedRequest) -> ApiResult<T> {
        with_timeout(prepared.timeout, prepared.cancel.as_ref(), async {
            let response = self
                .send_checked(prepared.builder(&self.http), &prepared.url)
                .await?;
            self.read_json(response, &prepared.url).await
        })
        .await
    }

    /// Send and map any non-2xx status to a typed error.
    async fn send_checked(&self, builder: RequestBuilder, url: &Url) -> ApiResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(e, url))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let (detail, body) = read_error_body(response).await;
        log_error!(
            url = %url,
            status = %status,
            detail = %detail,
            "API error response"
        );
        Err(self
            .classifier
            .classify_status(status, &detail)
            .with_details(error_details(status, body)))
    }

    async fn read_json<T: DeserializeOwned>(&self, response: Response, url: &Url) -> ApiResult<T> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e, url))?;

        let value: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| {
                log_error!(url = %url, error = %e, "Failed to parse response");
                ApiError::unknown(format!("Invalid JSON response: {e}")).with_source(e)
            })?
        };

        let payload = self.unwrap_envelope(value)?;
        serde_json::from_value(payload).map_err(|e| {
            ApiError::unknown(format!("Unexpected response shape: {e}")).with_source(e)
        })
    }

    /// Apply `{success, data?, error?, message?}` semantics when present.
    fn unwrap_envelope(&self, value: Value) -> ApiResult<Value> {
        let Some(success) = value.get("success").and_then(Value::as_bool) else {
            return Ok(value);
        };

        if success {
            return Ok(value.get("data").cloned().unwrap_or(Value::Null));
        }

        let detail =
            extract_detail(&value).unwrap_or_else(|| "Request reported failure".to_string());
        let kind = self
            .classifier
            .kind_from_message(&detail)
            .unwrap_or(ErrorKind::UnknownError);
        Err(ApiError::new(kind, detail).with_details(value))
    }

    fn transport_error(&self, error: reqwest::Error, url: &Url) -> ApiError {
        log_error!(url = %url, error = %error, "HTTP request failed");
        let hint = if error.is_timeout() {
            ErrorKind::TimeoutError
        } else {
            ErrorKind::NetworkError
        };
        self.classifier.classify(error, Some(hint))
    }
}

/// Pull a diagnostic string out of an error body: `error` or `message`,
/// either as a string or as an object with a `message`.
fn extract_detail(body: &Value) -> Option<String> {
    ["error", "message"].iter().find_map(|key| match body.get(*key)? {
        Value::String(text) => Some(text.clone()),
        Value::Object(object) => object
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    })
}

async fn read_error_body(response: Response) -> (String, Option<Value>) {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<Value>(&text).ok();
    let detail = body
        .as_ref()
        .and_then(extract_detail)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string());
    (detail, body)
}

fn error_details(status: StatusCode, body: Option<Value>) -> Value {
    serde_json::json!({
        "status": status.as_u16(),
        "body": body,
    })
}

fn progress_body(data: Bytes, on_progress: Arc<dyn Fn(f64) + Send + Sync>) -> reqwest::Body {
    let total = data.len();
    let chunks = futures_util::stream::iter((0..total).step_by(UPLOAD_CHUNK_SIZE)).map(
        move |start| {
            let end = (start + UPLOAD_CHUNK_SIZE).min(total);
            on_progress(end as f64 / total as f64);
            Ok::<_, std::io::Error>(data.slice(start..end))
        },
    );
    reqwest::Body::wrap_stream(chunks)
}

/// Splits a byte stream into lines, holding back a trailing partial line.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(line) = clean_line(&raw) {
                lines.push(line);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        clean_line(&rest)
    }
}

fn clean_line(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);
    let line = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
    if line.trim().is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

fn decode_line(line: &str) -> StreamChunk {
    serde_json::from_str(line)
        .map(StreamChunk::Json)
        .unwrap_or_else(|_| StreamChunk::Text(line.to_string()))
}
