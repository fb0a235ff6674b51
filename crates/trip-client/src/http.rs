//! Authenticated request dispatcher
//!
//! Wraps outbound calls to the TripWithU API: resolves a credential per
//! the declared auth mode (refreshing through the session store when
//! needed), attaches it, and interprets the server's response envelope.
//! A 401 on a call that carried a credential clears the session, since
//! the dispatcher already obtained the freshest possible token before
//! sending.

use crate::session::{AccessToken, SessionStore};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

// =============================================================================
// Error Types
// =============================================================================

/// Failure envelope as returned by the server, or synthesized locally
/// when the body is missing or unreadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// When the failure was produced.
    pub timestamp: String,
    /// HTTP status code.
    pub status: u16,
    /// Request path the failure relates to.
    pub path: String,
    /// Machine-readable error code (e.g. "AUTH_REQUIRED").
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Retry hint for upstream policies; set for client errors.
    #[serde(default)]
    pub skip_retry: bool,
}

/// Errors surfaced by the request dispatcher.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A `Required` call had no credential to attach. Raised before any
    /// network traffic, and never retried.
    #[error("authentication required ({}): {}", .0.code, .0.message)]
    AuthRequired(ErrorBody),

    /// Transport-level failure before a response envelope existed.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Request body serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure envelope from the server, or one synthesized from an
    /// unreadable body (`NON_JSON_RESPONSE`, `UNKNOWN_ERROR`).
    #[error("{} ({}): {}", .0.code, .0.status, .0.message)]
    Api(ErrorBody),
}

impl ApiError {
    /// Machine-readable error code, when one exists.
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::AuthRequired(body) | ApiError::Api(body) => Some(&body.code),
            ApiError::Network(_) | ApiError::Serialization(_) => None,
        }
    }

    /// HTTP status carried by the failure, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::AuthRequired(body) | ApiError::Api(body) => Some(body.status),
            ApiError::Network(_) | ApiError::Serialization(_) => None,
        }
    }

    /// Whether upstream retry policies should skip this error.
    pub fn skip_retry(&self) -> bool {
        match self {
            ApiError::AuthRequired(_) | ApiError::Serialization(_) => true,
            ApiError::Network(_) => false,
            ApiError::Api(body) => body.skip_retry,
        }
    }
}

// =============================================================================
// Request Types
// =============================================================================

/// HTTP method for API requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET request
    Get,
    /// POST request
    Post,
    /// PUT request
    Put,
    /// PATCH request
    Patch,
    /// DELETE request
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Per-call authentication policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Credential mandatory; fail locally when none can be obtained.
    #[default]
    Required,
    /// Attach a credential when available, proceed without otherwise.
    Optional,
    /// Never attach a credential or consult the session store.
    None,
}

/// Request body variants accepted by the dispatcher.
#[derive(Debug, Clone)]
pub enum Body {
    /// JSON payload, sent as `application/json`.
    Json(Value),
    /// Raw text payload.
    Text(String),
    /// Raw bytes with an explicit content type, passed through
    /// unchanged.
    Bytes {
        /// MIME type of the payload.
        content_type: String,
        /// Payload bytes.
        data: Vec<u8>,
    },
}

/// Options for a single dispatched request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Authentication mode; `Required` unless overridden.
    pub auth: AuthMode,
    /// Extra headers merged over the defaults.
    pub headers: HashMap<String, String>,
    /// Optional request body.
    pub body: Option<Body>,
}

impl RequestOptions {
    /// Create default options (`Required` auth, no body).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the authentication mode.
    pub fn auth(mut self, mode: AuthMode) -> Self {
        self.auth = mode;
        self
    }

    /// Add a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Set a JSON request body from a serializable value.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(Body::Json(serde_json::to_value(value)?));
        Ok(self)
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Response envelope shared by every TripWithU endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    /// When the response was produced.
    pub timestamp: String,
    /// HTTP status echoed by the server.
    pub status: u16,
    /// Request path the response relates to.
    pub path: String,
    /// Machine-readable result code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Endpoint-specific payload.
    pub data: T,
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// API base URL (e.g. "https://api.tripwithu.com")
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Custom headers to include in all requests
    pub default_headers: HashMap<String, String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tripwithu.com".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("TripWithU/{}", env!("CARGO_PKG_VERSION")),
            default_headers: HashMap::new(),
        }
    }
}

impl HttpClientConfig {
    /// Create a new config with a base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add a default header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Authenticated HTTP client for the TripWithU API.
///
/// Every call goes through the same pipeline: resolve a credential per
/// the auth mode, attach headers and body, send, then parse the
/// response envelope.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    config: HttpClientConfig,
    session: SessionStore,
}

impl HttpClient {
    /// Create a new client over an existing session store.
    pub fn new(config: HttpClientConfig, session: SessionStore) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .expect("Failed to build HTTP client");

        Self { client, config, session }
    }

    /// The session store this client attaches credentials from.
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Get the client configuration
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Issue a request and parse the response envelope.
    pub async fn request<T>(
        &self,
        path: &str,
        method: Method,
        options: RequestOptions,
    ) -> Result<Envelope<T>, ApiError>
    where
        T: DeserializeOwned,
    {
        let credential = self.resolve_auth(options.auth, path).await?;

        let mut req = self
            .client
            .request(method.into(), self.to_url(path))
            .header("Accept", "application/json");

        for (key, value) in &self.config.default_headers {
            req = req.header(key, value);
        }
        for (key, value) in &options.headers {
            req = req.header(key, value);
        }
        if let Some(token) = &credential {
            req = req.header("Authorization", token.header_value());
        }

        req = match options.body {
            Some(Body::Json(value)) => req
                .header("Content-Type", "application/json")
                .body(serde_json::to_vec(&value)?),
            Some(Body::Text(text)) => req.header("Content-Type", "application/json").body(text),
            Some(Body::Bytes { content_type, data }) => {
                req.header("Content-Type", content_type).body(data)
            }
            None => req,
        };

        let response = req.send().await?;
        self.parse_response(response, credential.is_some()).await
    }

    /// Issue a multipart upload. The form is passed through unchanged
    /// so the transport sets its own boundary content type.
    pub async fn upload<T>(
        &self,
        path: &str,
        method: Method,
        form: reqwest::multipart::Form,
        options: RequestOptions,
    ) -> Result<Envelope<T>, ApiError>
    where
        T: DeserializeOwned,
    {
        let credential = self.resolve_auth(options.auth, path).await?;

        let mut req = self
            .client
            .request(method.into(), self.to_url(path))
            .header("Accept", "application/json");

        for (key, value) in &self.config.default_headers {
            req = req.header(key, value);
        }
        for (key, value) in &options.headers {
            req = req.header(key, value);
        }
        if let Some(token) = &credential {
            req = req.header("Authorization", token.header_value());
        }

        let response = req.multipart(form).send().await?;
        self.parse_response(response, credential.is_some()).await
    }

    /// Obtain a credential per the declared auth mode. `Required` mode
    /// fails here, before any network call, when the session store
    /// cannot produce a token.
    async fn resolve_auth(
        &self,
        mode: AuthMode,
        path: &str,
    ) -> Result<Option<AccessToken>, ApiError> {
        if mode == AuthMode::None {
            return Ok(None);
        }

        // May suspend on an in-flight token refresh.
        match self.session.valid_access_token().await {
            Some(token) => Ok(Some(token)),
            None if mode == AuthMode::Required => Err(ApiError::AuthRequired(ErrorBody {
                timestamp: Utc::now().to_rfc3339(),
                status: 401,
                path: path.to_string(),
                code: "AUTH_REQUIRED".to_string(),
                message: "login required before calling this endpoint".to_string(),
                skip_retry: true,
            })),
            None => Ok(None),
        }
    }

    async fn parse_response<T>(
        &self,
        response: reqwest::Response,
        had_token: bool,
    ) -> Result<Envelope<T>, ApiError>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        let url_path = response.url().path().to_string();
        let text = response.text().await?;

        let non_json = |message: String| {
            ApiError::Api(ErrorBody {
                timestamp: Utc::now().to_rfc3339(),
                status: status.as_u16(),
                path: url_path.clone(),
                code: "NON_JSON_RESPONSE".to_string(),
                message,
                skip_retry: false,
            })
        };

        // A non-empty body that is not JSON is an error regardless of
        // status; the 401/retry handling below never sees it.
        let json: Option<Value> = if text.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).map_err(|_| non_json(text.clone()))?)
        };

        if !status.is_success() {
            let mut body = json
                .and_then(|value| serde_json::from_value::<ErrorBody>(value).ok())
                .unwrap_or_else(|| ErrorBody {
                    timestamp: Utc::now().to_rfc3339(),
                    status: status.as_u16(),
                    path: url_path.clone(),
                    code: "UNKNOWN_ERROR".to_string(),
                    message: "Unknown error".to_string(),
                    skip_retry: false,
                });

            // The dispatcher already obtained the freshest possible
            // credential before sending, so a 401 here means the
            // refresh token itself is no longer honored.
            if status == reqwest::StatusCode::UNAUTHORIZED && had_token {
                warn!("401 on an authenticated call, clearing session");
                self.session.logout().await;
            }

            if status.is_client_error() {
                body.skip_retry = true;
            }

            return Err(ApiError::Api(body));
        }

        match json {
            Some(value) => {
                serde_json::from_value::<Envelope<T>>(value).map_err(|err| non_json(err.to_string()))
            }
            None => Err(non_json("empty response body".to_string())),
        }
    }

    fn to_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            return path.to_string();
        }
        let separator = if path.starts_with('/') { "" } else { "/" };
        format!("{}{}{}", self.config.base_url, separator, path)
    }
}

// =============================================================================
// Retry Logic with Exponential Backoff
// =============================================================================

use std::future::Future;
use tokio::time::sleep;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: usize,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential backoff)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set the initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculate the delay for a given retry attempt
    fn calculate_delay(&self, attempt: usize) -> Duration {
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);

        let delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Retry an async operation with a configurable retry policy.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `should_retry` - Function deciding whether an error is retryable
/// * `operation` - The async operation to retry
pub async fn retry<F, Fut, T, E>(
    config: RetryConfig,
    should_retry: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempts += 1;

                if !should_retry(&err) {
                    return Err(err);
                }

                if attempts > config.max_retries {
                    return Err(err);
                }

                let delay = config.calculate_delay(attempts - 1);
                sleep(delay).await;
            }
        }
    }
}

/// Retry an API operation, honoring each error's `skip_retry` hint.
///
/// Client errors (4xx, `AUTH_REQUIRED` included) stop immediately;
/// transport and server errors back off and retry.
pub async fn api_retry<F, Fut, T>(max_retries: usize, operation: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let config = RetryConfig::new(max_retries);
    retry(config, |err: &ApiError| !err.skip_retry(), operation).await
}

// =============================================================================
// Tests
// =============================================================================
