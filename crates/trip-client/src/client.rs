//! High-level TripWithU API agent
//!
//! Owns a session store and an HTTP dispatcher over the same base URL
//! and ties the auth endpoints to session state: a successful login
//! seeds the store, a logout clears it.

use crate::http::{ApiError, AuthMode, Envelope, HttpClient, HttpClientConfig, Method, RequestOptions};
use crate::session::SessionStore;
use secure_store::SecureStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Credentials for an email/password login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Account email address.
    pub email: String,
    /// Account password.
    pub password: String,
}

/// Token pair issued on a successful login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    /// Short-lived access token.
    pub access_token: String,
    /// Long-lived refresh token.
    pub refresh_token: String,
    /// Authorization scheme, normally "Bearer".
    pub token_type: String,
}

/// TripWithU API client.
///
/// Cloning is cheap; clones share the same session state, so a token
/// refresh or logout observed through one clone is visible to all.
#[derive(Clone)]
pub struct TripClient {
    http: HttpClient,
    session: SessionStore,
}

impl TripClient {
    /// Create a client for the given API base URL, persisting refresh
    /// tokens in the given store.
    pub fn new(base_url: impl Into<String>, storage: Arc<dyn SecureStore>) -> Self {
        Self::with_config(HttpClientConfig::new(base_url), storage)
    }

    /// Create a client with full HTTP configuration.
    pub fn with_config(config: HttpClientConfig, storage: Arc<dyn SecureStore>) -> Self {
        let session = SessionStore::new(config.base_url.clone(), storage);
        let http = HttpClient::new(config, session.clone());
        Self { http, session }
    }

    /// The session store backing this client.
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// The underlying HTTP dispatcher, for endpoints without a typed
    /// wrapper here.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Log in with email and password. On success the returned tokens
    /// are stored and subsequent calls authenticate automatically.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginData, ApiError> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };

        let envelope: Envelope<LoginData> = self
            .http
            .request(
                "/auth/login",
                Method::Post,
                RequestOptions::new().auth(AuthMode::None).json(&request)?,
            )
            .await?;

        let data = envelope.data;
        self.session
            .login(&data.access_token, &data.refresh_token, &data.token_type)
            .await;

        info!("logged in");
        Ok(data)
    }

    /// Log in with an OAuth2 identity token from an external provider
    /// (e.g. "google", "apple"). The provider's token travels in the
    /// Authorization header; the response is the same token pair as a
    /// password login.
    pub async fn login_oauth(&self, provider: &str, id_token: &str) -> Result<LoginData, ApiError> {
        let envelope: Envelope<LoginData> = self
            .http
            .request(
                &format!("/auth/login/oauth2/{provider}"),
                Method::Post,
                RequestOptions::new()
                    .auth(AuthMode::None)
                    .header("Authorization", format!("Bearer {id_token}")),
            )
            .await?;

        let data = envelope.data;
        self.session
            .login(&data.access_token, &data.refresh_token, &data.token_type)
            .await;

        info!(provider, "logged in via oauth");
        Ok(data)
    }

    /// Clear all session state. Purely local; the server keeps no
    /// session to invalidate.
    pub async fn logout(&self) {
        self.session.logout().await;
    }

    /// Whether a usable session exists: a live access token, or a
    /// live refresh token that could mint one.
    pub async fn is_logged_in(&self) -> bool {
        self.session.is_logged_in().await
    }

    /// Authenticated GET returning the envelope payload.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let envelope: Envelope<T> = self
            .http
            .request(path, Method::Get, RequestOptions::new())
            .await?;
        Ok(envelope.data)
    }

    /// Authenticated POST with a JSON body, returning the envelope
    /// payload.
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, ApiError> {
        let envelope: Envelope<T> = self
            .http
            .request(path, Method::Post, RequestOptions::new().json(body)?)
            .await?;
        Ok(envelope.data)
    }

    /// Authenticated request with full control over method, auth mode,
    /// headers, and body.
    pub async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        method: Method,
        options: RequestOptions,
    ) -> Result<Envelope<T>, ApiError> {
        self.http.request(path, method, options).await
    }

    /// Authenticated multipart upload, returning the envelope payload.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T, ApiError> {
        let envelope: Envelope<T> = self
            .http
            .upload(path, Method::Post, form, RequestOptions::new())
            .await?;
        Ok(envelope.data)
    }
}
