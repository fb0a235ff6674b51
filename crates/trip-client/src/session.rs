//! Session token store
//!
//! Single source of truth for the credential pair, and the only place
//! that mutates it. The short-lived access token lives in process
//! memory only; the refresh token is persisted in secure storage and
//! survives restarts. When the access token gets close to its expiry,
//! the store replaces it through the refresh endpoint, and concurrent
//! callers share a single in-flight refresh instead of each issuing
//! their own network call.

use crate::jwt;
use chrono::Duration;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use secure_store::SecureStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Storage key the auth record is persisted under.
pub const AUTH_STORAGE_KEY: &str = "app_auth_storage";

/// Refresh when the access token has less than this long to live.
const DEFAULT_REFRESH_THRESHOLD_MS: i64 = 60_000;

/// Bearer credential held in memory for the lifetime of the session.
/// Never written to persistent storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Opaque token string.
    pub token: String,
    /// Authorization scheme, normally "Bearer".
    pub scheme: String,
}

impl AccessToken {
    /// Format as an `Authorization` header value.
    pub fn header_value(&self) -> String {
        format!("{} {}", self.scheme, self.token)
    }
}

/// Durable session state, persisted as one JSON blob in secure storage.
///
/// The access token is deliberately absent: it never touches disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRecord {
    /// Long-lived refresh token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Cached user profile; shape is left to the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

/// Success payload of the refresh endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshData {
    access_token: String,
    token_type: String,
}

enum RefreshOutcome {
    /// New access token issued.
    Renewed(AccessToken),
    /// The server no longer honors the refresh token.
    Rejected,
    /// Transient failure: network error, non-401 status, bad body.
    Failed,
}

type PendingRefresh = Shared<BoxFuture<'static, Option<AccessToken>>>;

struct Inner {
    base_url: String,
    storage: Arc<dyn SecureStore>,
    http: reqwest::Client,
    threshold: Duration,
    access: Mutex<Option<AccessToken>>,
    pending: Mutex<Option<PendingRefresh>>,
}

/// Session token store handle.
///
/// Cloning is cheap; all clones share the same session state. Construct
/// one per isolated session (there is no hidden global instance).
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    /// Create a store against the given API base URL and secure
    /// storage backend, with the default 60-second refresh threshold.
    pub fn new(base_url: impl Into<String>, storage: Arc<dyn SecureStore>) -> Self {
        Self::with_threshold(
            base_url,
            storage,
            Duration::milliseconds(DEFAULT_REFRESH_THRESHOLD_MS),
        )
    }

    /// Create a store with a custom refresh threshold.
    pub fn with_threshold(
        base_url: impl Into<String>,
        storage: Arc<dyn SecureStore>,
        threshold: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_url: base_url.into(),
                storage,
                http: reqwest::Client::new(),
                threshold,
                access: Mutex::new(None),
                pending: Mutex::new(None),
            }),
        }
    }

    /// Access token currently cached in memory, without validity
    /// checks.
    pub fn access_token(&self) -> Option<AccessToken> {
        self.inner.access.lock().clone()
    }

    /// Refresh token from the persisted auth record.
    pub async fn refresh_token(&self) -> Option<String> {
        self.load_record().await.refresh_token
    }

    /// Cached user profile from the persisted auth record.
    pub async fn user(&self) -> Option<Value> {
        self.load_record().await.user
    }

    /// Attach or replace the cached user profile.
    pub async fn set_user(&self, user: Value) {
        let mut record = self.load_record().await;
        record.user = Some(user);
        self.store_record(&record).await;
    }

    /// Store a fresh credential pair after a successful login,
    /// overwriting any prior session.
    pub async fn login(
        &self,
        access: impl Into<String>,
        refresh: impl Into<String>,
        scheme: impl Into<String>,
    ) {
        {
            let mut slot = self.inner.access.lock();
            *slot = Some(AccessToken {
                token: access.into(),
                scheme: scheme.into(),
            });
        }

        let mut record = self.load_record().await;
        record.refresh_token = Some(refresh.into());
        self.store_record(&record).await;

        debug!("session established");
    }

    /// Clear all session state: the in-memory access token, any
    /// pending refresh, and the persisted auth record.
    pub async fn logout(&self) {
        *self.inner.access.lock() = None;
        *self.inner.pending.lock() = None;

        if let Err(err) = self.inner.storage.remove(AUTH_STORAGE_KEY).await {
            warn!("secure storage clear failed: {err}");
        }

        debug!("session cleared");
    }

    /// Return an access token that is safe to attach to a request.
    ///
    /// With no cached token at all the answer is immediately `None`;
    /// the refresh path only ever renews an existing session, it never
    /// mints a first credential. The cached token is returned as-is
    /// while it is comfortably within its lifetime. Near expiry, the
    /// store attempts a refresh: callers arriving while one is already
    /// in flight await the same shared outcome, so at most one refresh
    /// network call runs at a time. Returns `None` when no usable
    /// credential can be produced.
    pub async fn valid_access_token(&self) -> Option<AccessToken> {
        let access = self.access_token()?;

        if !jwt::is_expiring_soon(&access.token, self.inner.threshold) {
            return Some(access);
        }

        let Some(refresh) = self.refresh_token().await else {
            warn!("no refresh token, cannot renew access token");
            // A near-expiry token stays usable until its hard expiry.
            return (!jwt::is_expired(&access.token)).then_some(access);
        };

        if jwt::is_expired(&refresh) {
            debug!("refresh token expired, clearing session");
            self.logout().await;
            return None;
        }

        let pending = {
            let mut slot = self.inner.pending.lock();
            match slot.as_ref() {
                Some(fut) => fut.clone(),
                None => {
                    let store = self.clone();
                    let fut = async move { store.run_refresh(refresh).await }
                        .boxed()
                        .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        pending.await
    }

    /// Whether a usable session exists: a live access token, or a live
    /// refresh token that could mint one.
    pub async fn is_logged_in(&self) -> bool {
        if let Some(access) = self.access_token() {
            if !jwt::is_expired(&access.token) {
                return true;
            }
        }

        match self.refresh_token().await {
            Some(refresh) => !jwt::is_expired(&refresh),
            None => false,
        }
    }

    /// Full claims of the cached access token, if one exists.
    pub fn claims(&self) -> Option<jwt::Claims> {
        let access = self.access_token()?;
        Some(jwt::decode_claims(&access.token))
    }

    /// A single claim from the cached access token.
    pub fn claim(&self, key: &str) -> Option<Value> {
        self.claims()?.get(key).cloned()
    }

    /// Non-registered claims of the cached access token.
    pub fn custom_claims(&self) -> Option<Map<String, Value>> {
        Some(self.claims()?.custom())
    }

    /// Single refresh attempt. The pending slot is cleared before any
    /// waiter observes the outcome, so the store is ready for a new
    /// attempt on the next validity check.
    async fn run_refresh(self, refresh: String) -> Option<AccessToken> {
        let outcome = self.call_refresh_endpoint(&refresh).await;

        *self.inner.pending.lock() = None;

        match outcome {
            RefreshOutcome::Renewed(token) => {
                *self.inner.access.lock() = Some(token.clone());
                debug!("access token renewed");
                Some(token)
            }
            RefreshOutcome::Rejected => {
                warn!("refresh token rejected by server, clearing session");
                self.logout().await;
                None
            }
            RefreshOutcome::Failed => None,
        }
    }

    async fn call_refresh_endpoint(&self, refresh: &str) -> RefreshOutcome {
        let url = format!("{}/auth/access-token/refresh", self.inner.base_url);

        let response = match self
            .inner
            .http
            .post(&url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("X-Refresh-Token", refresh)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("token refresh transport error: {err}");
                return RefreshOutcome::Failed;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("token refresh failed with status {status}");
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return RefreshOutcome::Rejected;
            }
            return RefreshOutcome::Failed;
        }

        #[derive(Deserialize)]
        struct Envelope {
            data: Option<RefreshData>,
        }

        let envelope: Envelope = match response.json().await {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("token refresh returned an unreadable body: {err}");
                return RefreshOutcome::Failed;
            }
        };

        match envelope.data {
            Some(data) => RefreshOutcome::Renewed(AccessToken {
                token: data.access_token,
                scheme: data.token_type,
            }),
            None => RefreshOutcome::Failed,
        }
    }

    async fn load_record(&self) -> AuthRecord {
        match self.inner.storage.get(AUTH_STORAGE_KEY).await {
            Ok(Some(blob)) => serde_json::from_str(&blob).unwrap_or_else(|err| {
                warn!("corrupt auth record, starting clean: {err}");
                AuthRecord::default()
            }),
            Ok(None) => AuthRecord::default(),
            Err(err) => {
                warn!("secure storage read failed: {err}");
                AuthRecord::default()
            }
        }
    }

    async fn store_record(&self, record: &AuthRecord) {
        match serde_json::to_string(record) {
            Ok(blob) => {
                if let Err(err) = self.inner.storage.set(AUTH_STORAGE_KEY, &blob).await {
                    warn!("secure storage write failed: {err}");
                }
            }
            Err(err) => warn!("auth record serialization failed: {err}"),
        }
    }
}
