//! Authenticated request gateway.
//!
//! [`Gateway`] is the only path to the REST API for anything that needs
//! the user's identity. Each call:
//!
//! 1. attaches `Authorization: Bearer <access>` when an access token is stored
//! 2. sends `Content-Type: application/json` unless the caller overrides it
//! 3. on 401, refreshes once and retries once with the new token
//! 4. turns every other non-2xx into an [`ApiError`]
//!
//! 204 and empty bodies come back as `Ok(None)`.

mod error;

pub use error::{ApiError, derive_message};

use std::sync::Arc;

use agrihcm_core::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::config::ClientConfig;
use crate::credentials::{self, Audience, CookiePolicy, CredentialStore};
use crate::refresh::TokenRefresher;

// ─────────────────────────────────────────────────────────────────────────────
// API Client
// ─────────────────────────────────────────────────────────────────────────────

/// Shared HTTP plumbing for one REST API. Cheap to clone.
///
/// Holds no credentials; bind a credential store with [`ApiClient::gateway`].
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    http: reqwest::Client,
    config: ClientConfig,
    refresher: TokenRefresher,
}

impl ApiClient {
    /// Create a client with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured API URL cannot be used as a base.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        Self::with_http(config, reqwest::Client::new())
    }

    /// Create a client on an existing `reqwest::Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured API URL cannot be used as a base.
    pub fn with_http(config: ClientConfig, http: reqwest::Client) -> Result<Self, ApiError> {
        let refresher = TokenRefresher::new(http.clone(), &config.api_url)
            .map_err(|e| ApiError::Malformed(format!("invalid API URL: {e}")))?;

        Ok(Self {
            inner: Arc::new(ApiClientInner {
                http,
                config,
                refresher,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn refresher(&self) -> &TokenRefresher {
        &self.inner.refresher
    }

    /// Cookie attributes for credentials issued to `audience`.
    #[must_use]
    pub fn cookie_policy(&self, audience: Audience) -> CookiePolicy {
        self.inner.config.cookie_policy(audience)
    }

    /// Resolve an API path such as `api/cart/` against the base URL.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Malformed` if the path does not form a valid URL.
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.inner
            .config
            .api_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Malformed(format!("invalid API path {path}: {e}")))
    }

    /// Bind a credential store, producing a gateway for one user context.
    #[must_use]
    pub fn gateway(&self, store: Arc<dyn CredentialStore>, audience: Audience) -> Gateway {
        Gateway {
            api: self.clone(),
            store,
            audience,
            headers: HeaderMap::new(),
        }
    }

    /// Send a request without credentials and without the refresh path.
    ///
    /// Used by login, where a 401 means bad credentials rather than an
    /// expired token.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` for network failures and non-success responses.
    pub async fn send_anonymous<B, T>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Option<T>, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = to_body(body)?;
        let response = self
            .send_once(method, path, Some(&body), None, None)
            .await?;
        read_response(response).await
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: Option<&HeaderMap>,
        access_token: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self
            .inner
            .http
            .request(method, self.url(path)?)
            .header(CONTENT_TYPE, "application/json");

        if let Some(token) = access_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(headers) = headers {
            request = request.headers(headers.clone());
        }
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| ApiError::Malformed(format!("unserializable request body: {e}")))?;
            request = request.body(bytes);
        }

        Ok(request.send().await?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────────────────────────

/// The authenticated request path for one user context.
#[derive(Clone)]
pub struct Gateway {
    api: ApiClient,
    store: Arc<dyn CredentialStore>,
    audience: Audience,
    headers: HeaderMap,
}

impl Gateway {
    /// Send `headers` with every request from this gateway. Per-call
    /// headers still take precedence.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    #[must_use]
    pub const fn api(&self) -> &ApiClient {
        &self.api
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    #[must_use]
    pub const fn audience(&self) -> Audience {
        self.audience
    }

    /// Whether any credential is stored for this context.
    #[must_use]
    pub fn has_credential(&self) -> bool {
        credentials::has_credential(self.store.as_ref())
    }

    /// `GET path`.
    ///
    /// # Errors
    ///
    /// See [`Gateway::request`].
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ApiError> {
        self.request(Method::GET, path, None, None).await
    }

    /// `POST path` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`Gateway::request`].
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<Option<T>, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = to_body(body)?;
        self.request(Method::POST, path, Some(&body), None).await
    }

    /// `PATCH path` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`Gateway::request`].
    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<Option<T>, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = to_body(body)?;
        self.request(Method::PATCH, path, Some(&body), None).await
    }

    /// `DELETE path`.
    ///
    /// # Errors
    ///
    /// See [`Gateway::request`].
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ApiError> {
        self.request(Method::DELETE, path, None, None).await
    }

    /// Send an authenticated request.
    ///
    /// A 401 triggers exactly one refresh; if that yields a token the
    /// request is retried exactly once with it.
    ///
    /// # Errors
    ///
    /// - `ApiError::Unauthorized` if the refresh fails or the retry is also 401
    /// - `ApiError::Network` if no response was received
    /// - `ApiError::Validation`, `Conflict` or `Status` for other non-2xx responses
    /// - `ApiError::Malformed` if a success body cannot be decoded as `T`
    #[instrument(skip(self, body, headers), fields(audience = ?self.audience))]
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: Option<&HeaderMap>,
    ) -> Result<Option<T>, ApiError> {
        let mut merged = self.headers.clone();
        if let Some(extra) = headers {
            merged.extend(extra.clone());
        }
        let headers = Some(&merged);

        let access = self.store.get(ACCESS_TOKEN_COOKIE);
        let response = self
            .api
            .send_once(method.clone(), path, body, headers, access.as_deref())
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return read_response(response).await;
        }

        let Some(refresh) = self.store.get(REFRESH_TOKEN_COOKIE) else {
            tracing::debug!("401 without a refresh token");
            return Err(ApiError::Unauthorized);
        };

        let policy = self.api.cookie_policy(self.audience);
        let Some(access) = self
            .api
            .refresher()
            .refresh(&refresh, self.store.as_ref(), &policy)
            .await
        else {
            tracing::info!("Refresh failed after 401");
            return Err(ApiError::Unauthorized);
        };

        tracing::debug!("Retrying request with refreshed token");
        let retry = self
            .api
            .send_once(method, path, body, headers, Some(&access))
            .await?;

        if retry.status() == StatusCode::UNAUTHORIZED {
            tracing::info!("Retry with refreshed token was also rejected");
            return Err(ApiError::Unauthorized);
        }

        read_response(retry).await
    }
}

fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body)
        .map_err(|e| ApiError::Malformed(format!("unserializable request body: {e}")))
}

async fn read_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Option<T>, ApiError> {
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(None);
    }

    let bytes = response.bytes().await?;
    if !status.is_success() {
        let error = ApiError::from_response(status, &bytes);
        tracing::debug!(%status, error = %error, "API request failed");
        return Err(error);
    }

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ApiError::Malformed(e.to_string()))
}
