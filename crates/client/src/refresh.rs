//! Access token refresh.
//!
//! `refresh()` makes one exchange against `/api/token/refresh/` and never
//! fails loudly: any non-success, network error or unreadable body is
//! `None`, which callers translate into "login required". Nothing here
//! retries on its own failure.
//!
//! Concurrent refreshes presenting the same refresh token share a single
//! exchange. Successful results are kept for a short window so callers that
//! arrive just after it still reuse the rotated pair instead of presenting
//! a refresh token the API may already have blacklisted. Failures are not
//! kept.

use std::sync::Arc;
use std::time::Duration;

use agrihcm_core::TokenPair;
use moka::future::Cache;
use serde::Serialize;
use tracing::instrument;
use url::Url;

use crate::credentials::{CookiePolicy, CredentialStore, persist_tokens};

const REFRESH_PATH: &str = "api/token/refresh/";

/// How long a completed exchange is shared with late arrivals.
const COALESCE_WINDOW: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

/// Exchanges refresh tokens for new access tokens.
#[derive(Clone)]
pub struct TokenRefresher {
    inner: Arc<TokenRefresherInner>,
}

struct TokenRefresherInner {
    http: reqwest::Client,
    endpoint: Url,
    exchanges: Cache<String, TokenPair>,
}

impl TokenRefresher {
    /// Create a refresher for the API at `api_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh endpoint cannot be joined onto `api_url`.
    pub fn new(http: reqwest::Client, api_url: &Url) -> Result<Self, url::ParseError> {
        Ok(Self {
            inner: Arc::new(TokenRefresherInner {
                http,
                endpoint: api_url.join(REFRESH_PATH)?,
                exchanges: Cache::builder()
                    .max_capacity(1_000)
                    .time_to_live(COALESCE_WINDOW)
                    .build(),
            }),
        })
    }

    /// Exchange `refresh_token` and persist the result through `store`.
    ///
    /// The new access token (and the rotated refresh token, if issued) is
    /// written before this returns. Returns the access token to use for the
    /// retried operation, or `None` if the refresh failed.
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        store: &dyn CredentialStore,
        policy: &CookiePolicy,
    ) -> Option<String> {
        let pair = self.exchange(refresh_token).await?;
        persist_tokens(store, &pair, policy);
        Some(pair.access)
    }

    /// Exchange `refresh_token` without persisting anything.
    pub async fn exchange(&self, refresh_token: &str) -> Option<TokenPair> {
        if refresh_token.is_empty() {
            return None;
        }

        self.inner
            .exchanges
            .optionally_get_with(refresh_token.to_string(), self.request(refresh_token))
            .await
    }

    async fn request(&self, refresh_token: &str) -> Option<TokenPair> {
        tracing::debug!("Refreshing access token");

        let response = match self
            .inner
            .http
            .post(self.inner.endpoint.clone())
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::info!(%status, "Token refresh rejected");
            return None;
        }

        match response.json::<TokenPair>().await {
            Ok(pair) if !pair.access.is_empty() => {
                tracing::debug!(rotated = pair.refresh.is_some(), "Access token refreshed");
                Some(pair)
            }
            Ok(_) => {
                tracing::warn!("Token refresh returned an empty access token");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh returned an unreadable body");
                None
            }
        }
    }
}
