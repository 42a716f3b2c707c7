//! Session guard for protected path prefixes.
//!
//! Runs before any handler under a protected prefix (the admin console by
//! default). The login route under each prefix is always let through.
//!
//! | Stored credential               | Outcome                                  |
//! |---------------------------------|------------------------------------------|
//! | access or refresh token missing | clear both cookies, send to login        |
//! | access token valid              | continue                                 |
//! | access token stale              | refresh once; continue or clear + login  |
//!
//! A refreshed access token is written to the response cookies before the
//! handler runs, so the handler's own API calls already use it.

use agrihcm_client::credentials::clear_tokens;
use agrihcm_client::{Audience, CredentialStore, login_redirect};
use agrihcm_core::{ACCESS_TOKEN_COOKIE, CredentialState, REFRESH_TOKEN_COOKIE};
use axum::{
    extract::{OriginalUri, Request, State},
    http::Uri,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tower_cookies::Cookies;

use crate::credentials::CookieJarStore;
use crate::middleware::auth::{AuthRejection, is_api_path};
use crate::state::AppState;

/// Which paths the guard covers.
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    prefixes: Vec<String>,
}

/// What the guard does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Let the request through untouched.
    Pass,
    /// Refresh the access token, then decide again.
    Refresh,
    /// Clear credentials and send the user to login.
    Logout,
}

impl From<CredentialState> for GuardDecision {
    fn from(state: CredentialState) -> Self {
        match state {
            CredentialState::Missing => Self::Logout,
            CredentialState::Valid => Self::Pass,
            CredentialState::Stale => Self::Refresh,
        }
    }
}

impl GuardPolicy {
    #[must_use]
    pub const fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    /// The protected prefix `path` falls under, if any.
    ///
    /// Matches on segment boundaries: `/agrihcmAdmin` covers
    /// `/agrihcmAdmin/orders` but not `/agrihcmAdministration`.
    #[must_use]
    pub fn protected_prefix(&self, path: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|prefix| {
                path.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            })
            .map(String::as_str)
    }

    /// Login route for a protected prefix.
    #[must_use]
    pub fn login_path(prefix: &str) -> String {
        format!("{prefix}/login")
    }

    /// Whether `path` is the login route under `prefix`.
    #[must_use]
    pub fn is_login_path(prefix: &str, path: &str) -> bool {
        let login = Self::login_path(prefix);
        path == login || path.strip_prefix(&login) == Some("/")
    }

    /// Whether the guard must check credentials for `path`.
    #[must_use]
    pub fn requires_session(&self, path: &str) -> bool {
        self.protected_prefix(path)
            .is_some_and(|prefix| !Self::is_login_path(prefix, path))
    }
}

/// Middleware enforcing a session on protected prefixes.
///
/// Use with `axum::middleware::from_fn_with_state`. Requires
/// `CookieManagerLayer` further out.
pub async fn session_guard(
    State(state): State<AppState>,
    cookies: Cookies,
    request: Request,
    next: Next,
) -> Response {
    let uri = request
        .extensions()
        .get::<OriginalUri>()
        .map_or_else(|| request.uri().clone(), |original| original.0.clone());
    let path = uri.path().to_string();
    let Some(prefix) = state.guard().protected_prefix(&path).map(str::to_string) else {
        return next.run(request).await;
    };
    if GuardPolicy::is_login_path(&prefix, &path) {
        return next.run(request).await;
    }

    let store = CookieJarStore::new(cookies);
    let refresh = store.get(REFRESH_TOKEN_COOKIE);
    let credential = CredentialState::classify(
        store.get(ACCESS_TOKEN_COOKIE).as_deref(),
        refresh.as_deref(),
        state.config().client.expiry_margin_secs,
        Utc::now(),
    );

    match GuardDecision::from(credential) {
        GuardDecision::Pass => next.run(request).await,
        GuardDecision::Refresh => {
            let policy = state.api().cookie_policy(Audience::Admin);
            let refreshed = match refresh.as_deref() {
                Some(token) => {
                    state
                        .api()
                        .refresher()
                        .refresh(token, &store, &policy)
                        .await
                }
                None => None,
            };

            if refreshed.is_some() {
                tracing::debug!(path = %path, "Refreshed stale access token");
                next.run(request).await
            } else {
                tracing::info!(path = %path, "Refresh failed; ending session");
                reject(&store, &prefix, &uri)
            }
        }
        GuardDecision::Logout => {
            tracing::debug!(path = %path, "No session for protected path");
            reject(&store, &prefix, &uri)
        }
    }
}

fn reject(store: &CookieJarStore, prefix: &str, uri: &Uri) -> Response {
    clear_tokens(store);

    let origin = uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    let login_url = login_redirect(&GuardPolicy::login_path(prefix), origin);

    if is_api_path(uri.path()) {
        AuthRejection::Unauthorized(login_url).into_response()
    } else {
        AuthRejection::RedirectToLogin(login_url).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> GuardPolicy {
        GuardPolicy::new(vec!["/agrihcmAdmin".to_string()])
    }

    #[test]
    fn test_prefix_matches_on_segment_boundary() {
        let policy = policy();
        assert_eq!(policy.protected_prefix("/agrihcmAdmin"), Some("/agrihcmAdmin"));
        assert_eq!(
            policy.protected_prefix("/agrihcmAdmin/orders/5"),
            Some("/agrihcmAdmin")
        );
        assert_eq!(policy.protected_prefix("/agrihcmAdministration"), None);
        assert_eq!(policy.protected_prefix("/products"), None);
    }

    #[test]
    fn test_login_path_is_exempt() {
        let policy = policy();
        assert!(!policy.requires_session("/agrihcmAdmin/login"));
        assert!(!policy.requires_session("/agrihcmAdmin/login/"));
        assert!(policy.requires_session("/agrihcmAdmin/login-history"));
        assert!(policy.requires_session("/agrihcmAdmin"));
        assert!(!policy.requires_session("/cart"));
    }

    #[test]
    fn test_decision_per_credential_state() {
        assert_eq!(
            GuardDecision::from(CredentialState::Missing),
            GuardDecision::Logout
        );
        assert_eq!(GuardDecision::from(CredentialState::Valid), GuardDecision::Pass);
        assert_eq!(
            GuardDecision::from(CredentialState::Stale),
            GuardDecision::Refresh
        );
    }
}
