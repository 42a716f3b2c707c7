//! Login, logout and session checks.

use agrihcm_core::{REFRESH_TOKEN_COOKIE, TokenPair, User};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::credentials::{Audience, clear_tokens, persist_tokens};
use crate::events::{EventBus, SessionEvent};
use crate::gateway::{ApiError, Gateway};

const LOGIN_PATH: &str = "api/login/";
const ADMIN_LOGIN_PATH: &str = "api/agrihcmAdmin/login/";
const LOGOUT_PATH: &str = "api/logout/";
const ME_PATH: &str = "api/users/me/";

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The API refused the credentials.
    #[error("{0}")]
    Rejected(String),

    /// The login response did not carry both tokens.
    #[error("login response is missing tokens")]
    MissingTokens,

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access: String,
    refresh: String,
    #[serde(default)]
    user: Option<User>,
}

#[derive(Serialize)]
struct LogoutRequest<'a> {
    refresh: &'a str,
}

/// Session lifecycle for one credential context.
#[derive(Clone)]
pub struct SessionService {
    gateway: Gateway,
    events: EventBus,
}

impl SessionService {
    #[must_use]
    pub const fn new(gateway: Gateway, events: EventBus) -> Self {
        Self { gateway, events }
    }

    /// Customer login. Persists both tokens on success.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Rejected` with the API's message for bad
    /// credentials, or `SessionError::Api` for transport failures.
    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<Option<User>, SessionError> {
        self.login_at(LOGIN_PATH, Audience::Customer, username, password)
            .await
    }

    /// Admin console login. The access cookie gets the shorter admin lifetime.
    ///
    /// # Errors
    ///
    /// Same as [`SessionService::login`].
    #[instrument(skip(self, password))]
    pub async fn admin_login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<Option<User>, SessionError> {
        self.login_at(ADMIN_LOGIN_PATH, Audience::Admin, username, password)
            .await
    }

    async fn login_at(
        &self,
        path: &str,
        audience: Audience,
        username: &str,
        password: &SecretString,
    ) -> Result<Option<User>, SessionError> {
        let request = LoginRequest {
            username: username.trim(),
            password: password.expose_secret(),
        };

        let response: LoginResponse = match self
            .gateway
            .api()
            .send_anonymous(Method::POST, path, &request)
            .await
        {
            Ok(Some(response)) => response,
            Ok(None) => return Err(SessionError::MissingTokens),
            Err(e @ (ApiError::Network(_) | ApiError::Malformed(_))) => return Err(e.into()),
            Err(e) => return Err(SessionError::Rejected(e.user_message())),
        };

        if response.access.is_empty() || response.refresh.is_empty() {
            return Err(SessionError::MissingTokens);
        }

        let pair = TokenPair {
            access: response.access,
            refresh: Some(response.refresh),
        };
        let policy = self.gateway.api().cookie_policy(audience);
        persist_tokens(self.gateway.store().as_ref(), &pair, &policy);

        if let Some(user) = &response.user {
            tracing::info!(user_id = %user.id, "User logged in");
            self.events
                .emit(SessionEvent::UserLoggedIn { user_id: user.id });
        }

        Ok(response.user)
    }

    /// Check the stored session against `GET /api/users/me/`.
    ///
    /// Returns `None` when there is no usable session. Emits
    /// [`SessionEvent::UserLoggedIn`] on success.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Api` for failures other than `Unauthorized`.
    #[instrument(skip(self))]
    pub async fn check_session(&self) -> Result<Option<User>, SessionError> {
        if !self.gateway.has_credential() {
            return Ok(None);
        }

        match self.gateway.get::<User>(ME_PATH).await {
            Ok(Some(user)) => {
                self.events
                    .emit(SessionEvent::UserLoggedIn { user_id: user.id });
                Ok(Some(user))
            }
            Ok(None) => Err(ApiError::Malformed("empty profile response".to_string()).into()),
            Err(ApiError::Unauthorized) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Log out. The API call is best-effort; local credentials are always
    /// cleared.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Some(refresh) = self.gateway.store().get(REFRESH_TOKEN_COOKIE) {
            let result = self
                .gateway
                .post::<_, serde_json::Value>(LOGOUT_PATH, &LogoutRequest { refresh: &refresh })
                .await;
            if let Err(e) = result {
                tracing::info!(error = %e, "Logout request failed; clearing local session anyway");
            }
        }

        clear_tokens(self.gateway.store().as_ref());
        self.events.emit(SessionEvent::LoggedOut);
    }
}

/// Login URL that returns to `origin` afterwards.
#[must_use]
pub fn login_redirect(login_path: &str, origin: &str) -> String {
    // Only same-site paths; anything else could redirect off-site
    if origin.starts_with('/') && !origin.starts_with("//") && origin != login_path {
        format!("{login_path}?next={}", urlencoding::encode(origin))
    } else {
        login_path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_redirect_remembers_origin() {
        assert_eq!(
            login_redirect("/auth/login", "/products/organic-rice?ref=home"),
            "/auth/login?next=%2Fproducts%2Forganic-rice%3Fref%3Dhome"
        );
    }

    #[test]
    fn test_login_redirect_ignores_offsite_origins() {
        assert_eq!(login_redirect("/auth/login", "https://evil.test/"), "/auth/login");
        assert_eq!(login_redirect("/auth/login", "//evil.test/"), "/auth/login");
        assert_eq!(login_redirect("/auth/login", "/auth/login"), "/auth/login");
    }
}
