//! Authentication route handlers.
//!
//! Login stores the token pair as `HttpOnly` cookies and answers with the
//! user; the page is told to follow `next` through `HX-Redirect`. Logout
//! always clears the cookies, even if the API call fails.

use std::collections::BTreeMap;

use agrihcm_client::Audience;
use agrihcm_core::User;
use axum::{
    Form, Json,
    extract::{OriginalUri, State},
    response::{AppendHeaders, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{AppError, Result, clear_sentry_user, set_sentry_user};
use crate::middleware::{ApiSession, GuardPolicy};
use crate::routes::HX_REDIRECT;
use crate::state::AppState;

/// Login form data. No `Debug`: it carries the password.
#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    /// Where to go after logging in.
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Serialize)]
struct LoginResponse {
    user: Option<User>,
    next: String,
}

/// Customer login.
#[instrument(skip(session, form), fields(username = %form.username))]
pub async fn login(session: ApiSession, Form(form): Form<LoginForm>) -> Result<Response> {
    validate(&form)?;
    let password = SecretString::from(form.password);

    let user = session
        .sessions()
        .login(&form.username, &password)
        .await
        .map_err(|e| session.error(e))?;

    Ok(logged_in(session, user, safe_next(form.next.as_deref(), "/")))
}

/// Admin console login.
#[instrument(skip(state, session, uri, form), fields(username = %form.username))]
pub async fn admin_login(
    State(state): State<AppState>,
    session: ApiSession,
    OriginalUri(uri): OriginalUri,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    validate(&form)?;
    let password = SecretString::from(form.password);

    let user = session
        .sessions()
        .admin_login(&form.username, &password)
        .await
        .map_err(|e| session.error(e))?;

    let home = state
        .guard()
        .protected_prefix(uri.path())
        .unwrap_or("/")
        .to_string();
    Ok(logged_in(session, user, safe_next(form.next.as_deref(), &home)))
}

/// Logout. Customers land on the home page, admins on their login page.
#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    session: ApiSession,
    OriginalUri(uri): OriginalUri,
) -> Response {
    session.sessions().logout().await;
    clear_sentry_user();

    let target = match session.gateway().audience() {
        Audience::Admin => state
            .guard()
            .protected_prefix(uri.path())
            .map_or_else(|| "/".to_string(), GuardPolicy::login_path),
        Audience::Customer => "/".to_string(),
    };

    session.respond((
        AppendHeaders([(HX_REDIRECT, target)]),
        Json(serde_json::json!({ "logged_out": true })),
    ))
}

/// The current user, or 401 with a login URL.
#[instrument(skip_all)]
pub async fn session(session: ApiSession) -> Result<Response> {
    let user = session
        .sessions()
        .check_session()
        .await
        .map_err(|e| session.error(e))?;

    match user {
        Some(user) => {
            set_sentry_user(&user.id, Some(&user.email));
            Ok(session.respond(Json(user)))
        }
        None => Err(session.error(agrihcm_client::ApiError::Unauthorized)),
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn logged_in(session: ApiSession, user: Option<User>, next: String) -> Response {
    if let Some(user) = &user {
        set_sentry_user(&user.id, Some(&user.email));
    }
    session.respond((
        AppendHeaders([(HX_REDIRECT, next.clone())]),
        Json(LoginResponse { user, next }),
    ))
}

fn validate(form: &LoginForm) -> Result<()> {
    let mut errors = BTreeMap::new();
    if form.username.trim().is_empty() {
        errors.insert("username".to_string(), "Please enter your username.".to_string());
    }
    if form.password.is_empty() {
        errors.insert("password".to_string(), "Please enter your password.".to_string());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Invalid(errors))
    }
}

/// Same-site paths only; anything else falls back to `default`.
fn safe_next(next: Option<&str>, default: &str) -> String {
    next.filter(|n| n.starts_with('/') && !n.starts_with("//") && !n.contains('\\'))
        .unwrap_or(default)
        .to_string()
}
