//! Per-request API access and auth rejections.
//!
//! [`ApiSession`] binds the request's credential cookies to the shared API
//! client. Handlers use its gateway for every authenticated call and its
//! event bus for anything the page should react to; the events become the
//! response's `HX-Trigger` header.

use std::sync::Arc;

use agrihcm_client::credentials::clear_tokens;
use agrihcm_client::{
    Audience, CouponService, EventBus, Gateway, OrderService, SessionEvent, SessionService,
    login_redirect,
};
use axum::{
    Json,
    extract::{FromRequestParts, OriginalUri},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, request::Parts},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};
use serde_json::json;
use tokio::sync::broadcast;
use tower_cookies::Cookies;
use url::Url;

use crate::credentials::CookieJarStore;
use crate::error::AppError;
use crate::middleware::request_id::{REQUEST_ID_HEADER, RequestId};
use crate::middleware::session_guard::GuardPolicy;
use crate::state::AppState;

/// Response header listing client-side events for htmx.
pub const HX_TRIGGER: &str = "hx-trigger";

/// Header htmx sends with the URL of the page making the request.
const HX_CURRENT_URL: &str = "hx-current-url";

/// Whether `path` is a JSON endpoint rather than a page.
#[must_use]
pub fn is_api_path(path: &str) -> bool {
    path.split('/').any(|segment| segment == "api")
}

/// Error returned when a session is required but missing.
pub enum AuthRejection {
    /// Redirect to the login page (for page requests).
    RedirectToLogin(String),
    /// Unauthorized response carrying the login URL (for API requests).
    Unauthorized(String),
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::RedirectToLogin(login_url) => Redirect::to(&login_url).into_response(),
            Self::Unauthorized(login_url) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "detail": "Please log in to continue.",
                    "login_url": login_url,
                })),
            )
                .into_response(),
        }
    }
}

/// Extractor giving a handler authenticated API access for this request.
///
/// Paths under a protected prefix get the admin audience (and the shorter
/// admin access cookie on refresh); everything else is a customer.
pub struct ApiSession {
    gateway: Gateway,
    events: EventBus,
    received: broadcast::Receiver<SessionEvent>,
    login_url: String,
}

impl FromRequestParts<AppState> for ApiSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookies = Cookies::from_request_parts(parts, state)
            .await
            .map_err(|(_, message)| AppError::Internal(message.to_string()))?;

        let path = request_uri(parts).path();
        let prefix = state.guard().protected_prefix(path);
        let audience = if prefix.is_some() {
            Audience::Admin
        } else {
            Audience::Customer
        };
        let login_path = prefix.map_or_else(
            || state.config().login_path.clone(),
            GuardPolicy::login_path,
        );
        let login_url = login_redirect(&login_path, &origin(parts));

        let mut headers = HeaderMap::new();
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .and_then(|RequestId(id)| HeaderValue::from_str(id).ok());
        if let Some(value) = request_id {
            headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }

        let gateway = state
            .api()
            .gateway(Arc::new(CookieJarStore::new(cookies)), audience)
            .with_headers(headers);
        let events = EventBus::new();
        let received = events.subscribe();

        Ok(Self {
            gateway,
            events,
            received,
            login_url,
        })
    }
}

impl ApiSession {
    #[must_use]
    pub const fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Where to send the user to log in, returning to the current page.
    #[must_use]
    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    #[must_use]
    pub fn sessions(&self) -> SessionService {
        SessionService::new(self.gateway.clone(), self.events.clone())
    }

    #[must_use]
    pub fn orders(&self) -> OrderService {
        OrderService::new(self.gateway.clone())
    }

    #[must_use]
    pub fn coupons(&self) -> CouponService {
        CouponService::new(self.gateway.clone())
    }

    /// Drop the stored credentials after the API refused them for good.
    pub fn expire(&self) {
        if self.gateway.has_credential() {
            clear_tokens(self.gateway.store().as_ref());
            self.events.emit(SessionEvent::LoggedOut);
        }
    }

    /// Convert a failure into an `AppError`.
    ///
    /// An unauthorized failure means the refresh path is exhausted: the
    /// session is expired and the error carries the login URL.
    pub fn error(&self, error: impl Into<AppError>) -> AppError {
        let error = error.into();
        if error.is_unauthorized() {
            self.expire();
            return AppError::Unauthorized {
                login_url: Some(self.login_url.clone()),
            };
        }
        error
    }

    /// Attach the events emitted during this request as `HX-Trigger`.
    pub fn respond(mut self, body: impl IntoResponse) -> Response {
        let mut names: Vec<&'static str> = Vec::new();
        while let Ok(event) = self.received.try_recv() {
            let name = event.trigger_name();
            if !names.contains(&name) {
                names.push(name);
            }
        }

        if names.is_empty() {
            body.into_response()
        } else {
            (AppendHeaders([(HX_TRIGGER, names.join(", "))]), body).into_response()
        }
    }
}

/// The full request URI; nested routers only see their own suffix in `parts.uri`.
fn request_uri(parts: &Parts) -> &Uri {
    parts
        .extensions
        .get::<OriginalUri>()
        .map_or(&parts.uri, |original| &original.0)
}

/// The page the user was on: htmx's current URL, then the referer, then
/// the request itself when it is a page rather than an API call.
fn origin(parts: &Parts) -> String {
    let page = [HX_CURRENT_URL, "referer"]
        .into_iter()
        .filter_map(|name| parts.headers.get(name)?.to_str().ok())
        .find_map(|value| Url::parse(value).ok());

    if let Some(url) = page {
        return match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };
    }

    let uri = request_uri(parts);
    if is_api_path(uri.path()) {
        "/".to_string()
    } else {
        uri.path_and_query()
            .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_is_api_path() {
        assert!(is_api_path("/api/cart"));
        assert!(is_api_path("/agrihcmAdmin/api/orders"));
        assert!(!is_api_path("/agrihcmAdmin/orders"));
        assert!(!is_api_path("/apiary"));
    }

    #[test]
    fn test_origin_prefers_htmx_current_url() {
        let parts = parts(
            "/api/cart/add",
            &[
                ("HX-Current-URL", "http://localhost:3000/products/rice?tab=2"),
                ("referer", "http://localhost:3000/other"),
            ],
        );
        assert_eq!(origin(&parts), "/products/rice?tab=2");
    }

    #[test]
    fn test_origin_falls_back_to_page_path() {
        assert_eq!(origin(&parts("/checkout?step=2", &[])), "/checkout?step=2");
        assert_eq!(origin(&parts("/api/cart", &[])), "/");
    }

    #[test]
    fn test_unauthorized_rejection_is_json() {
        let response = AuthRejection::Unauthorized("/agrihcmAdmin/login".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response =
            AuthRejection::RedirectToLogin("/agrihcmAdmin/login".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }
}
