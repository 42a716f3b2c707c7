//! AgriHCM storefront library.
//!
//! The storefront keeps the user's credential pair in cookies, guards the
//! admin console, and proxies cart, checkout and order calls to the REST
//! API. It is a library so the router can be exercised in tests without
//! binding a socket.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod credentials;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};
use tower_cookies::CookieManagerLayer;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::middleware::{request_id_middleware, session_guard};
use crate::state::AppState;

/// Build the storefront router with its middleware stack.
///
/// Sentry layers are left to the binary so tests run without a client.
pub fn app(state: AppState) -> Router {
    let protected_prefixes = state.config().protected_prefixes.clone();

    Router::new()
        .route("/health", get(health))
        .merge(routes::routes(&protected_prefixes))
        .layer(from_fn_with_state(state.clone(), session_guard))
        .layer(CookieManagerLayer::new())
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check the API.
async fn health() -> &'static str {
    "ok"
}
