//! Storefront routes, session guard and cookie handling, driven through the
//! full middleware stack against the fake API.

use agrihcm_core::{ACCESS_TOKEN_COOKIE, Cart, REFRESH_TOKEN_COOKIE, TokenPair, User};
use agrihcm_integration_tests::{
    ADMIN_ID, ADMIN_PASSWORD, ADMIN_USERNAME, CUSTOMER_ID, CUSTOMER_PASSWORD, CUSTOMER_USERNAME,
    FakeApi, RICE,
};
use agrihcm_storefront::{app, config::StorefrontConfig, state::AppState};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::Response,
};
use serde_json::Value;
use tower::ServiceExt;
use url::Url;

// =============================================================================
// Helpers
// =============================================================================

fn storefront(api: &FakeApi) -> Router {
    let base = Url::parse("http://shop.test/").unwrap();
    let state = AppState::new(StorefrontConfig::new(base, api.client_config())).unwrap();
    app(state)
}

fn cookie_header(pair: &TokenPair) -> String {
    format!(
        "{ACCESS_TOKEN_COOKIE}={}; {REFRESH_TOKEN_COOKIE}={}",
        pair.access,
        pair.refresh.as_deref().unwrap_or_default()
    )
}

fn get(path: &str) -> axum::http::request::Builder {
    Request::builder().method(Method::GET).uri(path)
}

fn form(path: &str, body: &str) -> Request<Body> {
    form_with(path, body, &[])
}

fn form_with(path: &str, body: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    request.body(Body::from(body.to_string())).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Value of the `Set-Cookie` for `name`, if the response sets one.
fn set_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            let (key, rest) = cookie.split_once('=')?;
            (key == name).then(|| rest.split(';').next().unwrap_or_default().to_string())
        })
}

fn cookies_cleared(headers: &HeaderMap) -> bool {
    set_cookie(headers, ACCESS_TOKEN_COOKIE).as_deref() == Some("")
        && set_cookie(headers, REFRESH_TOKEN_COOKIE).as_deref() == Some("")
}

// =============================================================================
// Ambient
// =============================================================================

#[tokio::test]
async fn test_health_carries_request_id() {
    let api = FakeApi::start().await;
    let router = storefront(&api);

    let response = send(&router, get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_value(response.headers(), "x-request-id").is_some());

    let response = send(
        &router,
        get("/health")
            .header("x-request-id", "edge-123")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(header_value(response.headers(), "x-request-id"), Some("edge-123"));
}

#[tokio::test]
async fn test_request_id_is_forwarded_to_api() {
    let api = FakeApi::start().await;
    let pair = api.issue_tokens(CUSTOMER_ID);
    let router = storefront(&api);

    let response = send(
        &router,
        form_with(
            "/api/cart/add",
            &format!("product_id={RICE}"),
            &[("cookie", &cookie_header(&pair)), ("x-request-id", "req-7")],
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let seen = api.seen();
    let add = seen.iter().find(|r| r.path == "/api/cart/add/").unwrap();
    assert_eq!(add.request_id.as_deref(), Some("req-7"));
}

// =============================================================================
// Session guard
// =============================================================================

#[tokio::test]
async fn test_guard_redirects_pages_to_login() {
    let api = FakeApi::start().await;
    let router = storefront(&api);

    let response = send(&router, get("/agrihcmAdmin").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        header_value(response.headers(), "location"),
        Some("/agrihcmAdmin/login?next=%2FagrihcmAdmin")
    );
    assert!(cookies_cleared(response.headers()));
    assert!(api.seen().is_empty());
}

#[tokio::test]
async fn test_guard_answers_api_calls_with_401() {
    let api = FakeApi::start().await;
    let router = storefront(&api);

    let response = send(
        &router,
        get("/agrihcmAdmin/api/orders?status=PENDING")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json(response).await;
    assert_eq!(
        body["login_url"],
        "/agrihcmAdmin/login?next=%2FagrihcmAdmin%2Fapi%2Forders%3Fstatus%3DPENDING"
    );
}

#[tokio::test]
async fn test_access_token_alone_is_not_a_session() {
    let api = FakeApi::start().await;
    let pair = api.issue_tokens(ADMIN_ID);
    let router = storefront(&api);

    let response = send(
        &router,
        get("/agrihcmAdmin")
            .header("cookie", format!("{ACCESS_TOKEN_COOKIE}={}", pair.access))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(cookies_cleared(response.headers()));
}

#[tokio::test]
async fn test_guard_passes_valid_session() {
    let api = FakeApi::start().await;
    let pair = api.issue_tokens(ADMIN_ID);
    let router = storefront(&api);

    let response = send(
        &router,
        get("/agrihcmAdmin")
            .header("cookie", cookie_header(&pair))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(set_cookie(response.headers(), ACCESS_TOKEN_COOKIE), None);
    let user: User = serde_json::from_value(json(response).await).unwrap();
    assert_eq!(user.id, ADMIN_ID);
    assert_eq!(api.refresh_calls(), 0);
}

#[tokio::test]
async fn test_guard_refreshes_stale_access_token() {
    let api = FakeApi::start().await;
    // Inside the expiry margin: still accepted upstream, but stale here
    let pair = api.issue_tokens_expiring_in(ADMIN_ID, 30);
    let router = storefront(&api);

    let response = send(
        &router,
        get("/agrihcmAdmin")
            .header("cookie", cookie_header(&pair))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(api.refresh_calls(), 1);
    let refreshed = set_cookie(response.headers(), ACCESS_TOKEN_COOKIE).unwrap();
    assert_ne!(refreshed, pair.access);
    assert!(api.accepts(&refreshed));

    // The handler's own API call already used the new token
    let me = api
        .seen()
        .into_iter()
        .find(|r| r.path == "/api/users/me/")
        .unwrap();
    assert_eq!(me.authorization, Some(format!("Bearer {refreshed}")));
}

#[tokio::test]
async fn test_guard_logs_out_when_refresh_fails() {
    let api = FakeApi::start().await;
    let pair = api.issue_tokens_expiring_in(ADMIN_ID, -10);
    api.revoke_refresh_tokens();
    let router = storefront(&api);

    let response = send(
        &router,
        get("/agrihcmAdmin/api/orders")
            .header("cookie", cookie_header(&pair))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(cookies_cleared(response.headers()));
    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(api.requests("GET", "/api/admin/orders/"), 0);
}

#[tokio::test]
async fn test_guard_only_covers_segment_prefixes() {
    let api = FakeApi::start().await;
    let router = storefront(&api);

    let response = send(
        &router,
        get("/agrihcmAdministration").body(Body::empty()).unwrap(),
    )
    .await;

    // Not under the prefix: no redirect, just an unknown route
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_customer_session_is_forbidden_in_admin_api() {
    let api = FakeApi::start().await;
    let pair = api.issue_tokens(CUSTOMER_ID);
    let router = storefront(&api);

    let response = send(
        &router,
        get("/agrihcmAdmin/api/orders")
            .header("cookie", cookie_header(&pair))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    // Still logged in as a customer
    assert_eq!(set_cookie(response.headers(), ACCESS_TOKEN_COOKIE), None);
}

// =============================================================================
// Auth
// =============================================================================

#[tokio::test]
async fn test_admin_login_sets_cookies_and_redirects_home() {
    let api = FakeApi::start().await;
    let router = storefront(&api);

    let response = send(
        &router,
        form(
            "/agrihcmAdmin/login",
            &format!("username={ADMIN_USERNAME}&password={ADMIN_PASSWORD}"),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(header_value(&headers, "hx-redirect"), Some("/agrihcmAdmin"));
    assert_eq!(header_value(&headers, "hx-trigger"), Some("user-logged-in"));
    let access = set_cookie(&headers, ACCESS_TOKEN_COOKIE).unwrap();
    let refresh = set_cookie(&headers, REFRESH_TOKEN_COOKIE).unwrap();
    assert!(api.accepts(&access));
    assert!(api.accepts_refresh(&refresh));

    let body = json(response).await;
    assert_eq!(body["user"]["username"], ADMIN_USERNAME);
}

#[tokio::test]
async fn test_customer_login_follows_next() {
    let api = FakeApi::start().await;
    let router = storefront(&api);

    let response = send(
        &router,
        form(
            "/auth/login",
            &format!(
                "username={CUSTOMER_USERNAME}&password={CUSTOMER_PASSWORD}&next=%2Fcheckout"
            ),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_value(response.headers(), "hx-redirect"), Some("/checkout"));
    assert!(set_cookie(response.headers(), ACCESS_TOKEN_COOKIE).is_some());
}

#[tokio::test]
async fn test_login_refuses_off_site_next() {
    let api = FakeApi::start().await;
    let router = storefront(&api);

    let response = send(
        &router,
        form(
            "/auth/login",
            &format!(
                "username={CUSTOMER_USERNAME}&password={CUSTOMER_PASSWORD}&next=https%3A%2F%2Fevil.test"
            ),
        ),
    )
    .await;

    assert_eq!(header_value(response.headers(), "hx-redirect"), Some("/"));
}

#[tokio::test]
async fn test_wrong_password_is_401_with_api_message() {
    let api = FakeApi::start().await;
    let router = storefront(&api);

    let response = send(
        &router,
        form("/auth/login", &format!("username={CUSTOMER_USERNAME}&password=nope")),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(set_cookie(response.headers(), ACCESS_TOKEN_COOKIE), None);
    let body = json(response).await;
    assert_eq!(body["detail"], "No active account found with the given credentials");
}

#[tokio::test]
async fn test_blank_login_sends_nothing() {
    let api = FakeApi::start().await;
    let router = storefront(&api);

    let response = send(&router, form("/auth/login", "username=&password=")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json(response).await;
    assert!(body["fields"]["username"].is_string());
    assert!(body["fields"]["password"].is_string());
    assert!(api.seen().is_empty());
}

#[tokio::test]
async fn test_logout_clears_cookies() {
    let api = FakeApi::start().await;
    let pair = api.issue_tokens(CUSTOMER_ID);
    let router = storefront(&api);

    let response = send(
        &router,
        form_with("/auth/logout", "", &[("cookie", &cookie_header(&pair))]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(cookies_cleared(response.headers()));
    assert_eq!(header_value(response.headers(), "hx-redirect"), Some("/"));
    assert_eq!(header_value(response.headers(), "hx-trigger"), Some("user-logged-out"));
    assert_eq!(api.requests("POST", "/api/logout/"), 1);
    assert!(!api.accepts_refresh(pair.refresh.as_deref().unwrap()));
}

#[tokio::test]
async fn test_admin_logout_returns_to_admin_login() {
    let api = FakeApi::start().await;
    let pair = api.issue_tokens(ADMIN_ID);
    let router = storefront(&api);

    let response = send(
        &router,
        form_with("/agrihcmAdmin/logout", "", &[("cookie", &cookie_header(&pair))]),
    )
    .await;

    assert_eq!(
        header_value(response.headers(), "hx-redirect"),
        Some("/agrihcmAdmin/login")
    );
    assert!(cookies_cleared(response.headers()));
}

#[tokio::test]
async fn test_session_check_returns_to_current_page() {
    let api = FakeApi::start().await;
    let router = storefront(&api);

    let response = send(
        &router,
        get("/auth/session")
            .header("hx-current-url", "http://shop.test/checkout")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json(response).await;
    assert_eq!(body["login_url"], "/auth/login?next=%2Fcheckout");
}

// =============================================================================
// Cart and checkout
// =============================================================================

#[tokio::test]
async fn test_cart_add_triggers_cart_updated() {
    let api = FakeApi::start().await;
    let pair = api.issue_tokens(CUSTOMER_ID);
    let router = storefront(&api);

    let response = send(
        &router,
        form_with(
            "/api/cart/add",
            &format!("product_id={RICE}&quantity=2"),
            &[("cookie", &cookie_header(&pair))],
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_value(response.headers(), "hx-trigger"), Some("cart-updated"));
    let cart: Cart = serde_json::from_value(json(response).await).unwrap();
    assert_eq!(cart.total_items, 2);
    assert_eq!(cart, api.server_cart(CUSTOMER_ID));
}

#[tokio::test]
async fn test_logged_out_cart_is_empty() {
    let api = FakeApi::start().await;
    let router = storefront(&api);

    let response = send(&router, get("/api/cart").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let cart: Cart = serde_json::from_value(json(response).await).unwrap();
    assert!(cart.is_empty());
    assert!(api.seen().is_empty());
}

#[tokio::test]
async fn test_expired_session_on_cart_change_points_to_login() {
    let api = FakeApi::start().await;
    let pair = api.issue_tokens(CUSTOMER_ID);
    api.expire_access_tokens();
    api.revoke_refresh_tokens();
    let router = storefront(&api);

    let response = send(
        &router,
        form_with(
            "/api/cart/add",
            &format!("product_id={RICE}"),
            &[
                ("cookie", &cookie_header(&pair)),
                ("hx-current-url", "http://shop.test/products/rice?ref=home"),
            ],
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(cookies_cleared(response.headers()));
    let body = json(response).await;
    assert_eq!(
        body["login_url"],
        "/auth/login?next=%2Fproducts%2Frice%3Fref%3Dhome"
    );
}

#[tokio::test]
async fn test_checkout_redirects_to_confirmation() {
    let api = FakeApi::start().await;
    api.seed_cart(CUSTOMER_ID, &[(RICE, 1)]);
    let pair = api.issue_tokens(CUSTOMER_ID);
    let router = storefront(&api);

    let response = send(
        &router,
        form_with(
            "/api/checkout",
            "customer_name=Lan+Tran&customer_phone=0901+234+567\
             &customer_address=12+Nguyen+Hue%2C+District+1",
            &[("cookie", &cookie_header(&pair))],
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header_value(response.headers(), "hx-redirect"),
        Some("/about/confirmed")
    );
    assert_eq!(
        header_value(response.headers(), "hx-trigger"),
        Some("close-cart-sheet, cart-updated")
    );
    let body = json(response).await;
    assert_eq!(body["status"], "PENDING");
    assert!(api.server_cart(CUSTOMER_ID).is_empty());
}

#[tokio::test]
async fn test_invalid_checkout_reports_fields() {
    let api = FakeApi::start().await;
    api.seed_cart(CUSTOMER_ID, &[(RICE, 1)]);
    let pair = api.issue_tokens(CUSTOMER_ID);
    let router = storefront(&api);

    let response = send(
        &router,
        form_with(
            "/api/checkout",
            "customer_name=&customer_phone=0901234567&customer_address=",
            &[("cookie", &cookie_header(&pair))],
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(header_value(response.headers(), "hx-redirect"), None);
    let body = json(response).await;
    assert!(body["fields"]["customer_name"].is_string());
    assert!(body["fields"]["customer_address"].is_string());
    // Nothing is fetched for a form that cannot be submitted
    assert!(api.seen().is_empty());
}
