//! Integration tests for AgriHCM.
//!
//! The tests run the client library and the storefront router against
//! [`FakeApi`], an in-process stand-in for the AgriHCM REST API bound to an
//! ephemeral local port. It implements the endpoints the storefront calls
//! and exposes knobs the tests need: expiring access tokens, revoking or
//! rotating refresh tokens, slowing individual responses, and counting
//! requests.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p agrihcm-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use agrihcm_client::{
    ApiClient, Audience, ClientConfig, ClientCredentialStore, Gateway, credentials::persist_tokens,
};
use agrihcm_core::{
    CancelReason, Cart, CartId, CartItem, CartItemId, CartProduct, CartSummary, Coupon, Order,
    OrderId, OrderItem, OrderItemId, OrderStatus, PaymentMethod, ProductId, RejectReason,
    TokenPair, User, UserId,
};
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::{Next, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use url::Url;

// =============================================================================
// Fixtures
// =============================================================================

pub const CUSTOMER_ID: UserId = UserId::new(1);
pub const CUSTOMER_USERNAME: &str = "lan";
pub const CUSTOMER_PASSWORD: &str = "rice-paddy-42";

pub const ADMIN_ID: UserId = UserId::new(2);
pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "console-pass";

/// 120,000 each, 10 in stock.
pub const RICE: ProductId = ProductId::new(1);
/// 45,000 each, 3 in stock.
pub const DRAGON_FRUIT: ProductId = ProductId::new(2);
/// 250,000 each, sold out.
pub const COFFEE: ProductId = ProductId::new(3);

/// Lifetime of access tokens the fake issues.
pub const ACCESS_LIFETIME_SECS: i64 = 3_600;

const REFRESH_LIFETIME_SECS: i64 = 7 * 24 * 3_600;

static TOKEN_SEQ: AtomicU64 = AtomicU64::new(1);

/// A JWT-shaped token expiring `expires_in_secs` from now. Every call
/// returns a distinct token.
#[must_use]
pub fn mint_token(expires_in_secs: i64) -> String {
    let exp = Utc::now().timestamp() + expires_in_secs;
    let jti = TOKEN_SEQ.fetch_add(1, Ordering::Relaxed);
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD
        .encode(format!(r#"{{"exp":{exp},"token_type":"access","jti":{jti}}}"#));
    format!("{header}.{payload}.test-signature")
}

fn user(id: UserId) -> User {
    let admin = id == ADMIN_ID;
    User {
        id,
        username: if admin { ADMIN_USERNAME } else { CUSTOMER_USERNAME }.to_string(),
        email: if admin {
            "admin@agrihcm.vn"
        } else {
            "lan@example.vn"
        }
        .to_string(),
        first_name: Some(if admin { "Minh" } else { "Lan" }.to_string()),
        last_name: Some(if admin { "Pham" } else { "Tran" }.to_string()),
        avatar: None,
        phone_number: None,
        address: None,
        date_joined: None,
        is_superuser: admin,
    }
}

fn product(id: ProductId) -> Option<CartProduct> {
    let (slug, name, price) = match id {
        RICE => ("organic-rice-5kg", "Organic rice 5kg", 120_000),
        DRAGON_FRUIT => ("dragon-fruit", "Dragon fruit", 45_000),
        COFFEE => ("robusta-beans", "Robusta beans 1kg", 250_000),
        _ => return None,
    };
    Some(CartProduct {
        id,
        slug: slug.to_string(),
        name: name.to_string(),
        price: Decimal::from(price),
        image: None,
        is_in_stock: true,
        stock_quantity: 0,
    })
}

// =============================================================================
// Server State
// =============================================================================

/// A request the fake received.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub request_id: Option<String>,
}

struct World {
    access: HashMap<String, UserId>,
    refresh: HashMap<String, UserId>,
    rotate_refresh: bool,
    carts: HashMap<UserId, Vec<(ProductId, u32)>>,
    stock: HashMap<ProductId, i64>,
    orders: Vec<(UserId, Order)>,
    coupons: HashMap<String, Coupon>,
    product_delays: HashMap<ProductId, Duration>,
    product_stalls: HashMap<ProductId, Duration>,
    refresh_delay: Duration,
    order_delay: Duration,
}

impl Default for World {
    fn default() -> Self {
        Self {
            access: HashMap::new(),
            refresh: HashMap::new(),
            rotate_refresh: false,
            carts: HashMap::new(),
            stock: HashMap::from([(RICE, 10), (DRAGON_FRUIT, 3), (COFFEE, 0)]),
            orders: Vec::new(),
            coupons: HashMap::new(),
            product_delays: HashMap::new(),
            product_stalls: HashMap::new(),
            refresh_delay: Duration::ZERO,
            order_delay: Duration::ZERO,
        }
    }
}

impl World {
    fn cart(&self, user: UserId) -> Cart {
        let lines = self.carts.get(&user).map(Vec::as_slice).unwrap_or_default();
        let items: Vec<CartItem> = lines
            .iter()
            .filter_map(|&(product_id, quantity)| {
                let mut product = product(product_id)?;
                product.stock_quantity = self.stock.get(&product_id).copied().unwrap_or_default();
                product.is_in_stock = product.stock_quantity > 0;
                let subtotal = product.price * Decimal::from(quantity);
                Some(CartItem {
                    id: CartItemId::new(user.as_i64() * 100 + product_id.as_i64()),
                    product,
                    quantity,
                    subtotal,
                    pending: false,
                    created_at: None,
                })
            })
            .collect();

        Cart {
            id: Some(CartId::new(user.as_i64())),
            total_items: items.iter().map(|item| item.quantity).sum(),
            total_price: items.iter().map(|item| item.subtotal).sum(),
            items,
            updated_at: None,
        }
    }

    fn line_mut(&mut self, user: UserId, product_id: ProductId) -> Option<&mut (ProductId, u32)> {
        self.carts
            .get_mut(&user)?
            .iter_mut()
            .find(|(id, _)| *id == product_id)
    }

    fn check_stock(&self, product_id: ProductId, quantity: u32) -> Result<(), Response> {
        let available = self.stock.get(&product_id).copied().unwrap_or_default();
        if i64::from(quantity) > available {
            let name = product(product_id).map(|p| p.name).unwrap_or_default();
            return Err(error(
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("Insufficient stock for {name}. Only {available} available.") }),
            ));
        }
        Ok(())
    }

    fn order_mut(&mut self, id: OrderId) -> Option<&mut (UserId, Order)> {
        self.orders.iter_mut().find(|(_, order)| order.id == id)
    }
}

/// Shared state behind the fake's handlers.
#[derive(Default)]
pub struct ApiState {
    world: Mutex<World>,
    seen: Mutex<Vec<SeenRequest>>,
    refresh_calls: AtomicUsize,
    next_order_id: AtomicI64,
}

impl ApiState {
    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<UserId, Response> {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .and_then(|token| self.world().access.get(token).copied())
            .ok_or_else(|| {
                error(
                    StatusCode::UNAUTHORIZED,
                    json!({
                        "detail": "Given token not valid for any token type",
                        "code": "token_not_valid",
                    }),
                )
            })
    }

    fn authorize_admin(&self, headers: &HeaderMap) -> Result<UserId, Response> {
        let id = self.authorize(headers)?;
        if id == ADMIN_ID {
            Ok(id)
        } else {
            Err(error(
                StatusCode::FORBIDDEN,
                json!({ "detail": "You do not have permission to perform this action." }),
            ))
        }
    }

    fn issue(&self, user: UserId, access_expires_in: i64) -> TokenPair {
        let access = mint_token(access_expires_in);
        let refresh = mint_token(REFRESH_LIFETIME_SECS);
        let mut world = self.world();
        world.access.insert(access.clone(), user);
        world.refresh.insert(refresh.clone(), user);
        TokenPair {
            access,
            refresh: Some(refresh),
        }
    }
}

fn error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

// =============================================================================
// Fake API
// =============================================================================

/// The fake REST API. The server stops when this is dropped.
pub struct FakeApi {
    base: Url,
    state: Arc<ApiState>,
    server: JoinHandle<()>,
}

impl Drop for FakeApi {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl FakeApi {
    /// Bind to an ephemeral port and start serving.
    pub async fn start() -> Self {
        let state = Arc::new(ApiState::default());
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .expect("Failed to bind fake API");
        let addr = listener.local_addr().expect("Fake API has no address");
        let app = router(Arc::clone(&state));

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Fake API failed");
        });

        Self {
            base: Url::parse(&format!("http://{addr}/")).expect("Fake API URL is valid"),
            state,
            server,
        }
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.base
    }

    /// Client configuration pointing at this fake.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.base.clone())
    }

    /// A fresh API client. Gateways that must share refreshes have to share
    /// one client.
    #[must_use]
    pub fn api_client(&self) -> ApiClient {
        ApiClient::new(self.client_config()).expect("Fake API URL is a valid base")
    }

    /// Issue a token pair the fake accepts.
    #[must_use]
    pub fn issue_tokens(&self, user: UserId) -> TokenPair {
        self.state.issue(user, ACCESS_LIFETIME_SECS)
    }

    /// Issue a pair whose access token expires in `secs` (negative for
    /// already expired). The fake still accepts it until told otherwise.
    #[must_use]
    pub fn issue_tokens_expiring_in(&self, user: UserId, secs: i64) -> TokenPair {
        self.state.issue(user, secs)
    }

    /// A gateway for `user` on `api`, with a freshly issued pair stored.
    #[must_use]
    pub fn sign_in(&self, api: &ApiClient, user: UserId, audience: Audience) -> Gateway {
        let pair = self.issue_tokens(user);
        let gateway = self.anonymous(api, audience);
        persist_tokens(
            gateway.store().as_ref(),
            &pair,
            &api.cookie_policy(audience),
        );
        gateway
    }

    /// A gateway with an empty credential store.
    #[must_use]
    pub fn anonymous(&self, api: &ApiClient, audience: Audience) -> Gateway {
        api.gateway(
            Arc::new(ClientCredentialStore::new(self.base.clone())),
            audience,
        )
    }

    /// Stop accepting every access token issued so far.
    pub fn expire_access_tokens(&self) {
        self.state.world().access.clear();
    }

    /// Stop accepting every refresh token issued so far.
    pub fn revoke_refresh_tokens(&self) {
        self.state.world().refresh.clear();
    }

    /// Whether the fake currently accepts `access`.
    #[must_use]
    pub fn accepts(&self, access: &str) -> bool {
        self.state.world().access.contains_key(access)
    }

    /// Whether the fake currently accepts `refresh` for a token exchange.
    #[must_use]
    pub fn accepts_refresh(&self, refresh: &str) -> bool {
        self.state.world().refresh.contains_key(refresh)
    }

    /// Issue a new refresh token on every exchange and blacklist the old one.
    pub fn rotate_refresh_tokens(&self, rotate: bool) {
        self.state.world().rotate_refresh = rotate;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state.world().refresh_delay = delay;
    }

    /// Hold cart mutations on `product_id` for `delay` after applying them,
    /// so their response arrives late with the cart as it was then.
    pub fn slow_down(&self, product_id: ProductId, delay: Duration) {
        self.state.world().product_delays.insert(product_id, delay);
    }

    /// Hold cart mutations on `product_id` for `delay` before applying them,
    /// so requests sent later reach the server's cart first.
    pub fn stall(&self, product_id: ProductId, delay: Duration) {
        self.state.world().product_stalls.insert(product_id, delay);
    }

    /// Hold order creation responses for `delay`.
    pub fn set_order_delay(&self, delay: Duration) {
        self.state.world().order_delay = delay;
    }

    pub fn set_stock(&self, product_id: ProductId, stock: i64) {
        self.state.world().stock.insert(product_id, stock);
    }

    /// Replace `user`'s server cart.
    pub fn seed_cart(&self, user: UserId, lines: &[(ProductId, u32)]) {
        self.state.world().carts.insert(user, lines.to_vec());
    }

    /// `user`'s server cart.
    #[must_use]
    pub fn server_cart(&self, user: UserId) -> Cart {
        self.state.world().cart(user)
    }

    pub fn add_coupon(&self, coupon: Coupon) {
        self.state
            .world()
            .coupons
            .insert(coupon.code.to_uppercase(), coupon);
    }

    /// Create an order for `user` directly in the given status.
    #[must_use]
    pub fn seed_order(&self, user: UserId, status: OrderStatus) -> OrderId {
        let id = self.next_order_id();
        let order = Order {
            id,
            status,
            customer_name: "Lan Tran".to_string(),
            customer_phone: "0901234567".to_string(),
            customer_email: None,
            customer_address: "12 Nguyen Hue, District 1".to_string(),
            payment_method: PaymentMethod::CashOnDelivery,
            subtotal_amount: Decimal::from(120_000),
            discount_amount: Decimal::ZERO,
            final_amount: Decimal::from(120_000),
            items: vec![OrderItem {
                id: OrderItemId::new(id.as_i64() * 10),
                product: RICE,
                product_name: "Organic rice 5kg".to_string(),
                quantity: 1,
                price_at_order: Decimal::from(120_000),
                line_total: Decimal::from(120_000),
            }],
            cancel_reason: None,
            reject_reason: None,
            created_at: Utc::now(),
        };
        self.state.world().orders.push((user, order));
        id
    }

    /// An order as the server holds it.
    #[must_use]
    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.state
            .world()
            .orders
            .iter()
            .find(|(_, order)| order.id == id)
            .map(|(_, order)| order.clone())
    }

    /// Number of token exchanges the fake has served.
    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    /// Every request received so far, oldest first.
    #[must_use]
    pub fn seen(&self) -> Vec<SeenRequest> {
        self.state
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many `method path` requests have been received.
    #[must_use]
    pub fn requests(&self, method: &str, path: &str) -> usize {
        self.seen()
            .iter()
            .filter(|seen| seen.method == method && seen.path == path)
            .count()
    }

    fn next_order_id(&self) -> OrderId {
        OrderId::new(self.state.next_order_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

// =============================================================================
// Routes
// =============================================================================

type Shared = Arc<ApiState>;

fn router(state: Shared) -> Router {
    Router::new()
        // Auth
        .route("/api/login/", post(login))
        .route("/api/agrihcmAdmin/login/", post(admin_login))
        .route("/api/logout/", post(logout))
        .route("/api/token/refresh/", post(refresh))
        .route("/api/users/me/", get(me))
        // Cart
        .route("/api/cart/", get(cart))
        .route("/api/cart/summary/", get(cart_summary))
        .route("/api/cart/add/", post(cart_add))
        .route("/api/cart/update/", post(cart_update))
        .route("/api/cart/remove/", post(cart_remove))
        .route("/api/cart/clear/", post(cart_clear))
        // Orders
        .route("/api/orders/", get(orders).post(create_order))
        .route("/api/orders/{id}/", get(order).patch(cancel_order))
        .route("/api/admin/orders/", get(admin_orders))
        .route(
            "/api/admin/orders/{id}/",
            get(admin_order).patch(admin_update_order),
        )
        // Coupons
        .route("/api/coupons/{code}/", get(coupon))
        .layer(from_fn_with_state(Arc::clone(&state), record))
        .with_state(state)
}

async fn record(State(state): State<Shared>, request: Request, next: Next) -> Response {
    let seen = {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(String::from)
        };
        SeenRequest {
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            authorization: header("authorization"),
            request_id: header("x-request-id"),
        }
    };
    state
        .seen
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(seen);

    next.run(request).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh: String,
}

async fn login(State(state): State<Shared>, Json(body): Json<LoginBody>) -> Response {
    login_as(&state, &body, false)
}

async fn admin_login(State(state): State<Shared>, Json(body): Json<LoginBody>) -> Response {
    login_as(&state, &body, true)
}

fn login_as(state: &ApiState, body: &LoginBody, admin_only: bool) -> Response {
    let id = match (body.username.as_str(), body.password.as_str()) {
        (CUSTOMER_USERNAME, CUSTOMER_PASSWORD) => CUSTOMER_ID,
        (ADMIN_USERNAME, ADMIN_PASSWORD) => ADMIN_ID,
        _ => {
            return error(
                StatusCode::UNAUTHORIZED,
                json!({ "detail": "No active account found with the given credentials" }),
            );
        }
    };
    if admin_only && id != ADMIN_ID {
        return error(
            StatusCode::FORBIDDEN,
            json!({ "detail": "This account cannot sign in to the admin console." }),
        );
    }

    let pair = state.issue(id, ACCESS_LIFETIME_SECS);
    Json(json!({
        "access": pair.access,
        "refresh": pair.refresh,
        "user": user(id),
    }))
    .into_response()
}

async fn logout(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<RefreshBody>,
) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    state.world().refresh.remove(&body.refresh);
    StatusCode::RESET_CONTENT.into_response()
}

async fn refresh(State(state): State<Shared>, Json(body): Json<RefreshBody>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = state.world().refresh_delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut world = state.world();
    let Some(id) = world.refresh.get(&body.refresh).copied() else {
        return error(
            StatusCode::UNAUTHORIZED,
            json!({ "detail": "Token is blacklisted", "code": "token_not_valid" }),
        );
    };

    let access = mint_token(ACCESS_LIFETIME_SECS);
    world.access.insert(access.clone(), id);
    if world.rotate_refresh {
        world.refresh.remove(&body.refresh);
        let refresh = mint_token(REFRESH_LIFETIME_SECS);
        world.refresh.insert(refresh.clone(), id);
        Json(json!({ "access": access, "refresh": refresh })).into_response()
    } else {
        Json(json!({ "access": access })).into_response()
    }
}

async fn me(State(state): State<Shared>, headers: HeaderMap) -> Response {
    match state.authorize(&headers) {
        Ok(id) => Json(user(id)).into_response(),
        Err(rejection) => rejection,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cart
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CartBody {
    product_id: ProductId,
    #[serde(default)]
    quantity: Option<u32>,
}

async fn cart(State(state): State<Shared>, headers: HeaderMap) -> Response {
    match state.authorize(&headers) {
        Ok(id) => Json(state.world().cart(id)).into_response(),
        Err(rejection) => rejection,
    }
}

async fn cart_summary(State(state): State<Shared>, headers: HeaderMap) -> Response {
    match state.authorize(&headers) {
        Ok(id) => Json::<CartSummary>(state.world().cart(id).summary()).into_response(),
        Err(rejection) => rejection,
    }
}

/// Apply a cart change, holding it before or after if the product is
/// stalled or slowed.
async fn cart_change(
    state: &ApiState,
    headers: &HeaderMap,
    product_id: ProductId,
    change: impl FnOnce(&mut World, UserId) -> Result<(), Response>,
) -> Response {
    let id = match state.authorize(headers) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    let stall = state
        .world()
        .product_stalls
        .get(&product_id)
        .copied()
        .unwrap_or_default();
    if !stall.is_zero() {
        tokio::time::sleep(stall).await;
    }

    let (result, delay) = {
        let mut world = state.world();
        let result = change(&mut *world, id).map(|()| world.cart(id));
        let delay = world
            .product_delays
            .get(&product_id)
            .copied()
            .unwrap_or_default();
        (result, delay)
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    match result {
        Ok(cart) => Json(cart).into_response(),
        Err(rejection) => rejection,
    }
}

fn not_in_cart() -> Response {
    error(StatusCode::NOT_FOUND, json!({ "error": "Item not in cart" }))
}

async fn cart_add(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<CartBody>,
) -> Response {
    let product_id = body.product_id;
    let quantity = body.quantity.unwrap_or(1);
    cart_change(&state, &headers, product_id, |world, id| {
        if product(product_id).is_none() {
            return Err(error(
                StatusCode::NOT_FOUND,
                json!({ "detail": "Product not found." }),
            ));
        }
        let current = world.line_mut(id, product_id).map_or(0, |line| line.1);
        world.check_stock(product_id, current + quantity)?;
        match world.line_mut(id, product_id) {
            Some(line) => line.1 += quantity,
            None => world.carts.entry(id).or_default().push((product_id, quantity)),
        }
        Ok(())
    })
    .await
}

async fn cart_update(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<CartBody>,
) -> Response {
    let product_id = body.product_id;
    let quantity = body.quantity.unwrap_or_default();
    cart_change(&state, &headers, product_id, |world, id| {
        if world.line_mut(id, product_id).is_none() {
            return Err(not_in_cart());
        }
        if quantity < 1 {
            return Err(error(
                StatusCode::BAD_REQUEST,
                json!({ "quantity": ["Ensure this value is greater than or equal to 1."] }),
            ));
        }
        world.check_stock(product_id, quantity)?;
        if let Some(line) = world.line_mut(id, product_id) {
            line.1 = quantity;
        }
        Ok(())
    })
    .await
}

async fn cart_remove(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<CartBody>,
) -> Response {
    let product_id = body.product_id;
    cart_change(&state, &headers, product_id, |world, id| {
        let lines = world.carts.entry(id).or_default();
        let before = lines.len();
        lines.retain(|(line, _)| *line != product_id);
        if lines.len() == before {
            return Err(not_in_cart());
        }
        Ok(())
    })
    .await
}

async fn cart_clear(State(state): State<Shared>, headers: HeaderMap) -> Response {
    match state.authorize(&headers) {
        Ok(id) => {
            state.world().carts.remove(&id);
            Json(json!({ "message": "Cart cleared" })).into_response()
        }
        Err(rejection) => rejection,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orders
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct OrderBody {
    customer_name: String,
    customer_phone: String,
    #[serde(default)]
    customer_email: Option<String>,
    customer_address: String,
    payment_method: PaymentMethod,
    #[serde(default)]
    coupon_code: Option<String>,
}

#[derive(Deserialize)]
struct CancelBody {
    cancel_reason: CancelReason,
}

#[derive(Deserialize)]
struct StatusBody {
    status: OrderStatus,
    #[serde(default)]
    reject_reason: Option<RejectReason>,
}

#[derive(Deserialize)]
struct AdminFilter {
    #[serde(default)]
    status: Option<OrderStatus>,
}

async fn create_order(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<OrderBody>,
) -> Response {
    let id = match state.authorize(&headers) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    let order_id = OrderId::new(state.next_order_id.fetch_add(1, Ordering::SeqCst) + 1);

    let (result, delay) = {
        let mut world = state.world();
        let delay = world.order_delay;
        (place(&mut *world, id, order_id, body), delay)
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    match result {
        Ok(order) => (StatusCode::CREATED, Json(order)).into_response(),
        Err(rejection) => rejection,
    }
}

fn place(world: &mut World, user: UserId, order_id: OrderId, body: OrderBody) -> Result<Order, Response> {
    let cart = world.cart(user);
    if cart.is_empty() {
        return Err(error(
            StatusCode::BAD_REQUEST,
            json!({ "detail": "Your cart is empty." }),
        ));
    }

    let coupon = match body.coupon_code.as_deref() {
        Some(code) => match world.coupons.get(&code.to_uppercase()) {
            Some(coupon) if coupon.is_active => Some(coupon.clone()),
            _ => {
                return Err(error(
                    StatusCode::BAD_REQUEST,
                    json!({ "coupon_code": ["Invalid coupon code."] }),
                ));
            }
        },
        None => None,
    };

    for item in &cart.items {
        world.check_stock(item.product_id(), item.quantity)?;
    }
    for item in &cart.items {
        if let Some(stock) = world.stock.get_mut(&item.product_id()) {
            *stock -= i64::from(item.quantity);
        }
    }

    let subtotal = cart.total_price;
    let discount = coupon
        .as_ref()
        .map_or(Decimal::ZERO, |coupon| coupon.discount_for(subtotal));
    let order = Order {
        id: order_id,
        status: OrderStatus::Pending,
        customer_name: body.customer_name,
        customer_phone: body.customer_phone,
        customer_email: body.customer_email,
        customer_address: body.customer_address,
        payment_method: body.payment_method,
        subtotal_amount: subtotal,
        discount_amount: discount,
        final_amount: subtotal - discount,
        items: cart
            .items
            .iter()
            .enumerate()
            .map(|(n, item)| OrderItem {
                id: OrderItemId::new(order_id.as_i64() * 10 + i64::try_from(n).unwrap_or_default()),
                product: item.product_id(),
                product_name: item.product.name.clone(),
                quantity: item.quantity,
                price_at_order: item.product.price,
                line_total: item.subtotal,
            })
            .collect(),
        cancel_reason: None,
        reject_reason: None,
        created_at: Utc::now(),
    };

    world.carts.remove(&user);
    world.orders.push((user, order.clone()));
    Ok(order)
}

fn order_not_found() -> Response {
    error(StatusCode::NOT_FOUND, json!({ "detail": "No Order matches the given query." }))
}

async fn orders(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let id = match state.authorize(&headers) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    let mut mine: Vec<Order> = state
        .world()
        .orders
        .iter()
        .filter(|(owner, _)| *owner == id)
        .map(|(_, order)| order.clone())
        .collect();
    mine.sort_by(|a, b| b.id.cmp(&a.id));
    Json(mine).into_response()
}

async fn order(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(order_id): Path<OrderId>,
) -> Response {
    let id = match state.authorize(&headers) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    let mut world = state.world();
    match world.order_mut(order_id) {
        Some((owner, order)) if *owner == id => Json(order.clone()).into_response(),
        _ => order_not_found(),
    }
}

async fn cancel_order(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(order_id): Path<OrderId>,
    Json(body): Json<CancelBody>,
) -> Response {
    let id = match state.authorize(&headers) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    let mut world = state.world();
    match world.order_mut(order_id) {
        Some((owner, order)) if *owner == id => {
            if order.status != OrderStatus::Pending {
                return error(
                    StatusCode::BAD_REQUEST,
                    json!({ "detail": "Only pending orders can be cancelled." }),
                );
            }
            order.status = OrderStatus::Cancelled;
            order.cancel_reason = Some(body.cancel_reason);
            Json(order.clone()).into_response()
        }
        _ => order_not_found(),
    }
}

async fn admin_orders(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(filter): Query<AdminFilter>,
) -> Response {
    if let Err(rejection) = state.authorize_admin(&headers) {
        return rejection;
    }
    let mut all: Vec<Order> = state
        .world()
        .orders
        .iter()
        .map(|(_, order)| order.clone())
        .filter(|order| filter.status.is_none_or(|status| order.status == status))
        .collect();
    all.sort_by(|a, b| b.id.cmp(&a.id));
    Json(json!({
        "count": all.len(),
        "next": null,
        "previous": null,
        "results": all,
    }))
    .into_response()
}

async fn admin_order(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(order_id): Path<OrderId>,
) -> Response {
    if let Err(rejection) = state.authorize_admin(&headers) {
        return rejection;
    }
    let mut world = state.world();
    match world.order_mut(order_id) {
        Some((_, order)) => Json(order.clone()).into_response(),
        None => order_not_found(),
    }
}

async fn admin_update_order(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(order_id): Path<OrderId>,
    Json(body): Json<StatusBody>,
) -> Response {
    if let Err(rejection) = state.authorize_admin(&headers) {
        return rejection;
    }
    let mut world = state.world();
    let Some((_, order)) = world.order_mut(order_id) else {
        return order_not_found();
    };
    if !order.status.can_transition_to(body.status) {
        return error(
            StatusCode::BAD_REQUEST,
            json!({ "status": [format!("Cannot move from {} to {}.", order.status, body.status)] }),
        );
    }
    order.status = body.status;
    order.reject_reason = body.reject_reason;
    Json(order.clone()).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Coupons
// ─────────────────────────────────────────────────────────────────────────────

async fn coupon(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    match state.world().coupons.get(&code.to_uppercase()) {
        Some(coupon) => Json(coupon.clone()).into_response(),
        None => error(StatusCode::NOT_FOUND, json!({ "detail": "Not found." })),
    }
}
