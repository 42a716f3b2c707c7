//! HTTP route handlers for storefront.
//!
//! All handlers answer JSON; htmx pages pick up `HX-Trigger` and
//! `HX-Redirect` from the response headers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                              - Health check
//!
//! # Auth
//! POST /auth/login                          - Customer login (sets credential cookies)
//! POST /auth/logout                         - Logout (clears credential cookies)
//! GET  /auth/session                        - Current user, or 401 with a login URL
//!
//! # Cart (requires session for mutations)
//! GET  /api/cart                            - Cart contents (empty when logged out)
//! GET  /api/cart/summary                    - Item count and total
//! POST /api/cart/add                        - Add a product
//! POST /api/cart/update                     - Set a quantity (below 1 removes)
//! POST /api/cart/remove                     - Remove a product
//! POST /api/cart/clear                      - Empty the cart (requires confirm=true)
//!
//! # Checkout
//! GET  /api/coupons/{code}                  - Coupon preview against ?subtotal=
//! POST /api/checkout                        - Place an order
//! GET  /api/orders                          - Order history
//! GET  /api/orders/{id}                     - Order detail
//! POST /api/orders/{id}/cancel              - Cancel a pending order
//!
//! # Admin console (behind the session guard)
//! POST /agrihcmAdmin/login                  - Admin login
//! POST /agrihcmAdmin/logout                 - Admin logout
//! GET  /agrihcmAdmin                        - Current admin user
//! GET  /agrihcmAdmin/api/orders             - All orders, newest first (?status=)
//! GET  /agrihcmAdmin/api/orders/{id}        - Order detail
//! POST /agrihcmAdmin/api/orders/{id}/status - Move an order to a status
//! POST /agrihcmAdmin/api/orders/{id}/advance - Move an order one pipeline step
//! ```

pub mod admin;
pub mod auth;
pub mod cart;
pub mod checkout;
pub mod orders;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Header telling htmx to navigate after the request.
pub const HX_REDIRECT: &str = "hx-redirect";

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/session", get(auth::session))
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/summary", get(cart::summary))
        .route("/add", post(cart::add))
        .route("/update", post(cart::update))
        .route("/remove", post(cart::remove))
        .route("/clear", post(cart::clear))
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(orders::index))
        .route("/{id}", get(orders::show))
        .route("/{id}/cancel", post(orders::cancel))
}

/// Create the admin console routes router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(admin::dashboard))
        .route("/login", post(auth::admin_login))
        .route("/logout", post(auth::logout))
        .route("/api/orders", get(admin::orders))
        .route("/api/orders/{id}", get(admin::order))
        .route("/api/orders/{id}/status", post(admin::update_status))
        .route("/api/orders/{id}/advance", post(admin::advance))
}

/// Create all routes for the storefront.
///
/// The admin console is mounted under every configured protected prefix.
pub fn routes(protected_prefixes: &[String]) -> Router<AppState> {
    let router = Router::new()
        // Auth routes
        .nest("/auth", auth_routes())
        // Cart routes
        .nest("/api/cart", cart_routes())
        // Checkout
        .route("/api/coupons/{code}", get(checkout::coupon))
        .route("/api/checkout", post(checkout::place_order))
        // Order history
        .nest("/api/orders", order_routes());

    protected_prefixes
        .iter()
        .fold(router, |router, prefix| router.nest(prefix, admin_routes()))
}
