//! AgriHCM client library.
//!
//! Everything that talks to the REST API on behalf of a logged-in user goes
//! through this crate:
//!
//! - [`credentials`] - where access and refresh tokens live
//! - [`refresh`] - exchanging a refresh token for a new access token
//! - [`gateway`] - the single authenticated request path
//! - [`session`] - login, logout and session checks
//! - [`cart`] - the shared, optimistic cart mirror
//! - [`checkout`] - order placement
//! - [`coupons`] and [`orders`] - coupon previews and order management
//! - [`events`] - notifications for UI collaborators

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod checkout;
pub mod config;
pub mod coupons;
pub mod credentials;
pub mod events;
pub mod gateway;
pub mod orders;
pub mod refresh;
pub mod session;

pub use cart::{CartError, CartStore, ClearOutcome, ItemPhase};
pub use checkout::{CheckoutCoordinator, CheckoutError, CheckoutForm, CheckoutPhase, Navigator};
pub use config::{ClientConfig, ConfigError};
pub use coupons::{CouponError, CouponPreview, CouponService};
pub use credentials::{
    Audience, ClientCredentialStore, CookieOptions, CookiePolicy, CredentialStore, SameSite,
};
pub use events::{EventBus, SessionEvent};
pub use gateway::{ApiClient, ApiError, Gateway};
pub use orders::{OrderError, OrderService};
pub use refresh::TokenRefresher;
pub use session::{SessionError, SessionService, login_redirect};
