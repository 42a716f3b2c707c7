//! Core types for AgriHCM.
//!
//! This module provides type-safe wrappers for the storefront's domain concepts.

pub mod cart;
pub mod coupon;
pub mod credential;
pub mod id;
pub mod order;
pub mod status;
pub mod user;

pub use cart::{Cart, CartItem, CartProduct, CartSummary};
pub use coupon::Coupon;
pub use credential::{
    ACCESS_TOKEN_COOKIE, CredentialState, DEFAULT_EXPIRY_MARGIN_SECS, REFRESH_TOKEN_COOKIE,
    TokenClaims, TokenError, TokenPair, decode_claims, is_expired, is_expired_at,
};
pub use id::*;
pub use order::{Order, OrderItem};
pub use status::*;
pub use user::User;
