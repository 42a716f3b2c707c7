//! AgriHCM Core - Shared types library.
//!
//! This crate provides the domain types used across all AgriHCM components:
//! - `client` - Credential handling, API gateway, cart and checkout state
//! - `storefront` - Server-rendered flows and the admin session guard
//!
//! # Architecture
//!
//! The core crate contains only types and pure logic - no I/O, no HTTP
//! clients. The REST API is the source of truth for every value modelled
//! here; these types mirror its payloads.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, credentials, cart, order, coupon and user types

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
