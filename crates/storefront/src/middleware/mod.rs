//! HTTP middleware stack for storefront.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (capture errors, transactions)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. Cookie manager (`tower-cookies`)
//! 5. Session guard (protected prefixes only)

pub mod auth;
pub mod request_id;
pub mod session_guard;

pub use auth::{ApiSession, AuthRejection, HX_TRIGGER, is_api_path};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
pub use session_guard::{GuardDecision, GuardPolicy, session_guard};
