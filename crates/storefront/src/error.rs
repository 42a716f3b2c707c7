//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//!
//! Error bodies are JSON: `{"detail": "...", "fields": {...}, "login_url": "..."}`
//! with `fields` and `login_url` only present when they apply.

use std::collections::BTreeMap;

use agrihcm_client::{ApiError, CartError, CheckoutError, CouponError, OrderError, SessionError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// REST API call failed.
    #[error("API error: {0}")]
    Api(ApiError),

    /// Cart operation failed.
    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    /// Order placement failed.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// Login, logout or session check failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Order operation failed.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Coupon could not be applied.
    #[error("Coupon error: {0}")]
    Coupon(#[from] CouponError),

    /// Form input failed validation before anything was sent.
    #[error("Invalid input")]
    Invalid(BTreeMap<String, String>),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No usable session. `login_url` remembers where the user was.
    #[error("Unauthorized")]
    Unauthorized { login_url: Option<String> },

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ApiError> for AppError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Unauthorized => Self::Unauthorized { login_url: None },
            other => Self::Api(other),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    login_url: Option<String>,
}

impl AppError {
    /// Whether this error is an unauthenticated request.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. }
                | Self::Cart(CartError::LoginRequired)
                | Self::Checkout(CheckoutError::LoginRequired)
                | Self::Api(ApiError::Unauthorized)
                | Self::Session(SessionError::Api(ApiError::Unauthorized))
                | Self::Order(OrderError::Api(ApiError::Unauthorized))
                | Self::Coupon(CouponError::Api(ApiError::Unauthorized))
        )
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Api(e)
            | Self::Cart(CartError::Api(e))
            | Self::Checkout(CheckoutError::Api(e))
            | Self::Session(SessionError::Api(e))
            | Self::Order(OrderError::Api(e))
            | Self::Coupon(CouponError::Api(e)) => api_status(e),
            Self::Session(SessionError::Rejected(_))
            | Self::Cart(CartError::LoginRequired)
            | Self::Checkout(CheckoutError::LoginRequired)
            | Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Cart(CartError::Conflict(_)) | Self::Checkout(CheckoutError::InProgress) => {
                StatusCode::CONFLICT
            }
            Self::Session(SessionError::MissingTokens) => StatusCode::BAD_GATEWAY,
            Self::Order(OrderError::NotCancellable(_) | OrderError::InvalidTransition { .. }) => {
                StatusCode::CONFLICT
            }
            Self::Order(OrderError::RejectReasonRequired)
            | Self::Cart(CartError::InvalidQuantity)
            | Self::Checkout(CheckoutError::Invalid(_) | CheckoutError::EmptyCart)
            | Self::Coupon(
                CouponError::Inactive(_) | CouponError::Expired(_) | CouponError::BelowMinimum { .. },
            )
            | Self::Invalid(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Order(OrderError::NotFound(_))
            | Self::Cart(CartError::NotInCart(_))
            | Self::Coupon(CouponError::NotFound(_))
            | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        let detail = match self {
            Self::Api(e)
            | Self::Session(SessionError::Api(e))
            | Self::Order(OrderError::Api(e))
            | Self::Coupon(CouponError::Api(e)) => e.user_message(),
            Self::Cart(e) => e.user_message(),
            Self::Checkout(e) => e.to_string(),
            Self::Session(SessionError::Rejected(message)) => message.clone(),
            Self::Unauthorized { .. } => ApiError::Unauthorized.user_message(),
            Self::Invalid(_) => "Please correct the highlighted fields.".to_string(),
            // Don't expose internal error details to clients
            Self::Internal(_) | Self::Session(SessionError::MissingTokens) => {
                "Internal server error".to_string()
            }
            Self::Order(e) => e.to_string(),
            Self::Coupon(e) => e.to_string(),
            Self::NotFound(what) => format!("Not found: {what}"),
            Self::BadRequest(message) => message.clone(),
        };

        let fields = match self {
            Self::Invalid(fields) => fields.clone(),
            Self::Checkout(e) => e.field_errors(),
            Self::Api(ApiError::Validation { fields, .. }) => fields
                .iter()
                .filter_map(|(field, messages)| {
                    messages.first().map(|message| (field.clone(), message.clone()))
                })
                .collect(),
            _ => BTreeMap::new(),
        };

        let login_url = match self {
            Self::Unauthorized { login_url } => login_url.clone(),
            _ => None,
        };

        ErrorBody {
            detail,
            fields,
            login_url,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        (status, Json(self.body())).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Gateway errors pass client faults through and report upstream faults as 502.
fn api_status(error: &ApiError) -> StatusCode {
    match error {
        ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        ApiError::Validation { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
        }
        ApiError::Conflict { .. } => StatusCode::CONFLICT,
        ApiError::Status { status, .. } if (400..500).contains(status) => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
        }
        ApiError::Network(_) | ApiError::Status { .. } | ApiError::Malformed(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

/// Set the Sentry user context.
///
/// Call this after a successful login or session check to associate errors
/// with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}
