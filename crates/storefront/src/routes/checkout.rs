//! Checkout route handlers.
//!
//! Order placement runs through the same [`CheckoutCoordinator`] the client
//! library uses. Its navigation request becomes an `HX-Redirect`, and its
//! cart-panel event an `HX-Trigger`, so the page closes the cart and moves
//! to the confirmation page on its own.

use std::sync::{Arc, Mutex, PoisonError};

use agrihcm_client::{
    CartStore, CheckoutCoordinator, CheckoutError, CheckoutForm, Navigator, SessionEvent,
};
use agrihcm_core::{Order, PaymentMethod};
use axum::{
    Form, Json,
    extract::{Path, Query},
    http::{HeaderValue, StatusCode},
    response::Response,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::Result;
use crate::middleware::ApiSession;
use crate::routes::HX_REDIRECT;

/// Checkout form data.
#[derive(Debug, Deserialize)]
pub struct CheckoutInput {
    pub customer_name: String,
    pub customer_phone: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    pub customer_address: String,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

impl From<CheckoutInput> for CheckoutForm {
    fn from(input: CheckoutInput) -> Self {
        Self {
            customer_name: input.customer_name,
            customer_phone: input.customer_phone,
            customer_email: input.customer_email,
            customer_address: input.customer_address,
            payment_method: input.payment_method,
            coupon_code: input.coupon_code,
        }
    }
}

/// Coupon preview query.
#[derive(Debug, Deserialize)]
pub struct CouponQuery {
    pub subtotal: Decimal,
}

/// What the checkout shows after applying a coupon.
#[derive(Debug, Serialize)]
pub struct CouponPreviewView {
    pub code: String,
    pub discount_percent: Decimal,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub final_total: Decimal,
}

/// Records where the coordinator wants to go, for `HX-Redirect`.
#[derive(Default)]
struct RedirectRecorder {
    target: Mutex<Option<String>>,
}

impl Navigator for RedirectRecorder {
    fn navigate(&self, path: &str) {
        *self.target.lock().unwrap_or_else(PoisonError::into_inner) = Some(path.to_string());
    }
}

impl RedirectRecorder {
    fn take(&self) -> Option<String> {
        self.target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Preview a coupon against the cart subtotal.
#[instrument(skip(session))]
pub async fn coupon(
    session: ApiSession,
    Path(code): Path<String>,
    Query(query): Query<CouponQuery>,
) -> Result<Json<CouponPreviewView>> {
    let preview = session
        .coupons()
        .preview(&code, query.subtotal)
        .await
        .map_err(|e| session.error(e))?;

    Ok(Json(CouponPreviewView {
        code: preview.coupon.code,
        discount_percent: preview.coupon.discount_percent,
        subtotal: preview.subtotal,
        discount: preview.discount,
        final_total: preview.final_total,
    }))
}

/// Place an order from the caller's cart.
#[instrument(skip(session, input))]
pub async fn place_order(session: ApiSession, Form(input): Form<CheckoutInput>) -> Result<Response> {
    let form = CheckoutForm::from(input).normalized();
    form.validate().map_err(|fields| session.error(CheckoutError::Invalid(fields)))?;

    let cart = CartStore::new(session.gateway().clone(), session.events().clone());
    // The coordinator refuses an empty cart, so it needs the current one
    cart.refresh_cart().await.map_err(|e| session.error(e))?;

    let navigator = Arc::new(RedirectRecorder::default());
    let checkout = CheckoutCoordinator::new(
        session.gateway().clone(),
        cart,
        session.events().clone(),
        navigator.clone(),
    );

    let order: Order = checkout
        .place_order(&form)
        .await
        .map_err(|e| session.error(e))?;
    session.events().emit(SessionEvent::CartUpdated);

    let mut response = session.respond((StatusCode::CREATED, Json(order)));
    if let Some(value) = navigator.take().and_then(|p| HeaderValue::from_str(&p).ok()) {
        response.headers_mut().insert(HX_REDIRECT, value);
    }
    Ok(response)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agrihcm_client::checkout::CONFIRMATION_PATH;

    use super::*;

    #[test]
    fn test_redirect_recorder_keeps_last_target() {
        let recorder = RedirectRecorder::default();
        assert_eq!(recorder.take(), None);
        recorder.navigate("/products");
        recorder.navigate(CONFIRMATION_PATH);
        assert_eq!(recorder.take().as_deref(), Some("/about/confirmed"));
        assert_eq!(recorder.take(), None);
    }

    #[test]
    fn test_checkout_input_defaults_to_cash_on_delivery() {
        let input: CheckoutInput = serde_json::from_value(serde_json::json!({
            "customer_name": "Lan",
            "customer_phone": "0901234567",
            "customer_address": "12 Le Loi, District 1",
        }))
        .unwrap();
        let form = CheckoutForm::from(input);
        assert_eq!(form.payment_method, PaymentMethod::CashOnDelivery);
        assert!(form.validate().is_ok());
    }
}
