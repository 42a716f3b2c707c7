//! Cart route handlers.
//!
//! Each request gets a [`CartStore`] bound to the caller's cookies. The
//! store does the work (quantity checks, the add/update/remove calls, the
//! refresh after a clear); these handlers only translate forms and results.
//! Every confirmed change answers with the server's cart and `cart-updated`.

use agrihcm_client::{CartError, CartStore, ClearOutcome};
use agrihcm_core::{Cart, CartSummary, ProductId};
use axum::{Form, Json, response::Response};
use serde::Deserialize;
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::middleware::ApiSession;

/// Add to cart form data.
#[derive(Debug, Deserialize)]
pub struct AddToCartForm {
    pub product_id: ProductId,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

/// Update quantity form data. Zero or less removes the item.
#[derive(Debug, Deserialize)]
pub struct UpdateCartForm {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Remove from cart form data.
#[derive(Debug, Deserialize)]
pub struct RemoveFromCartForm {
    pub product_id: ProductId,
}

/// Clear cart form data.
#[derive(Debug, Default, Deserialize)]
pub struct ClearCartForm {
    #[serde(default)]
    pub confirm: bool,
}

const fn default_quantity() -> u32 {
    1
}

fn store(session: &ApiSession) -> CartStore {
    CartStore::new(session.gateway().clone(), session.events().clone())
}

/// Cart contents. Logged-out visitors, and sessions the API no longer
/// accepts, get an empty cart.
#[instrument(skip_all)]
pub async fn show(session: ApiSession) -> Result<Response> {
    match store(&session).refresh_cart().await {
        Ok(cart) => Ok(session.respond(Json(cart))),
        Err(CartError::LoginRequired) => {
            session.expire();
            Ok(session.respond(Json(Cart::empty())))
        }
        Err(e) => Err(session.error(e)),
    }
}

/// Item count and total for the cart badge.
#[instrument(skip_all)]
pub async fn summary(session: ApiSession) -> Result<Json<CartSummary>> {
    if !session.gateway().has_credential() {
        return Ok(Json(CartSummary::default()));
    }
    let summary = store(&session)
        .summary()
        .await
        .map_err(|e| session.error(e))?;
    Ok(Json(summary))
}

/// Add a product.
#[instrument(skip(session))]
pub async fn add(session: ApiSession, Form(form): Form<AddToCartForm>) -> Result<Response> {
    let cart = store(&session)
        .add_to_cart(form.product_id, form.quantity)
        .await
        .map_err(|e| session.error(e))?;
    Ok(session.respond(Json(cart)))
}

/// Set a quantity. Anything below 1 is treated as a removal.
#[instrument(skip(session))]
pub async fn update(session: ApiSession, Form(form): Form<UpdateCartForm>) -> Result<Response> {
    let cart = store(&session);
    // The store only knows lines it has fetched
    cart.refresh_cart().await.map_err(|e| session.error(e))?;

    let result = match u32::try_from(form.quantity) {
        Ok(quantity) if quantity >= 1 => cart.update_quantity(form.product_id, quantity).await,
        _ => cart.remove_item(form.product_id).await,
    };
    let cart = result.map_err(|e| session.error(e))?;
    Ok(session.respond(Json(cart)))
}

/// Remove a product.
#[instrument(skip(session))]
pub async fn remove(session: ApiSession, Form(form): Form<RemoveFromCartForm>) -> Result<Response> {
    let cart = store(&session);
    cart.refresh_cart().await.map_err(|e| session.error(e))?;

    let cart = cart
        .remove_item(form.product_id)
        .await
        .map_err(|e| session.error(e))?;
    Ok(session.respond(Json(cart)))
}

/// Empty the cart. Without `confirm=true` nothing is sent.
#[instrument(skip(session))]
pub async fn clear(session: ApiSession, Form(form): Form<ClearCartForm>) -> Result<Response> {
    let cart = store(&session);
    let outcome = cart
        .clear_cart(|| form.confirm)
        .await
        .map_err(|e| session.error(e))?;

    match outcome {
        ClearOutcome::Cancelled => Err(AppError::BadRequest(
            "Confirm to empty your cart.".to_string(),
        )),
        ClearOutcome::Cleared => Ok(session.respond(Json(cart.snapshot()))),
    }
}
