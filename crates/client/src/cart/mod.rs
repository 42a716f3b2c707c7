//! Shared cart store.
//!
//! One [`CartStore`] per user session is shared by every surface that shows
//! the cart (navbar badge, cart panel, checkout). Surfaces subscribe to the
//! same `watch` channel, so a mutation from any of them is visible to all.
//!
//! Item mutations are optimistic: the item shows its new state and a
//! pending marker immediately, the request goes out, and then either the
//! server's full cart replaces the mirror or the item reverts to the last
//! settled cart. See [`state`] for how overlapping requests are ordered.
//! When a success cannot be ordered against a cart that already settled,
//! the store re-fetches the cart before the mutation returns.
//!
//! After [`CartStore::close`], responses still arriving are not applied.

pub mod state;

pub use state::{CartState, ItemPhase, PendingOp, Settlement, Ticket};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use agrihcm_core::{Cart, CartSummary, ProductId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::instrument;

use crate::events::{EventBus, SessionEvent};
use crate::gateway::{ApiError, Gateway};

const CART_PATH: &str = "api/cart/";
const ADD_PATH: &str = "api/cart/add/";
const UPDATE_PATH: &str = "api/cart/update/";
const REMOVE_PATH: &str = "api/cart/remove/";
const CLEAR_PATH: &str = "api/cart/clear/";
const SUMMARY_PATH: &str = "api/cart/summary/";

/// Errors from cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// There is no session; send the user to login.
    #[error("login required")]
    LoginRequired,

    /// Quantities below 1 are removals, not updates.
    #[error("quantity must be at least 1")]
    InvalidQuantity,

    #[error("product {0} is not in the cart")]
    NotInCart(ProductId),

    /// The server refused the change against current stock. The item has
    /// been rolled back; a `refresh_cart` shows true stock.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Api(ApiError),
}

impl From<ApiError> for CartError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Unauthorized => Self::LoginRequired,
            ApiError::Conflict { message } => Self::Conflict(message),
            other => Self::Api(other),
        }
    }
}

impl CartError {
    /// Message suitable for a toast.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::LoginRequired => "Please log in to use your cart.".to_string(),
            Self::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Result of [`CartStore::clear_cart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// The user declined the confirmation; nothing was sent.
    Cancelled,
    Cleared,
}

#[derive(Serialize)]
struct ItemRequest {
    product_id: ProductId,
    #[serde(skip_serializing_if = "Option::is_none")]
    quantity: Option<u32>,
}

/// The user's cart mirror. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CartStore {
    inner: Arc<CartStoreInner>,
}

struct CartStoreInner {
    gateway: Gateway,
    events: EventBus,
    state: Mutex<CartState>,
    published: watch::Sender<Cart>,
    closed: AtomicBool,
}

impl CartStore {
    /// An empty mirror; call [`CartStore::refresh_cart`] to load it.
    #[must_use]
    pub fn new(gateway: Gateway, events: EventBus) -> Self {
        let (published, _) = watch::channel(Cart::empty());
        Self {
            inner: Arc::new(CartStoreInner {
                gateway,
                events,
                state: Mutex::new(CartState::default()),
                published,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Receive every published version of the cart.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Cart> {
        self.inner.published.subscribe()
    }

    /// The cart as currently shown.
    #[must_use]
    pub fn snapshot(&self) -> Cart {
        self.inner.published.borrow().clone()
    }

    #[must_use]
    pub fn item_phase(&self, product_id: ProductId) -> ItemPhase {
        self.with_state(|state| state.phase(product_id))
    }

    /// Whether controls for this item should be disabled.
    #[must_use]
    pub fn is_pending(&self, product_id: ProductId) -> bool {
        self.item_phase(product_id) == ItemPhase::Pending
    }

    /// Stop applying responses. Requests already sent run to completion.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Add `quantity` of a product. Fails fast with `LoginRequired` when
    /// there is no session.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if there is no session, the quantity is zero, or
    /// the API refuses the change.
    #[instrument(skip(self))]
    pub async fn add_to_cart(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity);
        }
        self.require_session()?;

        self.mutate(
            product_id,
            PendingOp::Add,
            ADD_PATH,
            ItemRequest {
                product_id,
                quantity: Some(quantity),
            },
        )
        .await
    }

    /// Set an item's quantity. Quantities below 1 must go through
    /// [`CartStore::remove_item`].
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidQuantity` for 0 without any request, or
    /// the API's error after rolling the item back.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity);
        }
        self.require_session()?;
        self.require_item(product_id)?;

        self.mutate(
            product_id,
            PendingOp::SetQuantity(quantity),
            UPDATE_PATH,
            ItemRequest {
                product_id,
                quantity: Some(quantity),
            },
        )
        .await
    }

    /// Remove an item.
    ///
    /// # Errors
    ///
    /// Returns the API's error after restoring the item.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, product_id: ProductId) -> Result<Cart, CartError> {
        self.require_session()?;
        self.require_item(product_id)?;

        self.mutate(
            product_id,
            PendingOp::Remove,
            REMOVE_PATH,
            ItemRequest {
                product_id,
                quantity: None,
            },
        )
        .await
    }

    /// Empty the cart after `confirm` agrees.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if there is no session or the API refuses.
    #[instrument(skip(self, confirm))]
    pub async fn clear_cart<F>(&self, confirm: F) -> Result<ClearOutcome, CartError>
    where
        F: FnOnce() -> bool + Send,
    {
        if !confirm() {
            return Ok(ClearOutcome::Cancelled);
        }
        self.require_session()?;

        self.inner
            .gateway
            .post::<_, serde_json::Value>(CLEAR_PATH, &serde_json::json!({}))
            .await?;

        if let Err(e) = self.refresh_cart().await {
            tracing::warn!(error = %e, "Cart cleared but re-fetch failed; showing it empty");
            self.mark_emptied();
        }
        self.inner.events.emit(SessionEvent::CartUpdated);
        Ok(ClearOutcome::Cleared)
    }

    /// Re-fetch the whole cart and replace the mirror.
    ///
    /// Without a session the mirror becomes empty.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the fetch fails; the mirror is left as is.
    #[instrument(skip(self))]
    pub async fn refresh_cart(&self) -> Result<Cart, CartError> {
        let ticket = self.with_state(CartState::begin_fetch);

        if !self.inner.gateway.has_credential() {
            self.apply(|state| state.settle(&ticket, Cart::empty()).changed());
            return Ok(self.snapshot());
        }

        let server = self
            .inner
            .gateway
            .get::<Cart>(CART_PATH)
            .await?
            .ok_or_else(|| ApiError::Malformed("empty cart response".to_string()))?;

        self.apply(|state| state.settle(&ticket, server).changed());
        Ok(self.snapshot())
    }

    /// Badge numbers straight from the server. Does not touch the mirror.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the request fails.
    pub async fn summary(&self) -> Result<CartSummary, CartError> {
        self.require_session()?;
        let summary = self
            .inner
            .gateway
            .get::<CartSummary>(SUMMARY_PATH)
            .await?
            .ok_or_else(|| ApiError::Malformed("empty cart summary".to_string()))?;
        Ok(summary)
    }

    /// Show the cart as empty after the server is known to have emptied it.
    pub fn mark_emptied(&self) {
        self.apply(|state| {
            let ticket = state.begin_fetch();
            let emptied = Cart {
                id: state.settled().id,
                ..Cart::empty()
            };
            state.settle(&ticket, emptied).changed()
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    async fn mutate(
        &self,
        product_id: ProductId,
        op: PendingOp,
        path: &str,
        body: ItemRequest,
    ) -> Result<Cart, CartError> {
        let ticket = self.with_state(|state| state.begin(product_id, op));
        self.apply(|_| true);

        match self.inner.gateway.post::<_, Cart>(path, &body).await {
            Ok(Some(server)) => {
                let mut settlement = Settlement::Discarded { changed: false };
                self.apply(|state| {
                    settlement = state.settle(&ticket, server);
                    settlement.changed()
                });
                if settlement == Settlement::Unconfirmed {
                    self.reconcile(&ticket).await?;
                }
                self.inner.events.emit(SessionEvent::CartUpdated);
                Ok(self.snapshot())
            }
            Ok(None) => {
                self.apply(|state| state.rollback(&ticket));
                Err(CartError::Api(ApiError::Malformed(
                    "empty cart response".to_string(),
                )))
            }
            Err(e) => {
                let reverted = self.apply(|state| state.rollback(&ticket));
                tracing::warn!(%product_id, reverted, error = %e, "Cart mutation failed");
                Err(e.into())
            }
        }
    }

    /// Re-fetch the cart so an item whose success landed behind a newer
    /// cart settles on what the server holds now.
    async fn reconcile(&self, ticket: &Ticket) -> Result<(), CartError> {
        let Some(fetch) = self.with_state(|state| state.begin_reconcile(ticket)) else {
            return Ok(());
        };
        tracing::debug!(seq = fetch.seq(), "Reconciling cart after out-of-order response");

        match self.inner.gateway.get::<Cart>(CART_PATH).await {
            Ok(Some(server)) => {
                self.apply(|state| state.settle(&fetch, server).changed());
                Ok(())
            }
            Ok(None) => {
                self.apply(|state| state.release(&fetch));
                Err(CartError::Api(ApiError::Malformed(
                    "empty cart response".to_string(),
                )))
            }
            Err(e) => {
                self.apply(|state| state.release(&fetch));
                tracing::warn!(error = %e, "Cart changed but re-fetch failed");
                Err(e.into())
            }
        }
    }

    fn require_session(&self) -> Result<(), CartError> {
        if self.inner.gateway.has_credential() {
            Ok(())
        } else {
            Err(CartError::LoginRequired)
        }
    }

    fn require_item(&self, product_id: ProductId) -> Result<(), CartError> {
        if self.snapshot().item(product_id).is_some() {
            Ok(())
        } else {
            Err(CartError::NotInCart(product_id))
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut CartState) -> R) -> R {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Run `f` and publish the view if it reports a change. Returns false
    /// without running `f` once the store is closed.
    fn apply(&self, f: impl FnOnce(&mut CartState) -> bool) -> bool {
        if self.is_closed() {
            tracing::debug!("Cart store closed; dropping update");
            return false;
        }

        self.with_state(|state| {
            let changed = f(state);
            if changed {
                self.inner.published.send_replace(state.view());
            }
            changed
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use url::Url;

    use super::*;
    use crate::config::ClientConfig;
    use crate::credentials::{Audience, ClientCredentialStore};
    use crate::gateway::ApiClient;

    // Nothing listens here; these tests must fail before any request
    fn store() -> CartStore {
        let config = ClientConfig::new(Url::parse("http://127.0.0.1:9/").unwrap());
        let api = ApiClient::new(config).unwrap();
        let credentials = ClientCredentialStore::new(Url::parse("http://127.0.0.1:9/").unwrap());
        CartStore::new(api.gateway(Arc::new(credentials), Audience::Customer), EventBus::new())
    }

    #[tokio::test]
    async fn test_add_without_session_requires_login() {
        let cart = store();
        let result = cart.add_to_cart(ProductId::new(1), 1).await;
        assert!(matches!(result, Err(CartError::LoginRequired)));
        assert!(cart.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_zero_quantity_is_not_an_update() {
        let cart = store();
        let result = cart.update_quantity(ProductId::new(1), 0).await;
        assert!(matches!(result, Err(CartError::InvalidQuantity)));
        assert!(!cart.is_pending(ProductId::new(1)));
    }

    #[tokio::test]
    async fn test_declined_clear_sends_nothing() {
        let cart = store();
        let outcome = cart.clear_cart(|| false).await.unwrap();
        assert_eq!(outcome, ClearOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_refresh_without_session_empties_mirror() {
        let cart = store();
        let rx = cart.subscribe();
        let shown = cart.refresh_cart().await.unwrap();
        assert!(shown.is_empty());
        assert!(rx.borrow().is_empty());
    }

    #[test]
    fn test_conflict_maps_to_cart_conflict() {
        let err: CartError = ApiError::Conflict {
            message: "Insufficient stock".to_string(),
        }
        .into();
        assert_eq!(err.user_message(), "Insufficient stock");

        let err: CartError = ApiError::Unauthorized.into();
        assert!(matches!(err, CartError::LoginRequired));
    }
}
