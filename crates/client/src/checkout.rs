//! Order placement.
//!
//! The checkout page redirects to the product list whenever it sees an
//! empty cart. Placing an order empties the cart on the server, and the
//! coordinator refreshes the mirror before navigating to the confirmation
//! page, so that redirect would fire in between. The phases make that
//! window explicit:
//!
//! ```text
//! Idle -> Validating -> Submitting -> Succeeded -> NavigatedAway
//!             |              |
//!             v              v
//!           Idle           Failed
//! ```
//!
//! [`CheckoutCoordinator::observe_cart`] never redirects while
//! `Submitting`, `Succeeded` or `NavigatedAway`. Re-entering the page with
//! [`CheckoutCoordinator::open`] returns to `Idle`, after which an empty
//! cart redirects again.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use agrihcm_core::{Cart, Order, PaymentMethod};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::cart::CartStore;
use crate::events::{EventBus, SessionEvent};
use crate::gateway::{ApiError, Gateway};

const ORDERS_PATH: &str = "api/orders/";

/// Where a successful order sends the user.
pub const CONFIRMATION_PATH: &str = "/about/confirmed";

/// Where an empty checkout sends the user.
pub const EMPTY_CART_PATH: &str = "/products";

/// Checkout progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckoutPhase {
    #[default]
    Idle,
    Validating,
    Submitting,
    Succeeded,
    /// The confirmation page has been requested; this checkout is done.
    NavigatedAway,
    Failed,
}

impl CheckoutPhase {
    /// Whether the empty-cart redirect must stay quiet.
    #[must_use]
    pub const fn suppresses_empty_redirect(self) -> bool {
        matches!(self, Self::Submitting | Self::Succeeded | Self::NavigatedAway)
    }
}

/// Client-side navigation.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Checkout form input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckoutForm {
    pub customer_name: String,
    pub customer_phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    pub customer_address: String,
    pub payment_method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
}

impl CheckoutForm {
    /// Check required fields. Runs entirely client-side.
    ///
    /// # Errors
    ///
    /// Returns the message for each failing field, keyed by field name.
    pub fn validate(&self) -> Result<(), BTreeMap<&'static str, String>> {
        let mut errors = BTreeMap::new();

        if self.customer_name.trim().is_empty() {
            errors.insert("customer_name", "Please enter the recipient's name.".to_string());
        }
        let phone = self.customer_phone.trim();
        if phone.is_empty() {
            errors.insert("customer_phone", "Please enter a phone number.".to_string());
        } else if !phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '.'))
        {
            errors.insert("customer_phone", "Phone number contains invalid characters.".to_string());
        }
        if self.customer_address.trim().is_empty() {
            errors.insert("customer_address", "Please enter a delivery address.".to_string());
        }
        if !self.payment_method.is_supported_at_checkout() {
            errors.insert(
                "payment_method",
                "Only cash on delivery is available.".to_string(),
            );
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Trimmed copy with blank optionals dropped.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let optional = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(ToString::to_string)
        };
        Self {
            customer_name: self.customer_name.trim().to_string(),
            customer_phone: self.customer_phone.trim().to_string(),
            customer_email: optional(&self.customer_email),
            customer_address: self.customer_address.trim().to_string(),
            payment_method: self.payment_method,
            coupon_code: optional(&self.coupon_code).map(|c| c.to_uppercase()),
        }
    }
}

/// Errors from placing an order.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Client-side validation failed; nothing was sent.
    #[error("please correct the highlighted fields")]
    Invalid(BTreeMap<&'static str, String>),

    /// An order is already being placed, or this checkout has finished.
    #[error("an order is already being placed")]
    InProgress,

    #[error("your cart is empty")]
    EmptyCart,

    #[error("login required")]
    LoginRequired,

    #[error("{}", .0.user_message())]
    Api(ApiError),
}

impl From<ApiError> for CheckoutError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Unauthorized => Self::LoginRequired,
            other => Self::Api(other),
        }
    }
}

impl CheckoutError {
    /// Field-level messages to show inline, from either validation source.
    #[must_use]
    pub fn field_errors(&self) -> BTreeMap<String, String> {
        match self {
            Self::Invalid(fields) => fields
                .iter()
                .map(|(field, message)| ((*field).to_string(), message.clone()))
                .collect(),
            Self::Api(ApiError::Validation { fields, .. }) => fields
                .iter()
                .filter_map(|(field, messages)| {
                    messages.first().map(|message| (field.clone(), message.clone()))
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// Sequences checkout submission against the shared cart.
pub struct CheckoutCoordinator {
    gateway: Gateway,
    cart: CartStore,
    events: EventBus,
    navigator: Arc<dyn Navigator>,
    phase: Mutex<CheckoutPhase>,
}

impl CheckoutCoordinator {
    #[must_use]
    pub fn new(
        gateway: Gateway,
        cart: CartStore,
        events: EventBus,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            gateway,
            cart,
            events,
            navigator,
            phase: Mutex::new(CheckoutPhase::Idle),
        }
    }

    #[must_use]
    pub fn phase(&self) -> CheckoutPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The checkout page was (re-)entered.
    pub fn open(&self) {
        self.set_phase(CheckoutPhase::Idle);
    }

    /// React to a cart the page is showing. Redirects away from an empty
    /// checkout unless an order is in flight or just completed.
    ///
    /// Returns whether a redirect was issued.
    pub fn observe_cart(&self, cart: &Cart) -> bool {
        if !cart.is_empty() {
            return false;
        }
        let phase = self.phase();
        if phase.suppresses_empty_redirect() {
            tracing::debug!(?phase, "Empty cart during checkout; redirect suppressed");
            return false;
        }
        self.navigator.navigate(EMPTY_CART_PATH);
        true
    }

    /// Validate, submit, refresh the cart, then navigate to confirmation.
    ///
    /// # Errors
    ///
    /// - `CheckoutError::Invalid` if the form fails validation (nothing sent)
    /// - `CheckoutError::InProgress` on a double submit
    /// - `CheckoutError::EmptyCart` or `LoginRequired` before any request
    /// - `CheckoutError::Api` with the API's message if the order is refused
    #[instrument(skip(self, form))]
    pub async fn place_order(&self, form: &CheckoutForm) -> Result<Order, CheckoutError> {
        self.transition(|phase| {
            matches!(phase, CheckoutPhase::Idle | CheckoutPhase::Failed)
                .then_some(CheckoutPhase::Validating)
        })
        .ok_or(CheckoutError::InProgress)?;

        let form = form.normalized();
        if let Err(errors) = form.validate() {
            self.set_phase(CheckoutPhase::Idle);
            return Err(CheckoutError::Invalid(errors));
        }
        if !self.gateway.has_credential() {
            self.set_phase(CheckoutPhase::Idle);
            return Err(CheckoutError::LoginRequired);
        }
        if self.cart.snapshot().is_empty() {
            self.set_phase(CheckoutPhase::Idle);
            return Err(CheckoutError::EmptyCart);
        }

        self.set_phase(CheckoutPhase::Submitting);
        let order = match self.submit(&form).await {
            Ok(order) => order,
            Err(e) => {
                self.set_phase(CheckoutPhase::Failed);
                tracing::info!(error = %e, "Order placement failed");
                return Err(e);
            }
        };

        self.set_phase(CheckoutPhase::Succeeded);
        tracing::info!(order_id = %order.id, "Order placed");

        // The server emptied the cart with the order
        if let Err(e) = self.cart.refresh_cart().await {
            tracing::warn!(error = %e, "Cart re-fetch after order failed");
            self.cart.mark_emptied();
        }
        self.events.emit(SessionEvent::CloseCartPanel);
        self.navigator.navigate(CONFIRMATION_PATH);
        self.set_phase(CheckoutPhase::NavigatedAway);

        Ok(order)
    }

    async fn submit(&self, form: &CheckoutForm) -> Result<Order, CheckoutError> {
        self.gateway
            .post::<_, Order>(ORDERS_PATH, form)
            .await?
            .ok_or_else(|| ApiError::Malformed("empty order response".to_string()).into())
    }

    fn set_phase(&self, next: CheckoutPhase) {
        self.transition(|_| Some(next));
    }

    /// Atomically move to the phase `f` picks, if any.
    fn transition(
        &self,
        f: impl FnOnce(CheckoutPhase) -> Option<CheckoutPhase>,
    ) -> Option<CheckoutPhase> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        let next = f(*phase)?;
        tracing::trace!(from = ?*phase, to = ?next, "Checkout phase");
        *phase = next;
        Some(next)
    }
}
