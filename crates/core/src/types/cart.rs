//! Cart types.
//!
//! The client holds a mirror of the server cart. Totals and subtotals are
//! always the server's numbers; nothing here recomputes money.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::id::{CartId, CartItemId, ProductId};

/// Minimal product data embedded in a cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartProduct {
    pub id: ProductId,
    pub slug: String,
    pub name: String,
    pub price: Decimal,
    #[serde(default, rename = "primary_image", alias = "image")]
    pub image: Option<String>,
    #[serde(default)]
    pub is_in_stock: bool,
    #[serde(default)]
    pub stock_quantity: i64,
}

/// A line in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub product: CartProduct,
    /// Always at least 1; going below 1 is a removal.
    pub quantity: u32,
    /// `product.price * quantity`, as computed by the server.
    pub subtotal: Decimal,
    /// Client-only marker: an optimistic mutation for this line is in flight.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl CartItem {
    /// The product this line is keyed by.
    #[must_use]
    pub const fn product_id(&self) -> ProductId {
        self.product.id
    }
}

/// The authenticated user's cart.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cart {
    #[serde(default)]
    pub id: Option<CartId>,
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub total_items: u32,
    #[serde(default)]
    pub total_price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Cart {
    /// An empty cart with no server identity yet.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The line for `product_id`, if present.
    #[must_use]
    pub fn item(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product_id() == product_id)
    }

    /// Mutable access to the line for `product_id`, if present.
    pub fn item_mut(&mut self, product_id: ProductId) -> Option<&mut CartItem> {
        self.items
            .iter_mut()
            .find(|item| item.product_id() == product_id)
    }

    /// Whether any line has an optimistic mutation in flight.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.items.iter().any(|item| item.pending)
    }

    /// The badge numbers for this cart.
    #[must_use]
    pub const fn summary(&self) -> CartSummary {
        CartSummary {
            total_items: self.total_items,
            total_price: self.total_price,
        }
    }
}

/// Item count and price, as returned by the cart summary endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartSummary {
    pub total_items: u32,
    pub total_price: Decimal,
}
