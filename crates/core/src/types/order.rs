//! Order types.
//!
//! An order's core fields never change after creation; only its status moves,
//! and only the API moves it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::id::{OrderId, OrderItemId, ProductId};
use crate::types::status::{CancelReason, OrderStatus, PaymentMethod, RejectReason};

/// A line of a placed order, priced at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub product: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub price_at_order: Decimal,
    pub line_total: Decimal,
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub status: OrderStatus,
    pub customer_name: String,
    pub customer_phone: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    pub customer_address: String,
    pub payment_method: PaymentMethod,
    pub subtotal_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub cancel_reason: Option<CancelReason>,
    #[serde(default)]
    pub reject_reason: Option<RejectReason>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Whether the customer may still cancel this order.
    #[must_use]
    pub const fn is_cancellable(&self) -> bool {
        self.status.is_cancellable()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_order() {
        let json = r#"{
            "id": 5,
            "status": "PENDING",
            "customer_name": "Lan",
            "customer_phone": "0901234567",
            "customer_email": null,
            "customer_address": "12 Nguyen Hue, District 1",
            "payment_method": "COD",
            "subtotal_amount": "90000.00",
            "discount_amount": "0.00",
            "final_amount": "90000.00",
            "items": [
                {
                    "id": 1,
                    "product": 1,
                    "product_name": "Organic rice",
                    "quantity": 2,
                    "price_at_order": "45000.00",
                    "line_total": "90000.00"
                }
            ],
            "pricing_snapshot": {"version": 1},
            "cancel_reason": null,
            "reject_reason": null,
            "created_at": "2025-03-01T08:00:00Z"
        }"#;

        let order: Order = serde_json::from_str(json).unwrap();
        assert_eq!(order.id, OrderId::new(5));
        assert_eq!(order.payment_method, PaymentMethod::CashOnDelivery);
        assert!(order.is_cancellable());
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.final_amount, Decimal::new(90000, 0));
    }
}
