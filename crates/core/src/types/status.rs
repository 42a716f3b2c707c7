//! Status enums for orders.
//!
//! The API is authoritative for every status; the client only requests
//! transitions and uses [`OrderStatus::can_transition_to`] to refuse the ones
//! the API would reject anyway.

use serde::{Deserialize, Serialize};

/// Order lifecycle status.
///
/// ```text
/// PENDING -> CONFIRMED -> SHIPPED -> DELIVERED
/// PENDING -> REJECTED
/// PENDING -> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Whether the order may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Confirmed | Self::Rejected | Self::Cancelled
            ) | (Self::Confirmed, Self::Shipped)
                | (Self::Shipped, Self::Delivered)
        )
    }

    /// The next step along the fulfilment pipeline, if any.
    #[must_use]
    pub const fn next_in_pipeline(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Confirmed),
            Self::Confirmed => Some(Self::Shipped),
            Self::Shipped => Some(Self::Delivered),
            Self::Delivered | Self::Cancelled | Self::Rejected => None,
        }
    }

    /// Customers may cancel only while the order is still pending.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// No further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Rejected)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Shipped => write!(f, "SHIPPED"),
            Self::Delivered => write!(f, "DELIVERED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "SHIPPED" => Ok(Self::Shipped),
            "DELIVERED" => Ok(Self::Delivered),
            "CANCELLED" => Ok(Self::Cancelled),
            "REJECTED" => Ok(Self::Rejected),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}

/// Payment method for an order.
///
/// The storefront checkout only offers cash on delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[default]
    #[serde(rename = "COD")]
    CashOnDelivery,
    BankTransfer,
}

impl PaymentMethod {
    /// Whether the storefront checkout accepts this method.
    #[must_use]
    pub const fn is_supported_at_checkout(self) -> bool {
        matches!(self, Self::CashOnDelivery)
    }
}

/// Reason a customer gives when cancelling a pending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    #[default]
    ChangedMind,
    OrderedByMistake,
    Other,
}

/// Reason an admin gives when rejecting a pending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    OutOfStock,
    InvalidAddress,
    SuspectedFraud,
    Other,
}
