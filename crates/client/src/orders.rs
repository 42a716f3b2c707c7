//! Order history, cancellation and admin status changes.
//!
//! The API owns order status. These calls only request transitions, and
//! refuse locally the ones the pipeline does not allow so no request is
//! wasted on them.

use agrihcm_core::{CancelReason, Order, OrderId, OrderStatus, RejectReason};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::gateway::{ApiError, Gateway};

/// Errors from order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order can no longer be cancelled (status {0})")]
    NotCancellable(OrderStatus),

    #[error("order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("a reason is required to reject an order")]
    RejectReasonRequired,

    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// List endpoints answer with either a bare array or a paginated page.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Page { results: Vec<T> },
    Plain(Vec<T>),
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Page { results } | Self::Plain(results) => results,
        }
    }
}

#[derive(Serialize)]
struct CancelRequest {
    cancel_reason: CancelReason,
}

#[derive(Serialize)]
struct StatusUpdate {
    status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    reject_reason: Option<RejectReason>,
}

/// Order operations for customers and admins.
#[derive(Clone)]
pub struct OrderService {
    gateway: Gateway,
}

impl OrderService {
    #[must_use]
    pub const fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Customer
    // ─────────────────────────────────────────────────────────────────────────

    /// The user's orders.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Api` if the request fails.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Order>, OrderError> {
        self.fetch_list("api/orders/").await
    }

    /// One of the user's orders.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` for unknown IDs.
    #[instrument(skip(self))]
    pub async fn get(&self, id: OrderId) -> Result<Order, OrderError> {
        self.fetch_one(&format!("api/orders/{id}/"), id).await
    }

    /// Cancel a pending order.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotCancellable` without a request unless the
    /// order is `PENDING`.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn cancel(&self, order: &Order, reason: CancelReason) -> Result<Order, OrderError> {
        if !order.is_cancellable() {
            return Err(OrderError::NotCancellable(order.status));
        }

        let path = format!("api/orders/{}/", order.id);
        match self
            .gateway
            .patch::<_, Order>(&path, &CancelRequest {
                cancel_reason: reason,
            })
            .await?
        {
            Some(updated) => Ok(updated),
            None => self.fetch_one(&path, order.id).await,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Admin
    // ─────────────────────────────────────────────────────────────────────────

    /// All orders, newest first, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Api` if the request fails.
    #[instrument(skip(self))]
    pub async fn admin_list(
        &self,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, OrderError> {
        let path = status.map_or_else(
            || "api/admin/orders/?ordering=-created_at".to_string(),
            |status| format!("api/admin/orders/?ordering=-created_at&status={status}"),
        );
        self.fetch_list(&path).await
    }

    /// Any order.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` for unknown IDs.
    #[instrument(skip(self))]
    pub async fn admin_get(&self, id: OrderId) -> Result<Order, OrderError> {
        self.fetch_one(&format!("api/admin/orders/{id}/"), id).await
    }

    /// Move an order to `next`.
    ///
    /// Admins cannot cancel (they reject), and rejecting needs a reason.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::InvalidTransition` or `RejectReasonRequired`
    /// without a request when the change is not allowed.
    #[instrument(skip(self, order), fields(order_id = %order.id, from = %order.status))]
    pub async fn admin_update_status(
        &self,
        order: &Order,
        next: OrderStatus,
        reject_reason: Option<RejectReason>,
    ) -> Result<Order, OrderError> {
        if next == OrderStatus::Cancelled || !order.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: next,
            });
        }
        if next == OrderStatus::Rejected && reject_reason.is_none() {
            return Err(OrderError::RejectReasonRequired);
        }

        let path = format!("api/admin/orders/{}/", order.id);
        let update = StatusUpdate {
            status: next,
            reject_reason: reject_reason.filter(|_| next == OrderStatus::Rejected),
        };
        match self.gateway.patch::<_, Order>(&path, &update).await? {
            Some(updated) => Ok(updated),
            None => self.fetch_one(&path, order.id).await,
        }
    }

    /// Advance an order one step along the fulfilment pipeline.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::InvalidTransition` for orders at the end of the
    /// pipeline.
    pub async fn admin_advance(&self, order: &Order) -> Result<Order, OrderError> {
        let Some(next) = order.status.next_in_pipeline() else {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: order.status,
            });
        };
        self.admin_update_status(order, next, None).await
    }

    async fn fetch_list(&self, path: &str) -> Result<Vec<Order>, OrderError> {
        Ok(self
            .gateway
            .get::<Listing<Order>>(path)
            .await?
            .map(Listing::into_vec)
            .unwrap_or_default())
    }

    async fn fetch_one(&self, path: &str, id: OrderId) -> Result<Order, OrderError> {
        match self.gateway.get::<Order>(path).await {
            Ok(Some(order)) => Ok(order),
            Ok(None) | Err(ApiError::Status { status: 404, .. }) => Err(OrderError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_accepts_both_shapes() {
        let plain: Listing<u32> = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(plain.into_vec(), vec![1, 2]);

        let page: Listing<u32> =
            serde_json::from_str(r#"{"count": 2, "next": null, "results": [3]}"#).unwrap();
        assert_eq!(page.into_vec(), vec![3]);
    }

    #[test]
    fn test_status_update_body() {
        let body = serde_json::to_value(StatusUpdate {
            status: OrderStatus::Rejected,
            reject_reason: Some(RejectReason::OutOfStock),
        })
        .unwrap();
        assert_eq!(body["status"], "REJECTED");
        assert_eq!(body["reject_reason"], "OUT_OF_STOCK");

        let body = serde_json::to_value(StatusUpdate {
            status: OrderStatus::Shipped,
            reject_reason: None,
        })
        .unwrap();
        assert!(body.get("reject_reason").is_none());
    }
}
