//! Customer order history and cancellation.

use agrihcm_core::{CancelReason, Order, OrderId};
use axum::{Form, Json, extract::Path};
use serde::Deserialize;
use tracing::instrument;

use crate::error::Result;
use crate::middleware::ApiSession;

/// Cancel order form data.
#[derive(Debug, Deserialize)]
pub struct CancelForm {
    #[serde(default)]
    pub cancel_reason: CancelReason,
}

/// The caller's orders.
#[instrument(skip_all)]
pub async fn index(session: ApiSession) -> Result<Json<Vec<Order>>> {
    let orders = session
        .orders()
        .list()
        .await
        .map_err(|e| session.error(e))?;
    Ok(Json(orders))
}

/// One of the caller's orders.
#[instrument(skip(session))]
pub async fn show(session: ApiSession, Path(id): Path<OrderId>) -> Result<Json<Order>> {
    let order = session
        .orders()
        .get(id)
        .await
        .map_err(|e| session.error(e))?;
    Ok(Json(order))
}

/// Cancel a pending order.
#[instrument(skip(session))]
pub async fn cancel(
    session: ApiSession,
    Path(id): Path<OrderId>,
    Form(form): Form<CancelForm>,
) -> Result<Json<Order>> {
    let orders = session.orders();
    let order = orders.get(id).await.map_err(|e| session.error(e))?;
    let order = orders
        .cancel(&order, form.cancel_reason)
        .await
        .map_err(|e| session.error(e))?;

    tracing::info!(order_id = %order.id, "Order cancelled");
    Ok(Json(order))
}
