//! Admin console route handlers.
//!
//! Every route here sits behind the session guard, so handlers can assume
//! a credential was present when the request arrived. The API still decides
//! whether the user is an admin.

use agrihcm_client::ApiError;
use agrihcm_core::{Order, OrderId, OrderStatus, RejectReason};
use axum::{
    Form, Json,
    extract::{Path, Query},
    response::Response,
};
use serde::Deserialize;
use tracing::instrument;

use crate::error::Result;
use crate::middleware::ApiSession;

/// Order list filter.
#[derive(Debug, Default, Deserialize)]
pub struct OrderFilter {
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

/// Status change form data.
#[derive(Debug, Deserialize)]
pub struct StatusForm {
    pub status: OrderStatus,
    #[serde(default)]
    pub reject_reason: Option<RejectReason>,
}

/// The logged-in admin.
#[instrument(skip_all)]
pub async fn dashboard(session: ApiSession) -> Result<Response> {
    let user = session
        .sessions()
        .check_session()
        .await
        .map_err(|e| session.error(e))?;

    match user {
        Some(user) => Ok(session.respond(Json(user))),
        None => Err(session.error(ApiError::Unauthorized)),
    }
}

/// All orders, newest first.
#[instrument(skip(session))]
pub async fn orders(
    session: ApiSession,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<Vec<Order>>> {
    let orders = session
        .orders()
        .admin_list(filter.status)
        .await
        .map_err(|e| session.error(e))?;
    Ok(Json(orders))
}

/// One order.
#[instrument(skip(session))]
pub async fn order(session: ApiSession, Path(id): Path<OrderId>) -> Result<Json<Order>> {
    let order = session
        .orders()
        .admin_get(id)
        .await
        .map_err(|e| session.error(e))?;
    Ok(Json(order))
}

/// Move an order to the requested status.
#[instrument(skip(session))]
pub async fn update_status(
    session: ApiSession,
    Path(id): Path<OrderId>,
    Form(form): Form<StatusForm>,
) -> Result<Json<Order>> {
    let orders = session.orders();
    let order = orders.admin_get(id).await.map_err(|e| session.error(e))?;
    let updated = orders
        .admin_update_status(&order, form.status, form.reject_reason)
        .await
        .map_err(|e| session.error(e))?;

    tracing::info!(
        order_id = %updated.id,
        from = %order.status,
        to = %updated.status,
        "Order status changed"
    );
    Ok(Json(updated))
}

/// Move an order one step along the pipeline.
#[instrument(skip(session))]
pub async fn advance(session: ApiSession, Path(id): Path<OrderId>) -> Result<Json<Order>> {
    let orders = session.orders();
    let order = orders.admin_get(id).await.map_err(|e| session.error(e))?;
    let updated = orders
        .admin_advance(&order)
        .await
        .map_err(|e| session.error(e))?;
    Ok(Json(updated))
}
