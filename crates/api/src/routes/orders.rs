//! Order endpoints.
//!
//! Callers are identified by the `x-user-id` header; token validation
//! happens in front of this service. `x-user-role: delivery` marks the
//! courier, who may move shipped orders along.

use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use common::{OrderId, OwnerId};
use domain::OrderStatus;
use domain::contracts::{CreateOrderRequest, OrderResponse};
use saga::OrderCoordinator;
use serde::Deserialize;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const DELIVERY_ROLE: &str = "delivery";

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: Arc<OrderCoordinator>,
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub owner_id: OwnerId,
    pub privileged: bool,
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| OwnerId::parse(value).ok())
            .ok_or(ApiError::Unauthorized)?;
        let privileged = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|role| role.eq_ignore_ascii_case(DELIVERY_ROLE));

        Ok(Caller {
            owner_id,
            privileged,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderBody {
    pub description: Option<String>,
    #[serde(default)]
    pub is_cancel: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: OrderStatus,
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}

/// POST /orders
#[tracing::instrument(skip(state, req), fields(owner_id = %caller.owner_id))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let order = state.coordinator.create_order(caller.owner_id, req).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders?page=&page_size=
#[tracing::instrument(skip(state), fields(owner_id = %caller.owner_id))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(params): Query<ListParams>,
) -> Json<Vec<OrderResponse>> {
    let orders = state
        .coordinator
        .get_user_orders(
            caller.owner_id,
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(saga::DEFAULT_PAGE_SIZE),
        )
        .await;
    Json(orders.iter().map(OrderResponse::from).collect())
}

/// GET /orders/{id}
#[tracing::instrument(skip(state), fields(owner_id = %caller.owner_id))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .coordinator
        .get_order(parse_order_id(&id)?, caller.owner_id)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PUT /orders/{id}
#[tracing::instrument(skip(state, body), fields(owner_id = %caller.owner_id))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<UpdateOrderBody>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .coordinator
        .update_order(
            parse_order_id(&id)?,
            body.description,
            body.is_cancel,
            caller.owner_id,
        )
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PUT /orders/{id}/status
#[tracing::instrument(skip(state), fields(privileged = caller.privileged))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .coordinator
        .update_order_status(parse_order_id(&id)?, body.status, caller.privileged)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// DELETE /orders/{id}
#[tracing::instrument(skip(state), fields(owner_id = %caller.owner_id))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .delete_order(parse_order_id(&id)?, caller.owner_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
