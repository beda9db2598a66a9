use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::{AuthUser, UserRole},
    errors::ServiceError,
    models::order::OrderStatus,
    services::orders::{CreateOrderRequest, OrderListFilter},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

// Not flattened over ListQuery: serde_urlencoded cannot deserialize numeric
// fields through #[serde(flatten)].
#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
    #[serde(default = "crate::default_page")]
    pub page: u64,
    #[serde(default = "crate::default_limit")]
    pub limit: u64,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

/// POST /api/v1/orders
pub async fn create_order(
    State(state): State<AppState>,
    requester: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    requester.require_role(UserRole::Customer)?;
    let order = state.services.orders.create_order(requester, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    requester: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(order_id, requester).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    requester: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let filter = OrderListFilter {
        status: query.status,
        search: query.search,
        page: query.page,
        limit: query.limit,
        sort_by: query.sort_by,
        sort_order: query.sort_order,
    };
    let orders = state.services.orders.list_orders(requester, filter).await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// PUT /api/v1/orders/:id/status
pub async fn update_order_status(
    State(state): State<AppState>,
    requester: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    requester.require_role(UserRole::Seller)?;
    let order = state
        .services
        .orders
        .update_order_status(order_id, requester, request.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/v1/orders/:id/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    requester: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    requester.require_role(UserRole::Customer)?;
    let order = state
        .services
        .orders
        .cancel_order(order_id, requester)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
