use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::{AuthUser, UserRole},
    errors::ServiceError,
    models::review::ReviewStats,
    services::reviews::{CreateReviewRequest, ReplyToReviewRequest},
    ApiResponse, AppState, ListQuery,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct ReviewStatsResponse {
    pub average: Decimal,
    pub count: u64,
    pub distribution: [u64; 5],
    /// Share of each star value in percent, for the rating bars.
    pub percentages: [Decimal; 5],
}

impl From<ReviewStats> for ReviewStatsResponse {
    fn from(stats: ReviewStats) -> Self {
        let percentages = stats.distribution_percentages();
        Self {
            average: stats.average,
            count: stats.count,
            distribution: stats.distribution,
            percentages,
        }
    }
}

/// GET /api/v1/orders/:id/items/:medicine_id/review-eligibility
pub async fn check_eligibility(
    State(state): State<AppState>,
    requester: AuthUser,
    Path((order_id, medicine_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    requester.require_role(UserRole::Customer)?;
    let eligibility = state
        .services
        .reviews
        .check_eligibility(order_id, medicine_id, requester)
        .await?;
    Ok(Json(ApiResponse::success(eligibility)))
}

/// POST /api/v1/reviews
pub async fn create_review(
    State(state): State<AppState>,
    requester: AuthUser,
    Json(request): Json<CreateReviewRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    requester.require_role(UserRole::Customer)?;
    let review = state
        .services
        .reviews
        .create_review(requester, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(review))))
}

/// POST /api/v1/reviews/:id/reply
pub async fn reply_to_review(
    State(state): State<AppState>,
    requester: AuthUser,
    Path(review_id): Path<Uuid>,
    Json(request): Json<ReplyToReviewRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    requester.require_role(UserRole::Seller)?;
    let reply = state
        .services
        .reviews
        .reply_to_review(requester, review_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(reply))))
}

/// DELETE /api/v1/reviews/:id
pub async fn delete_review(
    State(state): State<AppState>,
    requester: AuthUser,
    Path(review_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .reviews
        .delete_review(requester, review_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/medicines/:id/reviews
pub async fn list_medicine_reviews(
    State(state): State<AppState>,
    Path(medicine_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let reviews = state
        .services
        .reviews
        .list_reviews_for_medicine(medicine_id, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(reviews)))
}

/// GET /api/v1/medicines/:id/reviews/stats
pub async fn review_stats(
    State(state): State<AppState>,
    Path(medicine_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let stats = state.services.reviews.review_stats(medicine_id).await?;
    Ok(Json(ApiResponse::success(ReviewStatsResponse::from(stats))))
}
