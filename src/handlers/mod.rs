use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::services::{orders::OrderService, reviews::ReviewService};
use crate::AppState;

pub mod health;
pub mod orders;
pub mod reviews;

/// Service bundle threaded through the router state.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub reviews: Arc<ReviewService>,
}

pub fn routes() -> Router<AppState> {
    let api = Router::new()
        .route(
            "/orders",
            post(orders::create_order).get(orders::list_orders),
        )
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/status", put(orders::update_order_status))
        .route("/orders/:id/cancel", post(orders::cancel_order))
        .route(
            "/orders/:id/items/:medicine_id/review-eligibility",
            get(reviews::check_eligibility),
        )
        .route("/reviews", post(reviews::create_review))
        .route("/reviews/:id/reply", post(reviews::reply_to_review))
        .route("/reviews/:id", delete(reviews::delete_review))
        .route("/medicines/:id/reviews", get(reviews::list_medicine_reviews))
        .route(
            "/medicines/:id/reviews/stats",
            get(reviews::review_stats),
        );

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1", api)
}
