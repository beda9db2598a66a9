use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::order::{Entity as OrderEntity, Model as OrderModel},
    entities::order_item::{self, Entity as OrderItemEntity},
    entities::review::{self, ActiveModel as ReviewActiveModel, Entity as ReviewEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    models::order::OrderStatus,
    models::review::{ReviewAuthorRole, ReviewStats, MAX_RATING, MIN_RATING},
};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateReviewRequest {
    pub order_id: Uuid,
    pub medicine_id: Uuid,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i16,
    #[validate(length(max = 500, message = "Comment must be at most 500 characters"))]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ReplyToReviewRequest {
    #[validate(length(min = 1, max = 500, message = "Comment is required"))]
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReviewResponse {
    pub id: Uuid,
    pub medicine_id: Uuid,
    pub order_id: Uuid,
    pub author_id: Uuid,
    pub author_role: ReviewAuthorRole,
    pub rating: Option<i16>,
    pub comment: Option<String>,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<review::Model> for ReviewResponse {
    fn from(model: review::Model) -> Self {
        Self {
            id: model.id,
            medicine_id: model.medicine_id,
            order_id: model.order_id,
            author_id: model.author_id,
            author_role: model.author_role,
            rating: model.rating,
            comment: model.comment,
            parent_id: model.parent_id,
            created_at: model.created_at,
        }
    }
}

/// A top-level customer review joined with its seller reply, if any.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReviewThread {
    pub review: ReviewResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReviewResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewThreadListResponse {
    pub reviews: Vec<ReviewThread>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Result of the pre-submission eligibility check the UI runs for each
/// delivered order line.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewEligibility {
    pub eligible: bool,
    pub already_reviewed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_review: Option<ReviewThread>,
}

/// Service enforcing the review-thread rules: one rated review per
/// purchased item per order, one seller reply per review, both gated on
/// delivery and on the author being the right party.
#[derive(Clone)]
pub struct ReviewService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl ReviewService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Read-only check whether the requester may review this order line.
    /// Idempotent; the authoritative validation happens again inside
    /// [`create_review`](Self::create_review).
    #[instrument(skip(self), fields(order_id = %order_id, medicine_id = %medicine_id))]
    pub async fn check_eligibility(
        &self,
        order_id: Uuid,
        medicine_id: Uuid,
        requester: AuthUser,
    ) -> Result<ReviewEligibility, ServiceError> {
        let order = self.find_order(order_id).await?;
        if order.customer_id != requester.id {
            return Err(ServiceError::Forbidden(
                "not permitted to review this order".to_string(),
            ));
        }

        if !self.order_contains_medicine(order_id, medicine_id).await? {
            return Err(ServiceError::ValidationError(format!(
                "Medicine {} is not part of order {}",
                medicine_id, order.order_number
            )));
        }

        if order.status != OrderStatus::Delivered {
            return Ok(ReviewEligibility {
                eligible: false,
                already_reviewed: false,
                reason: Some("order not delivered".to_string()),
                existing_review: None,
            });
        }

        match self
            .find_top_level_review(requester.id, order_id, medicine_id)
            .await?
        {
            Some(existing) => {
                let reply = self.find_reply(existing.id).await?;
                Ok(ReviewEligibility {
                    eligible: false,
                    already_reviewed: true,
                    reason: Some("already reviewed".to_string()),
                    existing_review: Some(ReviewThread {
                        review: existing.into(),
                        reply: reply.map(Into::into),
                    }),
                })
            }
            None => Ok(ReviewEligibility {
                eligible: true,
                already_reviewed: false,
                reason: None,
                existing_review: None,
            }),
        }
    }

    /// Creates a top-level customer review for a delivered order line.
    /// Client-side eligibility checks are never trusted; everything is
    /// re-validated here, and the partial unique index catches any
    /// duplicate that slips between check and insert.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, medicine_id = %request.medicine_id))]
    pub async fn create_review(
        &self,
        requester: AuthUser,
        request: CreateReviewRequest,
    ) -> Result<ReviewResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let order = self.find_order(request.order_id).await?;
        if order.customer_id != requester.id {
            return Err(ServiceError::Forbidden(
                "only the order's customer may review it".to_string(),
            ));
        }

        if !self
            .order_contains_medicine(request.order_id, request.medicine_id)
            .await?
        {
            return Err(ServiceError::PreconditionFailed(format!(
                "Medicine {} is not part of order {}",
                request.medicine_id, order.order_number
            )));
        }

        if order.status != OrderStatus::Delivered {
            return Err(ServiceError::PreconditionFailed(
                "order must be delivered before it can be reviewed".to_string(),
            ));
        }

        if self
            .find_top_level_review(requester.id, request.order_id, request.medicine_id)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(
                "a review for this item already exists".to_string(),
            ));
        }

        let review = ReviewActiveModel {
            id: Set(Uuid::new_v4()),
            medicine_id: Set(request.medicine_id),
            order_id: Set(request.order_id),
            author_id: Set(requester.id),
            author_role: Set(ReviewAuthorRole::Customer),
            rating: Set(Some(request.rating)),
            comment: Set(request.comment.filter(|c| !c.trim().is_empty())),
            parent_id: Set(None),
            created_at: Set(Utc::now()),
        };

        let review = review.insert(&*self.db).await.map_err(|e| {
            ServiceError::from_insert_err(e, "a review for this item already exists")
        })?;

        info!(review_id = %review.id, "Review created");
        self.emit(Event::ReviewCreated {
            review_id: review.id,
            medicine_id: review.medicine_id,
        })
        .await;

        Ok(review.into())
    }

    /// Attaches the seller's single reply to a top-level review.
    #[instrument(skip(self, request), fields(review_id = %review_id))]
    pub async fn reply_to_review(
        &self,
        requester: AuthUser,
        review_id: Uuid,
        request: ReplyToReviewRequest,
    ) -> Result<ReviewResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let parent = self.find_review(review_id).await?;
        if parent.parent_id.is_some() {
            return Err(ServiceError::ValidationError(
                "cannot reply to a reply".to_string(),
            ));
        }

        let order = self.find_order(parent.order_id).await?;
        if order.seller_id != requester.id {
            return Err(ServiceError::Forbidden(
                "only the order's seller may reply to this review".to_string(),
            ));
        }

        if self.find_reply(review_id).await?.is_some() {
            return Err(ServiceError::Conflict(
                "this review already has a reply".to_string(),
            ));
        }

        let reply = ReviewActiveModel {
            id: Set(Uuid::new_v4()),
            medicine_id: Set(parent.medicine_id),
            order_id: Set(parent.order_id),
            author_id: Set(requester.id),
            author_role: Set(ReviewAuthorRole::Seller),
            rating: Set(None),
            comment: Set(Some(request.comment)),
            parent_id: Set(Some(review_id)),
            created_at: Set(Utc::now()),
        };

        let reply = reply
            .insert(&*self.db)
            .await
            .map_err(|e| ServiceError::from_insert_err(e, "this review already has a reply"))?;

        info!(reply_id = %reply.id, parent_review_id = %review_id, "Review reply created");
        self.emit(Event::ReviewReplyCreated {
            reply_id: reply.id,
            parent_review_id: review_id,
        })
        .await;

        Ok(reply.into())
    }

    /// Deletes a review row. Author-only. Deleting a top-level review
    /// leaves its reply in place; the orphaned reply stays retrievable by
    /// medicine but loses its thread anchor.
    #[instrument(skip(self), fields(review_id = %review_id))]
    pub async fn delete_review(
        &self,
        requester: AuthUser,
        review_id: Uuid,
    ) -> Result<(), ServiceError> {
        let review = self.find_review(review_id).await?;
        if review.author_id != requester.id {
            return Err(ServiceError::Forbidden(
                "only the author may delete a review".to_string(),
            ));
        }

        review
            .delete(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        info!(review_id = %review_id, "Review deleted");
        self.emit(Event::ReviewDeleted(review_id)).await;

        Ok(())
    }

    /// Lists review threads for a medicine, newest first. Replies are
    /// fetched in one pass and joined to their parents in memory.
    #[instrument(skip(self), fields(medicine_id = %medicine_id))]
    pub async fn list_reviews_for_medicine(
        &self,
        medicine_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<ReviewThreadListResponse, ServiceError> {
        let page = page.max(1);
        let per_page = limit.clamp(1, 100);

        let paginator = ReviewEntity::find()
            .filter(review::Column::MedicineId.eq(medicine_id))
            .filter(review::Column::ParentId.is_null())
            .order_by_desc(review::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let top_level = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let parent_ids: Vec<Uuid> = top_level.iter().map(|r| r.id).collect();
        let replies = if parent_ids.is_empty() {
            Vec::new()
        } else {
            ReviewEntity::find()
                .filter(review::Column::ParentId.is_in(parent_ids))
                .all(&*self.db)
                .await
                .map_err(ServiceError::DatabaseError)?
        };

        Ok(ReviewThreadListResponse {
            reviews: assemble_threads(top_level, replies),
            total,
            page,
            per_page,
        })
    }

    /// Aggregate rating stats for a medicine, over top-level reviews only.
    #[instrument(skip(self), fields(medicine_id = %medicine_id))]
    pub async fn review_stats(&self, medicine_id: Uuid) -> Result<ReviewStats, ServiceError> {
        let top_level = ReviewEntity::find()
            .filter(review::Column::MedicineId.eq(medicine_id))
            .filter(review::Column::ParentId.is_null())
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let ratings: Vec<i16> = top_level
            .iter()
            .filter_map(|review| review.rating)
            .filter(|rating| (MIN_RATING..=MAX_RATING).contains(rating))
            .collect();

        Ok(ReviewStats::from_ratings(&ratings))
    }

    async fn find_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn find_review(&self, review_id: Uuid) -> Result<review::Model, ServiceError> {
        ReviewEntity::find_by_id(review_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Review {} not found", review_id)))
    }

    async fn find_top_level_review(
        &self,
        author_id: Uuid,
        order_id: Uuid,
        medicine_id: Uuid,
    ) -> Result<Option<review::Model>, ServiceError> {
        ReviewEntity::find()
            .filter(review::Column::AuthorId.eq(author_id))
            .filter(review::Column::OrderId.eq(order_id))
            .filter(review::Column::MedicineId.eq(medicine_id))
            .filter(review::Column::ParentId.is_null())
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn find_reply(&self, parent_id: Uuid) -> Result<Option<review::Model>, ServiceError> {
        ReviewEntity::find()
            .filter(review::Column::ParentId.eq(parent_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn order_contains_medicine(
        &self,
        order_id: Uuid,
        medicine_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let count = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .filter(order_item::Column::MedicineId.eq(medicine_id))
            .count(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(count > 0)
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send review event");
            }
        }
    }
}

fn assemble_threads(top_level: Vec<review::Model>, replies: Vec<review::Model>) -> Vec<ReviewThread> {
    let mut by_parent: std::collections::HashMap<Uuid, review::Model> = replies
        .into_iter()
        .filter_map(|reply| reply.parent_id.map(|parent| (parent, reply)))
        .collect();

    top_level
        .into_iter()
        .map(|review| {
            let reply = by_parent.remove(&review.id);
            ReviewThread {
                review: review.into(),
                reply: reply.map(Into::into),
            }
        })
        .collect()
}
