use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::review;
use crate::errors::ServiceError;

pub const MIN_RATING: i16 = 1;
pub const MAX_RATING: i16 = 5;
pub const MAX_COMMENT_LEN: usize = 500;

/// Who authored a review row. Customers write top-level rated reviews,
/// sellers write replies.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ReviewAuthorRole {
    #[sea_orm(string_value = "customer")]
    Customer,
    #[sea_orm(string_value = "seller")]
    Seller,
}

/// Domain view of a review row. The flat table stores both shapes with
/// nullable columns; converting into this union rejects rows that mix
/// them, so a reply can never carry a rating past this boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReviewNode {
    TopLevel {
        id: Uuid,
        medicine_id: Uuid,
        order_id: Uuid,
        customer_id: Uuid,
        rating: i16,
        comment: Option<String>,
        created_at: DateTime<Utc>,
    },
    Reply {
        id: Uuid,
        medicine_id: Uuid,
        order_id: Uuid,
        seller_id: Uuid,
        parent_id: Uuid,
        comment: String,
        created_at: DateTime<Utc>,
    },
}

impl ReviewNode {
    pub fn id(&self) -> Uuid {
        match self {
            ReviewNode::TopLevel { id, .. } | ReviewNode::Reply { id, .. } => *id,
        }
    }

    pub fn author_id(&self) -> Uuid {
        match self {
            ReviewNode::TopLevel { customer_id, .. } => *customer_id,
            ReviewNode::Reply { seller_id, .. } => *seller_id,
        }
    }

    pub fn is_top_level(&self) -> bool {
        matches!(self, ReviewNode::TopLevel { .. })
    }
}

impl TryFrom<review::Model> for ReviewNode {
    type Error = ServiceError;

    fn try_from(row: review::Model) -> Result<Self, Self::Error> {
        match (row.parent_id, row.author_role) {
            (None, ReviewAuthorRole::Customer) => {
                let rating = row.rating.ok_or_else(|| {
                    ServiceError::InternalError(format!("review {} has no rating", row.id))
                })?;
                if !(MIN_RATING..=MAX_RATING).contains(&rating) {
                    return Err(ServiceError::InternalError(format!(
                        "review {} has out-of-range rating {rating}",
                        row.id
                    )));
                }
                Ok(ReviewNode::TopLevel {
                    id: row.id,
                    medicine_id: row.medicine_id,
                    order_id: row.order_id,
                    customer_id: row.author_id,
                    rating,
                    comment: row.comment,
                    created_at: row.created_at,
                })
            }
            (Some(parent_id), ReviewAuthorRole::Seller) => {
                if row.rating.is_some() {
                    return Err(ServiceError::InternalError(format!(
                        "reply {} carries a rating",
                        row.id
                    )));
                }
                let comment = row.comment.filter(|c| !c.trim().is_empty()).ok_or_else(|| {
                    ServiceError::InternalError(format!("reply {} has no comment", row.id))
                })?;
                Ok(ReviewNode::Reply {
                    id: row.id,
                    medicine_id: row.medicine_id,
                    order_id: row.order_id,
                    seller_id: row.author_id,
                    parent_id,
                    comment,
                    created_at: row.created_at,
                })
            }
            (None, ReviewAuthorRole::Seller) => Err(ServiceError::InternalError(format!(
                "top-level review {} authored by a seller",
                row.id
            ))),
            (Some(_), ReviewAuthorRole::Customer) => Err(ServiceError::InternalError(format!(
                "reply {} authored by a customer",
                row.id
            ))),
        }
    }
}

/// Aggregate rating figures for one medicine, computed over top-level
/// reviews only (replies carry no rating).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReviewStats {
    pub average: Decimal,
    pub count: u64,
    /// Number of top-level reviews per star value, index 0 = one star.
    pub distribution: [u64; 5],
}

impl ReviewStats {
    pub fn from_ratings(ratings: &[i16]) -> Self {
        let mut distribution = [0u64; 5];
        let mut sum: i64 = 0;
        for &rating in ratings {
            debug_assert!((MIN_RATING..=MAX_RATING).contains(&rating));
            distribution[(rating - 1) as usize] += 1;
            sum += i64::from(rating);
        }

        let count = ratings.len() as u64;
        let average = if count == 0 {
            Decimal::ZERO
        } else {
            (Decimal::from(sum) / Decimal::from(count)).round_dp(2)
        };

        Self {
            average,
            count,
            distribution,
        }
    }

    /// Share of each star value in percent, for rendering rating bars.
    /// All zeros when there are no reviews.
    pub fn distribution_percentages(&self) -> [Decimal; 5] {
        let mut out = [Decimal::ZERO; 5];
        if self.count == 0 {
            return out;
        }
        let total = Decimal::from(self.count);
        for (slot, &bucket) in out.iter_mut().zip(self.distribution.iter()) {
            *slot = (Decimal::from(bucket) * Decimal::from(100) / total).round_dp(1);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn top_level_row() -> review::Model {
        review::Model {
            id: Uuid::new_v4(),
            medicine_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            author_role: ReviewAuthorRole::Customer,
            rating: Some(4),
            comment: Some("works well".into()),
            parent_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn top_level_row_converts() {
        let row = top_level_row();
        let node = ReviewNode::try_from(row.clone()).unwrap();
        assert_matches!(node, ReviewNode::TopLevel { rating: 4, .. });
        assert_eq!(node.id(), row.id);
        assert_eq!(node.author_id(), row.author_id);
        assert!(node.is_top_level());
    }

    #[test]
    fn reply_row_converts() {
        let parent = Uuid::new_v4();
        let row = review::Model {
            author_role: ReviewAuthorRole::Seller,
            rating: None,
            comment: Some("thanks for the feedback".into()),
            parent_id: Some(parent),
            ..top_level_row()
        };
        let node = ReviewNode::try_from(row).unwrap();
        assert_matches!(node, ReviewNode::Reply { parent_id, .. } if parent_id == parent);
        assert!(!node.is_top_level());
    }

    #[test]
    fn malformed_rows_are_rejected() {
        // top-level without a rating
        let row = review::Model {
            rating: None,
            ..top_level_row()
        };
        assert_matches!(
            ReviewNode::try_from(row),
            Err(ServiceError::InternalError(_))
        );

        // reply carrying a rating
        let row = review::Model {
            author_role: ReviewAuthorRole::Seller,
            rating: Some(5),
            parent_id: Some(Uuid::new_v4()),
            ..top_level_row()
        };
        assert_matches!(
            ReviewNode::try_from(row),
            Err(ServiceError::InternalError(_))
        );

        // seller-authored top-level row
        let row = review::Model {
            author_role: ReviewAuthorRole::Seller,
            ..top_level_row()
        };
        assert_matches!(
            ReviewNode::try_from(row),
            Err(ServiceError::InternalError(_))
        );

        // customer-authored reply
        let row = review::Model {
            parent_id: Some(Uuid::new_v4()),
            ..top_level_row()
        };
        assert_matches!(
            ReviewNode::try_from(row),
            Err(ServiceError::InternalError(_))
        );
    }

    #[test]
    fn stats_over_empty_input_are_zero() {
        let stats = ReviewStats::from_ratings(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.average, Decimal::ZERO);
        assert_eq!(stats.distribution, [0; 5]);
        assert_eq!(stats.distribution_percentages(), [Decimal::ZERO; 5]);
    }

    #[test]
    fn stats_average_and_distribution() {
        let stats = ReviewStats::from_ratings(&[5, 4, 4, 3, 5, 1]);
        assert_eq!(stats.count, 6);
        assert_eq!(stats.distribution, [1, 0, 1, 2, 2]);
        assert_eq!(stats.average, dec!(3.67));
    }

    #[test]
    fn distribution_percentages_sum_to_one_hundred() {
        let stats = ReviewStats::from_ratings(&[1, 2, 2, 3, 3, 3, 4]);
        let total: Decimal = stats.distribution_percentages().into_iter().sum();
        assert!((total - dec!(100)).abs() <= dec!(0.5), "total was {total}");
    }
}
