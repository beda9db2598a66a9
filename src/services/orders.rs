use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{AuthUser, UserRole},
    db::DbPool,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
    },
    entities::order_item::{
        self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
        Model as OrderItemModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::order::{OrderStatus, PaymentMethod},
    services::catalog::CatalogLookup,
};

/// Request/Response types for the order service
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    pub seller_id: Uuid,
    #[validate(length(min = 1, max = 500, message = "Shipping address is required"))]
    pub shipping_address: String,
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<CreateOrderItem>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderItem {
    pub medicine_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub seller_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub shipping_address: String,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub medicine_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Filters applied to the order listing, on top of the requester's own
/// visibility scope (customers see their orders, sellers theirs).
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct OrderListFilter {
    pub status: Option<OrderStatus>,
    /// Substring match on the order number.
    pub search: Option<String>,
    pub page: u64,
    pub limit: u64,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

/// Service for managing the order lifecycle: creation, forward status
/// transitions and cancellation. All mutations are guarded by the order's
/// `version` column so concurrent conflicting transitions leave exactly
/// one winner.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    catalog: Arc<dyn CatalogLookup>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        catalog: Arc<dyn CatalogLookup>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            catalog,
            event_sender,
        }
    }

    /// Creates a new order in status `placed`.
    ///
    /// Every line's medicine must resolve to an active catalog entry owned
    /// by the requested seller with sufficient stock. Unit prices are
    /// snapshotted with the discount applied; the total is computed here
    /// and never again. Stock itself is not decremented; inventory
    /// accounting belongs to the catalog service.
    #[instrument(skip(self, request), fields(customer_id = %requester.id, seller_id = %request.seller_id))]
    pub async fn create_order(
        &self,
        requester: AuthUser,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let mut lines: Vec<(Uuid, i32, Decimal)> = Vec::with_capacity(request.items.len());
        for item in &request.items {
            item.validate()
                .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
            let medicine = self
                .catalog
                .resolve_medicine(item.medicine_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Medicine {} not found",
                        item.medicine_id
                    ))
                })?;

            if !medicine.is_active {
                return Err(ServiceError::ValidationError(format!(
                    "Medicine {} is not available",
                    medicine.name
                )));
            }
            if medicine.seller_id != request.seller_id {
                return Err(ServiceError::ValidationError(format!(
                    "Medicine {} does not belong to the selected seller",
                    medicine.name
                )));
            }
            if item.quantity > medicine.stock {
                return Err(ServiceError::ValidationError(format!(
                    "Insufficient stock for {}: requested {}, available {}",
                    medicine.name, item.quantity, medicine.stock
                )));
            }

            lines.push((
                item.medicine_id,
                item.quantity,
                medicine.discounted_unit_price(),
            ));
        }

        let total_amount: Decimal = lines
            .iter()
            .map(|(_, quantity, unit_price)| *unit_price * Decimal::from(*quantity))
            .sum();

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_number = generate_order_number(now);

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_active_model = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            customer_id: Set(requester.id),
            seller_id: Set(request.seller_id),
            status: Set(OrderStatus::Placed),
            total_amount: Set(total_amount),
            shipping_address: Set(request.shipping_address),
            payment_method: Set(PaymentMethod::CashOnDelivery),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };

        let order_model = order_active_model.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order");
            ServiceError::DatabaseError(e)
        })?;

        let mut item_models = Vec::with_capacity(lines.len());
        for (medicine_id, quantity, unit_price) in lines {
            let item = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                medicine_id: Set(medicine_id),
                quantity: Set(quantity),
                unit_price: Set(unit_price),
                total_price: Set(unit_price * Decimal::from(quantity)),
                created_at: Set(now),
            };
            let item = item.insert(&txn).await.map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to create order item");
                ServiceError::DatabaseError(e)
            })?;
            item_models.push(item);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, order_number = %order_model.order_number, "Order created");

        self.emit(Event::OrderCreated(order_id)).await;

        Ok(model_to_response(order_model, item_models))
    }

    /// Retrieves an order with its items. Only the order's customer, its
    /// seller or an admin may read it.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        requester: AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.find_order(order_id).await?;
        check_order_access(&order, requester)?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(model_to_response(order, items))
    }

    /// Lists orders visible to the requester, with pagination.
    #[instrument(skip(self, filter))]
    pub async fn list_orders(
        &self,
        requester: AuthUser,
        filter: OrderListFilter,
    ) -> Result<OrderListResponse, ServiceError> {
        let mut query = OrderEntity::find();

        query = match requester.role {
            UserRole::Customer => query.filter(order::Column::CustomerId.eq(requester.id)),
            UserRole::Seller => query.filter(order::Column::SellerId.eq(requester.id)),
            UserRole::Admin => query,
        };

        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            query = query.filter(order::Column::OrderNumber.contains(search.trim()));
        }

        let sort_column = match filter.sort_by.as_deref() {
            Some("updated_at") => order::Column::UpdatedAt,
            Some("total_amount") => order::Column::TotalAmount,
            _ => order::Column::CreatedAt,
        };
        query = match filter.sort_order.as_deref() {
            Some("asc") => query.order_by_asc(sort_column),
            _ => query.order_by_desc(sort_column),
        };

        let page = filter.page.max(1);
        let per_page = filter.limit.clamp(1, 100);

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let orders = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(OrderListResponse {
            orders: orders
                .into_iter()
                .map(|order| model_to_response(order, Vec::new()))
                .collect(),
            total,
            page,
            per_page,
        })
    }

    /// Advances an order along placed → processing → shipped → delivered.
    ///
    /// Seller-only; cancellation has its own operation and is rejected
    /// here. The write is conditional on the version read, so of two
    /// racing transitions exactly one commits and the loser fails against
    /// the winner's status.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        requester: AuthUser,
        new_status: OrderStatus,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.find_order(order_id).await?;

        if requester.id != order.seller_id {
            return Err(ServiceError::Forbidden(
                "only the order's seller may update its status".to_string(),
            ));
        }

        if !order.status.can_advance_to(new_status) {
            return Err(ServiceError::InvalidTransition {
                from: order.status,
                to: new_status,
            });
        }

        let (old_status, updated) = self.transition(order, new_status).await?;

        info!(order_id = %order_id, from = %old_status, to = %new_status, "Order status updated");
        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status,
            new_status,
        })
        .await;

        Ok(model_to_response(updated, Vec::new()))
    }

    /// Cancels an order that has not yet shipped. Customer-only; terminal.
    /// Stock is not restored because it was never decremented.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        requester: AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.find_order(order_id).await?;

        if requester.id != order.customer_id {
            return Err(ServiceError::Forbidden(
                "only the order's customer may cancel it".to_string(),
            ));
        }

        if !order.status.can_cancel() {
            return Err(ServiceError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        let (old_status, updated) = self.transition(order, OrderStatus::Cancelled).await?;

        info!(order_id = %order_id, from = %old_status, "Order cancelled");
        self.emit(Event::OrderCancelled(order_id)).await;

        Ok(model_to_response(updated, Vec::new()))
    }

    /// Applies a validated transition as a conditional write on the
    /// version read. Zero rows affected means another transition won the
    /// race; re-read and report against the current status.
    async fn transition(
        &self,
        order: OrderModel,
        new_status: OrderStatus,
    ) -> Result<(OrderStatus, OrderModel), ServiceError> {
        let now = Utc::now();
        let old_status = order.status;

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .col_expr(order::Column::Version, Expr::value(order.version + 1))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            let current = self.find_order(order.id).await?;
            warn!(
                order_id = %order.id,
                current_status = %current.status,
                attempted = %new_status,
                "Concurrent transition lost the race"
            );
            return Err(ServiceError::InvalidTransition {
                from: current.status,
                to: new_status,
            });
        }

        Ok((
            old_status,
            OrderModel {
                status: new_status,
                updated_at: now,
                version: order.version + 1,
                ..order
            },
        ))
    }

    async fn find_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send order event");
            }
        }
    }
}

fn check_order_access(order: &OrderModel, requester: AuthUser) -> Result<(), ServiceError> {
    let allowed = match requester.role {
        UserRole::Admin => true,
        UserRole::Customer => order.customer_id == requester.id,
        UserRole::Seller => order.seller_id == requester.id,
    };
    if allowed {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "not permitted to access this order".to_string(),
        ))
    }
}

/// Order numbers are presentational, e.g. `RX-20250114-7K2M9Q`. The random
/// suffix makes collisions vanishingly unlikely; the unique index on the
/// column backstops them.
fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("RX-{}-{}", now.format("%Y%m%d"), suffix)
}

fn model_to_response(model: OrderModel, items: Vec<OrderItemModel>) -> OrderResponse {
    OrderResponse {
        id: model.id,
        order_number: model.order_number,
        customer_id: model.customer_id,
        seller_id: model.seller_id,
        status: model.status,
        total_amount: model.total_amount,
        shipping_address: model.shipping_address,
        payment_method: model.payment_method,
        created_at: model.created_at,
        updated_at: model.updated_at,
        version: model.version,
        items: items
            .into_iter()
            .map(|item| OrderItemResponse {
                id: item.id,
                medicine_id: item.medicine_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.total_price,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_number_format() {
        let now = Utc::now();
        let number = generate_order_number(now);
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "RX");
        assert_eq!(parts[1], now.format("%Y%m%d").to_string());
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn order_numbers_do_not_repeat() {
        let now = Utc::now();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(generate_order_number(now)));
        }
    }

    #[test]
    fn model_to_response_carries_items() {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let model = OrderModel {
            id: order_id,
            order_number: "RX-20250114-ABC123".to_string(),
            customer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            status: OrderStatus::Placed,
            total_amount: dec!(25.00),
            shipping_address: "12 Harbor Lane, Springfield".to_string(),
            payment_method: PaymentMethod::CashOnDelivery,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        let items = vec![OrderItemModel {
            id: Uuid::new_v4(),
            order_id,
            medicine_id: Uuid::new_v4(),
            quantity: 2,
            unit_price: dec!(10.00),
            total_price: dec!(20.00),
            created_at: now,
        }];

        let response = model_to_response(model, items);
        assert_eq!(response.id, order_id);
        assert_eq!(response.status, OrderStatus::Placed);
        assert_eq!(response.total_amount, dec!(25.00));
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].total_price, dec!(20.00));
    }

    #[test]
    fn access_check_scopes_by_role() {
        let now = Utc::now();
        let customer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let order = OrderModel {
            id: Uuid::new_v4(),
            order_number: "RX-20250114-XYZ789".to_string(),
            customer_id: customer,
            seller_id: seller,
            status: OrderStatus::Placed,
            total_amount: dec!(5.00),
            shipping_address: "addr".to_string(),
            payment_method: PaymentMethod::CashOnDelivery,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        assert!(check_order_access(&order, AuthUser::new(customer, UserRole::Customer)).is_ok());
        assert!(check_order_access(&order, AuthUser::new(seller, UserRole::Seller)).is_ok());
        assert!(
            check_order_access(&order, AuthUser::new(Uuid::new_v4(), UserRole::Admin)).is_ok()
        );
        assert!(
            check_order_access(&order, AuthUser::new(Uuid::new_v4(), UserRole::Customer)).is_err()
        );
        assert!(
            check_order_access(&order, AuthUser::new(customer, UserRole::Seller)).is_err()
        );
    }
}
