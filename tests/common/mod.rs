use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use pharmacy_api::{
    auth::{AuthUser, UserRole},
    config::AppConfig,
    db, entities, events,
    handlers::AppServices,
    models::order::OrderStatus,
    services::catalog::SqlCatalog,
    services::orders::OrderService,
    services::reviews::ReviewService,
    AppState,
};

/// Helper harness for spinning up an application backed by an in-memory
/// SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:", "test");
        // A single connection keeps every query on the same in-memory DB.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let pool = Arc::new(pool);

        let (event_sender, event_rx) = events::channel(64);
        let event_task = tokio::spawn(events::process_events(event_rx));
        let event_sender_arc = Arc::new(event_sender.clone());

        let catalog = Arc::new(SqlCatalog::new(pool.clone()));
        let services = AppServices {
            orders: Arc::new(OrderService::new(
                pool.clone(),
                catalog,
                Some(event_sender_arc.clone()),
            )),
            reviews: Arc::new(ReviewService::new(pool.clone(), Some(event_sender_arc))),
        };

        let state = AppState {
            db: pool,
            config: cfg,
            event_sender,
            services,
        };

        let router = pharmacy_api::handlers::routes().with_state(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    /// Sends a request with the given identity headers attached.
    pub async fn request_as(
        &self,
        method: Method,
        uri: &str,
        user: AuthUser,
        body: Option<Value>,
    ) -> Response {
        self.send(method, uri, Some(user), body).await
    }

    /// Sends a request without identity headers.
    pub async fn request_anonymous(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        self.send(method, uri, None, body).await
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        user: Option<AuthUser>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder
                .header("x-user-id", user.id.to_string())
                .header("x-user-role", user.role.to_string());
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&json).expect("body json")))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    /// Inserts a catalog row directly; catalog CRUD is out of scope for
    /// the service itself.
    pub async fn seed_medicine(
        &self,
        seller_id: Uuid,
        name: &str,
        base_price: Decimal,
        discount_percent: Decimal,
        stock: i32,
        is_active: bool,
    ) -> entities::medicine::Model {
        let medicine = entities::medicine::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(seller_id),
            name: Set(name.to_string()),
            base_price: Set(base_price),
            discount_percent: Set(discount_percent),
            stock: Set(stock),
            is_active: Set(is_active),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };

        medicine
            .insert(&*self.state.db)
            .await
            .expect("seed medicine")
    }

    /// Drives an order through the seller's forward transitions up to the
    /// requested status.
    pub async fn advance_order(&self, order_id: Uuid, seller_id: Uuid, target: OrderStatus) {
        let seller = AuthUser::new(seller_id, UserRole::Seller);
        for status in [
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            self.state
                .services
                .orders
                .update_order_status(order_id, seller, status)
                .await
                .expect("advance order");
            if status == target {
                break;
            }
        }
    }
}

pub fn customer(id: Uuid) -> AuthUser {
    AuthUser::new(id, UserRole::Customer)
}

pub fn seller(id: Uuid) -> AuthUser {
    AuthUser::new(id, UserRole::Seller)
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
