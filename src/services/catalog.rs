use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::EntityTrait;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::medicine::{Entity as MedicineEntity, Model as MedicineModel},
    errors::ServiceError,
};

/// What the order engine needs to know about a medicine at order time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MedicineSnapshot {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    pub base_price: Decimal,
    pub discount_percent: Decimal,
    pub is_active: bool,
    pub stock: i32,
}

impl MedicineSnapshot {
    /// Unit price with the catalog discount applied, rounded half-up to
    /// two decimals. This is the per-line snapshot stored on order items.
    pub fn discounted_unit_price(&self) -> Decimal {
        let factor = Decimal::ONE - self.discount_percent / Decimal::from(100);
        (self.base_price * factor).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

impl From<MedicineModel> for MedicineSnapshot {
    fn from(model: MedicineModel) -> Self {
        Self {
            id: model.id,
            seller_id: model.seller_id,
            name: model.name,
            base_price: model.base_price,
            discount_percent: model.discount_percent,
            is_active: model.is_active,
            stock: model.stock,
        }
    }
}

/// Read-only medicine lookup. The catalog itself (CRUD, stock mutation,
/// images) belongs to another service; order creation only needs this
/// resolution at call time.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn resolve_medicine(
        &self,
        medicine_id: Uuid,
    ) -> Result<Option<MedicineSnapshot>, ServiceError>;
}

/// Catalog lookup backed by the shared database.
#[derive(Clone)]
pub struct SqlCatalog {
    db: Arc<DbPool>,
}

impl SqlCatalog {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogLookup for SqlCatalog {
    #[instrument(skip(self), fields(medicine_id = %medicine_id))]
    async fn resolve_medicine(
        &self,
        medicine_id: Uuid,
    ) -> Result<Option<MedicineSnapshot>, ServiceError> {
        let medicine = MedicineEntity::find_by_id(medicine_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(medicine.map(MedicineSnapshot::from))
    }
}
