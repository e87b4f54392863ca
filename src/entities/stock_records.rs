use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::StockRecord;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_records")]
pub struct Model {
    /// `VariantKey::storage_key`
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    pub product_id: String,
    pub color_id: String,
    pub dimension_id: Option<String>,
    pub product_name: String,
    pub free_stock: i64,
    pub reserved_stock: i64,
    pub incoming_stock: i64,
    pub incoming_reserved_stock: i64,
    pub version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for StockRecord {
    fn from(model: Model) -> Self {
        StockRecord {
            product_id: model.product_id,
            color_id: model.color_id,
            dimension_id: model.dimension_id,
            product_name: model.product_name,
            free_stock: model.free_stock,
            reserved_stock: model.reserved_stock,
            incoming_stock: model.incoming_stock,
            incoming_reserved_stock: model.incoming_reserved_stock,
        }
    }
}
