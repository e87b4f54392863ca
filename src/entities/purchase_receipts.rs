use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{errors::ServiceError, models::PurchaseReceipt};

/// Receipts are stored whole as JSON in `body`; the other columns are copies
/// of header fields used for lookups and ordering.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchase_receipts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub store_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub receipt_id: String,
    pub receipt_no: String,
    pub created_at: DateTimeUtc,
    pub version: i64,
    #[sea_orm(column_type = "Text")]
    pub body: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn to_receipt(&self) -> Result<PurchaseReceipt, ServiceError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}
