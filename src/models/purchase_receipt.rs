use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;
use validator::Validate;

use super::pending_request::PendingRequest;
use super::stock_record::VariantKey;

/// Lifecycle of a single receipt line.
///
/// Declaration order is pipeline order; `Cancelled` sits outside the pipeline.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum ItemStatus {
    Pending,
    Approved,
    InProduction,
    Shipping,
    Completed,
    Cancelled,
}

impl ItemStatus {
    /// Position in the forward pipeline; `None` for `Cancelled`.
    pub fn pipeline_rank(self) -> Option<u8> {
        match self {
            ItemStatus::Pending => Some(0),
            ItemStatus::Approved => Some(1),
            ItemStatus::InProduction => Some(2),
            ItemStatus::Shipping => Some(3),
            ItemStatus::Completed => Some(4),
            ItemStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Cancelled)
    }

    /// Still travelling through the pipeline and counted as incoming stock.
    pub fn is_in_flight(self) -> bool {
        !self.is_terminal()
    }
}

/// Whether a line replenishes free stock or fulfils a customer order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum ItemType {
    Stock,
    Order,
}

/// Line item as supplied by callers before it joins a receipt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewPurchaseItem {
    #[validate(length(min = 1, message = "productId is required"))]
    pub product_id: String,
    #[validate(length(min = 1, message = "colorId is required"))]
    pub color_id: String,
    #[serde(default)]
    pub dimension_id: Option<String>,
    #[serde(default)]
    pub cushion_id: Option<String>,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: u32,
    pub amount: Decimal,
    #[serde(default)]
    pub explanation: String,
    pub item_type: ItemType,
    #[serde(default)]
    pub external_request_id: Option<String>,
}

impl NewPurchaseItem {
    /// Seeds an order line from an upstream demand record.
    pub fn from_pending_request(
        request: &PendingRequest,
        amount: Decimal,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            product_id: request.product_id.clone(),
            color_id: request.color_id.clone(),
            dimension_id: request.dimension_id.clone(),
            cushion_id: request.cushion_id.clone(),
            quantity: request.quantity,
            amount,
            explanation: explanation.into(),
            item_type: ItemType::Order,
            external_request_id: Some(request.id.clone()),
        }
    }

    /// New lines always enter the pipeline as `Pending`.
    pub fn into_item(self) -> PurchaseItem {
        PurchaseItem {
            product_id: self.product_id,
            color_id: self.color_id,
            dimension_id: self.dimension_id.filter(|d| !d.is_empty()),
            cushion_id: self.cushion_id.filter(|c| !c.is_empty()),
            quantity: self.quantity,
            amount: self.amount,
            explanation: self.explanation,
            item_type: self.item_type,
            status: ItemStatus::Pending,
            external_request_id: self.external_request_id.filter(|r| !r.is_empty()),
        }
    }
}

/// Line item embedded in a receipt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseItem {
    pub product_id: String,
    pub color_id: String,
    pub dimension_id: Option<String>,
    pub cushion_id: Option<String>,
    pub quantity: u32,
    pub amount: Decimal,
    pub explanation: String,
    pub item_type: ItemType,
    pub status: ItemStatus,
    pub external_request_id: Option<String>,
}

impl PurchaseItem {
    pub fn variant_key(&self) -> VariantKey {
        VariantKey::new(
            self.product_id.clone(),
            self.color_id.clone(),
            self.dimension_id.clone(),
        )
    }

    pub fn match_key(&self) -> ItemMatchKey {
        ItemMatchKey {
            product_id: self.product_id.clone(),
            color_id: self.color_id.clone(),
            dimension_id: self.dimension_id.clone().filter(|d| !d.is_empty()),
            cushion_id: self.cushion_id.clone().filter(|c| !c.is_empty()),
            amount: self.amount.normalize(),
        }
    }
}

/// Attributes that identify "the same line" when a caller asks to remove one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ItemMatchKey {
    pub product_id: String,
    pub color_id: String,
    pub dimension_id: Option<String>,
    pub cushion_id: Option<String>,
    pub amount: Decimal,
}

/// Receipt as supplied to `create`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewPurchaseReceipt {
    #[validate(length(min = 1, max = 64, message = "receiptNo is required"))]
    pub receipt_no: String,
    pub date: NaiveDate,
    #[validate(length(min = 1, message = "personnelId is required"))]
    pub personnel_id: String,
    #[serde(default)]
    pub note: Option<String>,
    pub items: Vec<NewPurchaseItem>,
}

/// Header fields that `edit` may change. `None` leaves the field as is.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptHeaderUpdate {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub personnel_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseReceipt {
    pub store_id: String,
    pub receipt_id: Uuid,
    pub receipt_no: String,
    pub date: NaiveDate,
    pub personnel_id: String,
    pub note: Option<String>,
    pub items: Vec<PurchaseItem>,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl PurchaseReceipt {
    pub fn new(store_id: impl Into<String>, receipt: NewPurchaseReceipt) -> Self {
        let mut created = Self {
            store_id: store_id.into(),
            receipt_id: Uuid::new_v4(),
            receipt_no: receipt.receipt_no.trim().to_string(),
            date: receipt.date,
            personnel_id: receipt.personnel_id,
            note: receipt.note,
            items: receipt
                .items
                .into_iter()
                .map(NewPurchaseItem::into_item)
                .collect(),
            total_amount: Decimal::ZERO,
            created_at: Utc::now(),
        };
        created.recompute_total();
        created
    }

    /// Sum of line amounts, ignoring cancelled lines.
    pub fn recompute_total(&mut self) {
        self.total_amount = self
            .items
            .iter()
            .filter(|item| item.status != ItemStatus::Cancelled)
            .map(|item| item.amount)
            .sum();
    }

    pub fn apply_header(&mut self, update: ReceiptHeaderUpdate) {
        if let Some(date) = update.date {
            self.date = date;
        }
        if let Some(personnel_id) = update.personnel_id {
            self.personnel_id = personnel_id;
        }
        if let Some(note) = update.note {
            self.note = Some(note).filter(|n| !n.is_empty());
        }
    }

    /// Items still moving through the pipeline.
    pub fn in_flight_items(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status.is_in_flight())
            .count()
    }

    /// External demand ids consumed by this receipt.
    pub fn external_request_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| item.external_request_id.clone())
            .collect()
    }

    /// Numeric value of the receipt number, when it has one.
    pub fn numeric_receipt_no(&self) -> Option<u64> {
        self.receipt_no.trim().parse().ok()
    }
}
