use serde::{Deserialize, Serialize};

use super::stock_record::VariantKey;

/// Upstream demand record awaiting procurement.
///
/// Owned by the demand system; the ledger only reads it and asks for its
/// removal once a receipt line has consumed it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub id: String,
    pub product_id: String,
    pub color_id: String,
    #[serde(default)]
    pub dimension_id: Option<String>,
    #[serde(default)]
    pub cushion_id: Option<String>,
    pub quantity: u32,
    pub customer_id: String,
    #[serde(default)]
    pub note: Option<String>,
}

impl PendingRequest {
    pub fn variant_key(&self) -> VariantKey {
        VariantKey::new(
            self.product_id.clone(),
            self.color_id.clone(),
            self.dimension_id.clone(),
        )
    }
}
