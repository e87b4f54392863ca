use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Neg;

use crate::errors::ServiceError;

/// Marker used in the storage key when a variant has no dimension.
///
/// Present parts are written as `<len>:<value>`, so the marker can never be
/// mistaken for a real dimension id, even one spelled `-`.
pub const NO_DIMENSION: &str = "-";

/// Identity of one stock-counted SKU variant.
///
/// Cushion is deliberately not part of the key: items that differ only by
/// cushion draw on the same counters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantKey {
    pub product_id: String,
    pub color_id: String,
    pub dimension_id: Option<String>,
}

impl VariantKey {
    pub fn new(
        product_id: impl Into<String>,
        color_id: impl Into<String>,
        dimension_id: Option<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            color_id: color_id.into(),
            dimension_id: dimension_id.filter(|d| !d.is_empty()),
        }
    }

    /// Deterministic string form used as the primary key in storage.
    ///
    /// Each part is length-prefixed, so ids containing the separator cannot
    /// make two variants share a key.
    pub fn storage_key(&self) -> String {
        let mut key = String::new();
        for part in [
            Some(self.product_id.as_str()),
            Some(self.color_id.as_str()),
            self.dimension_id.as_deref(),
        ] {
            if !key.is_empty() {
                key.push('|');
            }
            match part {
                Some(value) => key.push_str(&format!("{}:{}", value.len(), value)),
                None => key.push_str(NO_DIMENSION),
            }
        }
        key
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.product_id,
            self.color_id,
            self.dimension_id.as_deref().unwrap_or(NO_DIMENSION)
        )
    }
}

/// Per-variant stock counters. No counter is ever negative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockRecord {
    pub product_id: String,
    pub color_id: String,
    pub dimension_id: Option<String>,
    pub product_name: String,
    pub free_stock: i64,
    pub reserved_stock: i64,
    pub incoming_stock: i64,
    pub incoming_reserved_stock: i64,
}

impl StockRecord {
    /// A zeroed record for a key seen for the first time.
    pub fn seeded(seed: StockSeed) -> Self {
        Self {
            product_id: seed.key.product_id,
            color_id: seed.key.color_id,
            dimension_id: seed.key.dimension_id,
            product_name: seed.product_name,
            free_stock: 0,
            reserved_stock: 0,
            incoming_stock: 0,
            incoming_reserved_stock: 0,
        }
    }

    pub fn key(&self) -> VariantKey {
        VariantKey::new(
            self.product_id.clone(),
            self.color_id.clone(),
            self.dimension_id.clone(),
        )
    }

    /// Applies a signed delta to every counter.
    ///
    /// Decrements clamp at zero. Increments that would overflow fail with
    /// `StockOverflow` and leave the record untouched.
    pub fn apply_delta(&mut self, delta: &StockDelta) -> Result<(), ServiceError> {
        let key = self.key();
        let free = apply_clamped(self.free_stock, delta.free, &key)?;
        let reserved = apply_clamped(self.reserved_stock, delta.reserved, &key)?;
        let incoming = apply_clamped(self.incoming_stock, delta.incoming, &key)?;
        let incoming_reserved =
            apply_clamped(self.incoming_reserved_stock, delta.incoming_reserved, &key)?;

        self.free_stock = free;
        self.reserved_stock = reserved;
        self.incoming_stock = incoming;
        self.incoming_reserved_stock = incoming_reserved;
        Ok(())
    }

    /// Units that will eventually be free on hand: incoming plus free.
    pub fn stock_pipeline_total(&self) -> i64 {
        self.incoming_stock + self.free_stock
    }

    /// Units committed to customer orders: incoming-reserved plus reserved.
    pub fn order_pipeline_total(&self) -> i64 {
        self.incoming_reserved_stock + self.reserved_stock
    }
}

fn apply_clamped(current: i64, delta: i64, key: &VariantKey) -> Result<i64, ServiceError> {
    current
        .checked_add(delta)
        .map(|value| value.max(0))
        .ok_or_else(|| ServiceError::StockOverflow(key.to_string()))
}

/// Data needed to create a stock record the first time its key is touched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockSeed {
    pub key: VariantKey,
    pub product_name: String,
}

/// Signed change per counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub free: i64,
    pub reserved: i64,
    pub incoming: i64,
    pub incoming_reserved: i64,
}

impl StockDelta {
    pub const ZERO: StockDelta = StockDelta {
        free: 0,
        reserved: 0,
        incoming: 0,
        incoming_reserved: 0,
    };

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl Neg for StockDelta {
    type Output = StockDelta;

    fn neg(self) -> Self::Output {
        StockDelta {
            free: -self.free,
            reserved: -self.reserved,
            incoming: -self.incoming,
            incoming_reserved: -self.incoming_reserved,
        }
    }
}
