use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

use crate::{errors::ServiceError, models::PurchaseItem};

/// Read-only product catalog used for display names.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn product_name(&self, product_id: &str) -> Result<Option<String>, ServiceError>;
    async fn color_name(&self, color_id: &str) -> Result<Option<String>, ServiceError>;
    async fn dimension_name(&self, dimension_id: &str) -> Result<Option<String>, ServiceError>;
    async fn cushion_name(&self, cushion_id: &str) -> Result<Option<String>, ServiceError>;
}

/// Human-readable rendering of a receipt line. Missing names fall back to ids.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDescription {
    pub product: String,
    pub color: String,
    pub dimension: Option<String>,
    pub cushion: Option<String>,
}

impl ItemDescription {
    pub fn label(&self) -> String {
        let mut parts = vec![self.product.clone(), self.color.clone()];
        parts.extend(self.dimension.clone());
        parts.extend(self.cushion.clone());
        parts.join(" / ")
    }
}

pub async fn describe(
    catalog: &dyn CatalogLookup,
    item: &PurchaseItem,
) -> Result<ItemDescription, ServiceError> {
    let product = catalog
        .product_name(&item.product_id)
        .await?
        .unwrap_or_else(|| item.product_id.clone());
    let color = catalog
        .color_name(&item.color_id)
        .await?
        .unwrap_or_else(|| item.color_id.clone());
    let dimension = match &item.dimension_id {
        Some(id) => Some(catalog.dimension_name(id).await?.unwrap_or_else(|| id.clone())),
        None => None,
    };
    let cushion = match &item.cushion_id {
        Some(id) => Some(catalog.cushion_name(id).await?.unwrap_or_else(|| id.clone())),
        None => None,
    };

    Ok(ItemDescription {
        product,
        color,
        dimension,
        cushion,
    })
}

/// Fixed name tables, for tests and the CLI.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    products: HashMap<String, String>,
    colors: HashMap<String, String>,
    dimensions: HashMap<String, String>,
    cushions: HashMap<String, String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.products.insert(id.into(), name.into());
        self
    }

    pub fn with_color(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.colors.insert(id.into(), name.into());
        self
    }

    pub fn with_dimension(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.dimensions.insert(id.into(), name.into());
        self
    }

    pub fn with_cushion(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.cushions.insert(id.into(), name.into());
        self
    }
}

#[async_trait]
impl CatalogLookup for StaticCatalog {
    async fn product_name(&self, product_id: &str) -> Result<Option<String>, ServiceError> {
        Ok(self.products.get(product_id).cloned())
    }

    async fn color_name(&self, color_id: &str) -> Result<Option<String>, ServiceError> {
        Ok(self.colors.get(color_id).cloned())
    }

    async fn dimension_name(&self, dimension_id: &str) -> Result<Option<String>, ServiceError> {
        Ok(self.dimensions.get(dimension_id).cloned())
    }

    async fn cushion_name(&self, cushion_id: &str) -> Result<Option<String>, ServiceError> {
        Ok(self.cushions.get(cushion_id).cloned())
    }
}
