//! Upstream demand: customer requests waiting to be procured.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{errors::ServiceError, models::PendingRequest};

/// The ledger's view of the demand system.
#[async_trait]
pub trait DemandService: Send + Sync {
    async fn list_pending_requests(
        &self,
        store_id: &str,
    ) -> Result<Vec<PendingRequest>, ServiceError>;

    /// Removes the given requests. Unknown ids are ignored.
    async fn remove_pending_requests(
        &self,
        store_id: &str,
        request_ids: &[String],
    ) -> Result<(), ServiceError>;
}

/// Process-local demand backlog, keyed by store.
#[derive(Debug, Default)]
pub struct InMemoryDemandService {
    requests: RwLock<HashMap<String, Vec<PendingRequest>>>,
}

impl InMemoryDemandService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_requests(store_id: impl Into<String>, requests: Vec<PendingRequest>) -> Self {
        Self {
            requests: RwLock::new(HashMap::from([(store_id.into(), requests)])),
        }
    }

    pub async fn insert(&self, store_id: &str, request: PendingRequest) {
        self.requests
            .write()
            .await
            .entry(store_id.to_string())
            .or_default()
            .push(request);
    }
}

#[async_trait]
impl DemandService for InMemoryDemandService {
    async fn list_pending_requests(
        &self,
        store_id: &str,
    ) -> Result<Vec<PendingRequest>, ServiceError> {
        Ok(self
            .requests
            .read()
            .await
            .get(store_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_pending_requests(
        &self,
        store_id: &str,
        request_ids: &[String],
    ) -> Result<(), ServiceError> {
        let mut requests = self.requests.write().await;
        if let Some(backlog) = requests.get_mut(store_id) {
            let before = backlog.len();
            backlog.retain(|request| !request_ids.contains(&request.id));
            debug!(
                store_id,
                removed = before - backlog.len(),
                "Removed pending requests"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> PendingRequest {
        PendingRequest {
            id: id.into(),
            product_id: "sofa".into(),
            color_id: "grey".into(),
            dimension_id: None,
            cushion_id: None,
            quantity: 1,
            customer_id: "c-1".into(),
            note: None,
        }
    }

    #[tokio::test]
    async fn removal_only_touches_named_requests() {
        let demand = InMemoryDemandService::with_requests("s1", vec![request("r1"), request("r2")]);
        demand.insert("s2", request("r1")).await;

        demand
            .remove_pending_requests("s1", &["r1".to_string(), "missing".to_string()])
            .await
            .unwrap();

        let left: Vec<_> = demand
            .list_pending_requests("s1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(left, vec!["r2".to_string()]);
        assert_eq!(demand.list_pending_requests("s2").await.unwrap().len(), 1);
        assert!(demand.list_pending_requests("s3").await.unwrap().is_empty());
    }
}
