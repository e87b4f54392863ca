#![allow(dead_code)]

use chrono::NaiveDate;
use purchase_ledger::{
    db::{InMemoryLedgerStore, LedgerStore},
    models::{ItemType, NewPurchaseItem, NewPurchaseReceipt, PendingRequest},
    services::{catalog::StaticCatalog, demand::InMemoryDemandService},
    ReconciliationEngine, RetryConfig,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

pub const STORE: &str = "store-1";

pub struct Harness {
    pub engine: ReconciliationEngine,
    pub store: Arc<InMemoryLedgerStore>,
    pub demand: Arc<InMemoryDemandService>,
}

pub fn harness() -> Harness {
    harness_with_demand(Vec::new())
}

pub fn harness_with_demand(requests: Vec<PendingRequest>) -> Harness {
    let store = Arc::new(InMemoryLedgerStore::new());
    let demand = Arc::new(InMemoryDemandService::with_requests(STORE, requests));
    let engine = engine_over(store.clone(), demand.clone());
    Harness {
        engine,
        store,
        demand,
    }
}

pub fn engine_over(
    store: Arc<dyn LedgerStore>,
    demand: Arc<InMemoryDemandService>,
) -> ReconciliationEngine {
    ReconciliationEngine::new(
        store,
        demand,
        Arc::new(StaticCatalog::new().with_product("sofa", "Three Seat Sofa")),
    )
    .with_retry_config(RetryConfig {
        max_attempts: 50,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_factor: 2.0,
    })
}

pub fn item(item_type: ItemType, quantity: u32, amount: Decimal) -> NewPurchaseItem {
    NewPurchaseItem {
        product_id: "sofa".into(),
        color_id: "grey".into(),
        dimension_id: Some("220".into()),
        cushion_id: None,
        quantity,
        amount,
        explanation: String::new(),
        item_type,
        external_request_id: None,
    }
}

pub fn receipt(receipt_no: &str, items: Vec<NewPurchaseItem>) -> NewPurchaseReceipt {
    NewPurchaseReceipt {
        receipt_no: receipt_no.into(),
        date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        personnel_id: "emp-1".into(),
        note: Some("weekly restock".into()),
        items,
    }
}

pub fn pending_request(id: &str, quantity: u32) -> PendingRequest {
    PendingRequest {
        id: id.into(),
        product_id: "sofa".into(),
        color_id: "grey".into(),
        dimension_id: Some("220".into()),
        cushion_id: None,
        quantity,
        customer_id: "cust-9".into(),
        note: None,
    }
}
