//! Purchase Ledger Library
//!
//! Keeps per-variant stock counters consistent with the purchase receipts
//! that move them through the receiving pipeline.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod models;
pub mod services;

pub use config::{load_config, LedgerConfig};
pub use db::{InMemoryLedgerStore, LedgerStore, RetryConfig, SeaOrmLedgerStore};
pub use errors::ServiceError;
pub use events::{Event, EventSender};
pub use models::{
    ItemStatus, ItemType, NewPurchaseItem, NewPurchaseReceipt, PendingRequest, PurchaseItem,
    PurchaseReceipt, ReceiptHeaderUpdate, StockRecord, VariantKey,
};
pub use services::{
    catalog::{CatalogLookup, ItemDescription, StaticCatalog},
    demand::{DemandService, InMemoryDemandService},
    ReconciliationEngine,
};
