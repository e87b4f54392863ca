//! Storage contract shared by every backend.
//!
//! Stock records and receipts are the only mutable shared state in the
//! ledger. Backends expose versioned reads and an all-or-nothing commit; the
//! [`TransactionCoordinator`](super::transaction::TransactionCoordinator) is
//! the only caller of `commit`.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    models::{PurchaseReceipt, StockRecord, VariantKey},
};

/// Version carried by a key that has never been written.
pub const ABSENT_VERSION: i64 = 0;

#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: i64) -> Self {
        Self { value, version }
    }
}

/// Pending change to a receipt, tagged with the version it was computed from.
#[derive(Clone, Debug, PartialEq)]
pub enum ReceiptWrite {
    /// New receipt. Fails the commit with `DuplicateReceiptNumber` if the
    /// store already holds the same receipt number.
    Insert(PurchaseReceipt),
    Update {
        expected_version: i64,
        receipt: PurchaseReceipt,
    },
    Delete {
        store_id: String,
        receipt_id: Uuid,
        expected_version: i64,
    },
}

/// New state for one stock key. `expected_version == ABSENT_VERSION` inserts.
#[derive(Clone, Debug, PartialEq)]
pub struct StockWrite {
    pub expected_version: i64,
    pub record: StockRecord,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteSet {
    pub receipt: Option<ReceiptWrite>,
    pub stock: Vec<StockWrite>,
}

impl WriteSet {
    pub fn is_empty(&self) -> bool {
        self.receipt.is_none() && self.stock.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Some key moved on since it was read; nothing was written.
    Conflict,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn read_receipt(
        &self,
        store_id: &str,
        receipt_id: Uuid,
    ) -> Result<Option<Versioned<PurchaseReceipt>>, ServiceError>;

    /// Reads every requested key that exists. Missing keys are simply absent
    /// from the result.
    async fn read_stock(
        &self,
        keys: &BTreeSet<VariantKey>,
    ) -> Result<BTreeMap<VariantKey, Versioned<StockRecord>>, ServiceError>;

    /// Applies the whole write set atomically, or nothing.
    async fn commit(&self, writes: WriteSet) -> Result<CommitOutcome, ServiceError>;

    async fn find_receipt_by_number(
        &self,
        store_id: &str,
        receipt_no: &str,
    ) -> Result<Option<PurchaseReceipt>, ServiceError>;

    /// Most recently created receipts first.
    async fn list_receipts(
        &self,
        store_id: &str,
        limit: u64,
    ) -> Result<Vec<PurchaseReceipt>, ServiceError>;

    async fn get_receipt(
        &self,
        store_id: &str,
        receipt_id: Uuid,
    ) -> Result<Option<PurchaseReceipt>, ServiceError> {
        Ok(self
            .read_receipt(store_id, receipt_id)
            .await?
            .map(|versioned| versioned.value))
    }

    async fn get_stock(&self, key: &VariantKey) -> Result<Option<StockRecord>, ServiceError> {
        let keys = BTreeSet::from([key.clone()]);
        Ok(self
            .read_stock(&keys)
            .await?
            .remove(key)
            .map(|versioned| versioned.value))
    }
}
