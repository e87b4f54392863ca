use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::store::{
    CommitOutcome, LedgerStore, ReceiptWrite, StockWrite, Versioned, WriteSet, ABSENT_VERSION,
};
use crate::{
    errors::ServiceError,
    models::{PurchaseReceipt, StockRecord, VariantKey},
};

type ReceiptId = (String, Uuid);

#[derive(Default)]
struct MemoryState {
    receipts: HashMap<ReceiptId, Versioned<PurchaseReceipt>>,
    stock: HashMap<VariantKey, Versioned<StockRecord>>,
}

impl MemoryState {
    fn version_of_receipt(&self, id: &ReceiptId) -> i64 {
        self.receipts
            .get(id)
            .map(|r| r.version)
            .unwrap_or(ABSENT_VERSION)
    }

    fn version_of_stock(&self, key: &VariantKey) -> i64 {
        self.stock
            .get(key)
            .map(|s| s.version)
            .unwrap_or(ABSENT_VERSION)
    }

    fn receipt_no_taken(&self, store_id: &str, receipt_no: &str) -> bool {
        self.receipts
            .values()
            .any(|r| r.value.store_id == store_id && r.value.receipt_no == receipt_no)
    }

    /// Checks every precondition before anything is written.
    fn validate(&self, writes: &WriteSet) -> Result<CommitOutcome, ServiceError> {
        match &writes.receipt {
            Some(ReceiptWrite::Insert(receipt)) => {
                let id = (receipt.store_id.clone(), receipt.receipt_id);
                if self.version_of_receipt(&id) != ABSENT_VERSION {
                    return Ok(CommitOutcome::Conflict);
                }
                if self.receipt_no_taken(&receipt.store_id, &receipt.receipt_no) {
                    return Err(ServiceError::DuplicateReceiptNumber {
                        store_id: receipt.store_id.clone(),
                        receipt_no: receipt.receipt_no.clone(),
                    });
                }
            }
            Some(ReceiptWrite::Update {
                expected_version,
                receipt,
            }) => {
                let id = (receipt.store_id.clone(), receipt.receipt_id);
                if self.version_of_receipt(&id) != *expected_version {
                    return Ok(CommitOutcome::Conflict);
                }
            }
            Some(ReceiptWrite::Delete {
                store_id,
                receipt_id,
                expected_version,
            }) => {
                let id = (store_id.clone(), *receipt_id);
                if self.version_of_receipt(&id) != *expected_version {
                    return Ok(CommitOutcome::Conflict);
                }
            }
            None => {}
        }

        let stale = writes
            .stock
            .iter()
            .any(|write| self.version_of_stock(&write.record.key()) != write.expected_version);
        if stale {
            return Ok(CommitOutcome::Conflict);
        }

        Ok(CommitOutcome::Committed)
    }

    fn apply(&mut self, writes: WriteSet) {
        match writes.receipt {
            Some(ReceiptWrite::Insert(receipt)) => {
                let id = (receipt.store_id.clone(), receipt.receipt_id);
                self.receipts.insert(id, Versioned::new(receipt, 1));
            }
            Some(ReceiptWrite::Update {
                expected_version,
                receipt,
            }) => {
                let id = (receipt.store_id.clone(), receipt.receipt_id);
                self.receipts
                    .insert(id, Versioned::new(receipt, expected_version + 1));
            }
            Some(ReceiptWrite::Delete {
                store_id,
                receipt_id,
                ..
            }) => {
                self.receipts.remove(&(store_id, receipt_id));
            }
            None => {}
        }

        for StockWrite {
            expected_version,
            record,
        } in writes.stock
        {
            self.stock
                .insert(record.key(), Versioned::new(record, expected_version + 1));
        }
    }
}

/// Process-local store. Commits are serialized behind a single write lock,
/// reads share a read lock, so versions behave exactly as in the SQL store.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<MemoryState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of a stock key, `ABSENT_VERSION` if never written.
    pub async fn stock_version(&self, key: &VariantKey) -> i64 {
        self.state.read().await.version_of_stock(key)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn read_receipt(
        &self,
        store_id: &str,
        receipt_id: Uuid,
    ) -> Result<Option<Versioned<PurchaseReceipt>>, ServiceError> {
        let state = self.state.read().await;
        Ok(state
            .receipts
            .get(&(store_id.to_string(), receipt_id))
            .cloned())
    }

    async fn read_stock(
        &self,
        keys: &BTreeSet<VariantKey>,
    ) -> Result<BTreeMap<VariantKey, Versioned<StockRecord>>, ServiceError> {
        let state = self.state.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| state.stock.get(key).map(|s| (key.clone(), s.clone())))
            .collect())
    }

    #[instrument(skip(self, writes), fields(stock_writes = writes.stock.len()))]
    async fn commit(&self, writes: WriteSet) -> Result<CommitOutcome, ServiceError> {
        let mut state = self.state.write().await;
        let outcome = state.validate(&writes)?;
        if outcome == CommitOutcome::Committed {
            state.apply(writes);
        } else {
            debug!("In-memory commit rejected on stale version");
        }
        Ok(outcome)
    }

    async fn find_receipt_by_number(
        &self,
        store_id: &str,
        receipt_no: &str,
    ) -> Result<Option<PurchaseReceipt>, ServiceError> {
        let state = self.state.read().await;
        Ok(state
            .receipts
            .values()
            .find(|r| r.value.store_id == store_id && r.value.receipt_no == receipt_no)
            .map(|r| r.value.clone()))
    }

    async fn list_receipts(
        &self,
        store_id: &str,
        limit: u64,
    ) -> Result<Vec<PurchaseReceipt>, ServiceError> {
        let state = self.state.read().await;
        let mut receipts: Vec<PurchaseReceipt> = state
            .receipts
            .values()
            .filter(|r| r.value.store_id == store_id)
            .map(|r| r.value.clone())
            .collect();
        receipts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        receipts.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(receipts)
    }
}
