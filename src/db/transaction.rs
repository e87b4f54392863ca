/*!
 * Transaction coordination
 *
 * Runs a ledger command as one optimistic unit of work: read the receipt and
 * every stock key the command declares, let the command stage its changes,
 * then commit all of them against the versions that were read. A stale
 * version restarts the whole unit with fresh reads, up to a bounded number
 * of attempts.
 */

use metrics::{counter, histogram};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::store::{
    CommitOutcome, LedgerStore, ReceiptWrite, StockWrite, Versioned, WriteSet, ABSENT_VERSION,
};
use crate::{
    commands::{LedgerCommand, ReceiptRef},
    config::LedgerConfig,
    errors::ServiceError,
    models::{PurchaseReceipt, StockDelta, StockRecord, StockSeed, VariantKey},
};

/// Configuration for conflict retries
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Factor to multiply delay by after each attempt
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
        }
    }
}

impl From<&LedgerConfig> for RetryConfig {
    fn from(cfg: &LedgerConfig) -> Self {
        Self {
            max_attempts: cfg.max_retry_attempts,
            initial_delay: Duration::from_millis(cfg.retry_initial_delay_ms),
            max_delay: Duration::from_millis(cfg.retry_max_delay_ms),
            backoff_factor: cfg.retry_backoff_factor,
        }
    }
}

impl RetryConfig {
    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_factor).min(self.max_delay.as_secs_f64()),
        )
    }
}

#[derive(Debug)]
enum ReceiptChange {
    Insert(PurchaseReceipt),
    Update(PurchaseReceipt),
    Delete,
}

#[derive(Debug)]
struct StagedStock {
    version: i64,
    record: Option<StockRecord>,
    dirty: bool,
}

/// Snapshot plus staged changes for one attempt of a command.
///
/// Commands only see keys they declared up front; touching anything else is
/// an error rather than an unversioned write.
#[derive(Debug)]
pub struct LedgerTransaction {
    target: Option<ReceiptRef>,
    receipt: Option<Versioned<PurchaseReceipt>>,
    receipt_change: Option<ReceiptChange>,
    stock: BTreeMap<VariantKey, StagedStock>,
}

impl LedgerTransaction {
    fn new(
        target: Option<ReceiptRef>,
        receipt: Option<Versioned<PurchaseReceipt>>,
        keys: &BTreeSet<VariantKey>,
        mut stock: BTreeMap<VariantKey, Versioned<StockRecord>>,
    ) -> Self {
        let stock = keys
            .iter()
            .map(|key| {
                let staged = match stock.remove(key) {
                    Some(versioned) => StagedStock {
                        version: versioned.version,
                        record: Some(versioned.value),
                        dirty: false,
                    },
                    None => StagedStock {
                        version: ABSENT_VERSION,
                        record: None,
                        dirty: false,
                    },
                };
                (key.clone(), staged)
            })
            .collect();

        Self {
            target,
            receipt,
            receipt_change: None,
            stock,
        }
    }

    /// The receipt the command targets, as read at the start of this attempt.
    pub fn existing_receipt(&self) -> Result<&PurchaseReceipt, ServiceError> {
        match (&self.receipt, &self.target) {
            (Some(versioned), _) => Ok(&versioned.value),
            (None, Some(target)) => Err(ServiceError::receipt_not_found(
                &target.store_id,
                target.receipt_id,
            )),
            (None, None) => Err(ServiceError::InvalidOperation(
                "command did not declare a receipt to read".to_string(),
            )),
        }
    }

    pub fn insert_receipt(&mut self, receipt: PurchaseReceipt) {
        self.receipt_change = Some(ReceiptChange::Insert(receipt));
    }

    pub fn update_receipt(&mut self, receipt: PurchaseReceipt) -> Result<(), ServiceError> {
        self.existing_receipt()?;
        self.receipt_change = Some(ReceiptChange::Update(receipt));
        Ok(())
    }

    pub fn delete_receipt(&mut self) -> Result<(), ServiceError> {
        self.existing_receipt()?;
        self.receipt_change = Some(ReceiptChange::Delete);
        Ok(())
    }

    /// Staged view of a declared stock key.
    pub fn stock(&self, key: &VariantKey) -> Option<&StockRecord> {
        self.stock.get(key).and_then(|staged| staged.record.as_ref())
    }

    /// Applies `delta` to the staged record for `key`.
    ///
    /// When the key has never been seen, `seed` creates it; without a seed a
    /// missing record is `StockRecordNotFound`.
    pub fn apply_delta(
        &mut self,
        key: &VariantKey,
        delta: StockDelta,
        seed: Option<StockSeed>,
    ) -> Result<(), ServiceError> {
        let staged = self.stock.get_mut(key).ok_or_else(|| {
            ServiceError::InvalidOperation(format!("stock key {key} was not declared"))
        })?;

        if staged.record.is_none() {
            let seed = seed.ok_or_else(|| ServiceError::StockRecordNotFound(key.to_string()))?;
            staged.record = Some(StockRecord::seeded(seed));
            staged.dirty = true;
        }

        if !delta.is_zero() {
            if let Some(record) = staged.record.as_mut() {
                record.apply_delta(&delta)?;
                staged.dirty = true;
            }
        }
        Ok(())
    }

    fn into_write_set(self) -> WriteSet {
        let receipt_version = self
            .receipt
            .as_ref()
            .map(|r| r.version)
            .unwrap_or(ABSENT_VERSION);

        let receipt = match self.receipt_change {
            Some(ReceiptChange::Insert(receipt)) => Some(ReceiptWrite::Insert(receipt)),
            Some(ReceiptChange::Update(receipt)) => Some(ReceiptWrite::Update {
                expected_version: receipt_version,
                receipt,
            }),
            Some(ReceiptChange::Delete) => self.receipt.map(|versioned| ReceiptWrite::Delete {
                store_id: versioned.value.store_id,
                receipt_id: versioned.value.receipt_id,
                expected_version: versioned.version,
            }),
            None => None,
        };

        let stock = self
            .stock
            .into_values()
            .filter(|staged| staged.dirty)
            .filter_map(|staged| {
                staged.record.map(|record| StockWrite {
                    expected_version: staged.version,
                    record,
                })
            })
            .collect();

        WriteSet { receipt, stock }
    }
}

/// Executes ledger commands atomically against a [`LedgerStore`].
#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn LedgerStore>,
    retry: RetryConfig,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn LedgerStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Runs `command` until it commits, fails, or exhausts its attempts.
    ///
    /// Errors raised by the command itself abort immediately; only version
    /// conflicts are retried. A command that stages nothing commits nothing.
    #[instrument(skip(self, command), fields(operation = command.name()))]
    pub async fn execute<C>(&self, command: &C) -> Result<C::Output, ServiceError>
    where
        C: LedgerCommand,
    {
        let operation = command.name();
        let started = Instant::now();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut delay = self.retry.initial_delay;

        for attempt in 1..=max_attempts {
            let mut txn = self.begin(command).await?;
            let output = command.apply(&mut txn)?;
            let writes = txn.into_write_set();

            if writes.is_empty() {
                debug!(attempt, "Nothing staged; skipping commit");
                return Ok(output);
            }

            match self.store.commit(writes).await? {
                CommitOutcome::Committed => {
                    counter!("ledger.transaction.committed", 1, "operation" => operation);
                    histogram!(
                        "ledger.transaction.duration",
                        started.elapsed().as_secs_f64(),
                        "operation" => operation
                    );
                    if attempt > 1 {
                        debug!(attempt, "Committed after retrying");
                    }
                    return Ok(output);
                }
                CommitOutcome::Conflict => {
                    counter!("ledger.transaction.conflict", 1, "operation" => operation);
                    if attempt < max_attempts {
                        warn!(attempt, ?delay, "Version conflict; retrying with fresh reads");
                        sleep(delay).await;
                        delay = self.retry.next_delay(delay);
                    }
                }
            }
        }

        counter!("ledger.transaction.exhausted", 1, "operation" => operation);
        warn!(attempts = max_attempts, "Giving up after repeated conflicts");
        Err(ServiceError::TransientConflict {
            operation,
            attempts: max_attempts,
        })
    }

    /// Reads the declared receipt, then the stock keys derived from it.
    async fn begin<C>(&self, command: &C) -> Result<LedgerTransaction, ServiceError>
    where
        C: LedgerCommand,
    {
        let target = command.receipt_ref();
        let receipt = match &target {
            Some(target) => {
                self.store
                    .read_receipt(&target.store_id, target.receipt_id)
                    .await?
            }
            None => None,
        };

        let keys = command.stock_keys(receipt.as_ref().map(|r| &r.value));
        let stock = if keys.is_empty() {
            BTreeMap::new()
        } else {
            self.store.read_stock(&keys).await?
        };

        Ok(LedgerTransaction::new(target, receipt, &keys, stock))
    }
}

/// Convenience for callers holding only ids.
pub fn receipt_ref(store_id: &str, receipt_id: Uuid) -> ReceiptRef {
    ReceiptRef {
        store_id: store_id.to_string(),
        receipt_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryLedgerStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Bumps one counter on one key; enough to exercise the retry loop.
    struct Bump {
        key: VariantKey,
    }

    impl LedgerCommand for Bump {
        type Output = i64;

        fn name(&self) -> &'static str {
            "bump"
        }

        fn receipt_ref(&self) -> Option<ReceiptRef> {
            None
        }

        fn stock_keys(&self, _receipt: Option<&PurchaseReceipt>) -> BTreeSet<VariantKey> {
            BTreeSet::from([self.key.clone()])
        }

        fn apply(&self, txn: &mut LedgerTransaction) -> Result<i64, ServiceError> {
            let seed = StockSeed {
                key: self.key.clone(),
                product_name: "widget".into(),
            };
            txn.apply_delta(
                &self.key,
                StockDelta {
                    free: 1,
                    ..StockDelta::ZERO
                },
                Some(seed),
            )?;
            Ok(txn.stock(&self.key).map(|s| s.free_stock).unwrap_or_default())
        }
    }

    /// Reports a conflict for the first `failures` commits.
    struct FlakyStore {
        inner: InMemoryLedgerStore,
        failures: u32,
        commits: AtomicU32,
    }

    #[async_trait]
    impl LedgerStore for FlakyStore {
        async fn read_receipt(
            &self,
            store_id: &str,
            receipt_id: Uuid,
        ) -> Result<Option<Versioned<PurchaseReceipt>>, ServiceError> {
            self.inner.read_receipt(store_id, receipt_id).await
        }

        async fn read_stock(
            &self,
            keys: &BTreeSet<VariantKey>,
        ) -> Result<BTreeMap<VariantKey, Versioned<StockRecord>>, ServiceError> {
            self.inner.read_stock(keys).await
        }

        async fn commit(&self, writes: WriteSet) -> Result<CommitOutcome, ServiceError> {
            if self.commits.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Ok(CommitOutcome::Conflict);
            }
            self.inner.commit(writes).await
        }

        async fn find_receipt_by_number(
            &self,
            store_id: &str,
            receipt_no: &str,
        ) -> Result<Option<PurchaseReceipt>, ServiceError> {
            self.inner.find_receipt_by_number(store_id, receipt_no).await
        }

        async fn list_receipts(
            &self,
            store_id: &str,
            limit: u64,
        ) -> Result<Vec<PurchaseReceipt>, ServiceError> {
            self.inner.list_receipts(store_id, limit).await
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
        }
    }

    fn flaky(failures: u32) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: InMemoryLedgerStore::new(),
            failures,
            commits: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn retries_conflicts_until_commit() {
        let store = flaky(2);
        let coordinator = TransactionCoordinator::new(store.clone(), fast_retry(3));
        let key = VariantKey::new("p", "c", None);

        let free = coordinator.execute(&Bump { key: key.clone() }).await.unwrap();

        assert_eq!(free, 1);
        assert_eq!(store.commits.load(Ordering::SeqCst), 3);
        assert_eq!(store.get_stock(&key).await.unwrap().unwrap().free_stock, 1);
    }

    #[tokio::test]
    async fn surfaces_transient_conflict_past_the_bound() {
        let store = flaky(10);
        let coordinator = TransactionCoordinator::new(store.clone(), fast_retry(3));
        let key = VariantKey::new("p", "c", None);

        let err = coordinator.execute(&Bump { key: key.clone() }).await.unwrap_err();

        assert!(matches!(
            err,
            ServiceError::TransientConflict {
                operation: "bump",
                attempts: 3
            }
        ));
        assert!(store.get_stock(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_commands_serialize_on_the_same_key() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let coordinator = TransactionCoordinator::new(store.clone(), fast_retry(200));
        let key = VariantKey::new("p", "c", Some("d".into()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = coordinator.clone();
                let key = key.clone();
                tokio::spawn(async move { coordinator.execute(&Bump { key }).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.get_stock(&key).await.unwrap().unwrap().free_stock, 16);
    }

    #[test]
    fn undeclared_keys_and_missing_records_are_rejected() {
        let declared = VariantKey::new("p", "c", None);
        let mut txn = LedgerTransaction::new(
            None,
            None,
            &BTreeSet::from([declared.clone()]),
            BTreeMap::new(),
        );

        let err = txn
            .apply_delta(&VariantKey::new("x", "y", None), StockDelta::ZERO, None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOperation(_)));

        let err = txn
            .apply_delta(&declared, StockDelta::ZERO, None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::StockRecordNotFound(_)));
        assert!(txn.into_write_set().is_empty());
    }

    #[test]
    fn backoff_is_capped() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            backoff_factor: 2.0,
        };
        let second = retry.next_delay(retry.initial_delay);
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(retry.next_delay(second), Duration::from_millis(250));
    }
}
