use chrono::Utc;
use metrics::counter;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::{
    catalog::{self, CatalogLookup, ItemDescription},
    demand::DemandService,
};
use crate::{
    commands::{
        AdvanceItemStatusCommand, CancelOutcome, CancelReceiptCommand, CreateReceiptCommand,
        DeleteReceiptCommand, EditOutcome, EditReceiptCommand, ProductNames, ResetOutcome,
        ResetReceiptCommand, StatusChange,
    },
    config::LedgerConfig,
    db::{
        store::LedgerStore,
        transaction::{receipt_ref, RetryConfig, TransactionCoordinator},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        ItemStatus, NewPurchaseItem, NewPurchaseReceipt, PendingRequest, PurchaseItem,
        PurchaseReceipt, ReceiptHeaderUpdate, StockRecord, VariantKey,
    },
};

const DEFAULT_SCAN_LIMIT: u64 = 50;
const FALLBACK_NUMBER_FORMAT: &str = "%y%m%d%H%M%S";

/// Keeps stock counters consistent with the receipts that move them.
///
/// Every mutating operation runs as one command through the
/// [`TransactionCoordinator`]; nothing here writes to the store directly.
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn LedgerStore>,
    coordinator: TransactionCoordinator,
    demand: Arc<dyn DemandService>,
    catalog: Arc<dyn CatalogLookup>,
    event_sender: Option<EventSender>,
    receipt_number_scan_limit: u64,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        demand: Arc<dyn DemandService>,
        catalog: Arc<dyn CatalogLookup>,
    ) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(store.clone(), RetryConfig::default()),
            store,
            demand,
            catalog,
            event_sender: None,
            receipt_number_scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }

    /// Builds an engine whose retry policy and numbering scan follow `config`.
    pub fn from_config(
        config: &LedgerConfig,
        store: Arc<dyn LedgerStore>,
        demand: Arc<dyn DemandService>,
        catalog: Arc<dyn CatalogLookup>,
    ) -> Self {
        Self {
            receipt_number_scan_limit: config.receipt_number_scan_limit,
            ..Self::new(store, demand, catalog).with_retry_config(RetryConfig::from(config))
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.coordinator = TransactionCoordinator::new(self.store.clone(), retry);
        self
    }

    pub fn with_event_sender(mut self, event_sender: EventSender) -> Self {
        self.event_sender = Some(event_sender);
        self
    }

    /// Creates a receipt and books each line as incoming stock.
    ///
    /// The receipt number is checked up front for a friendly error; the store
    /// enforces uniqueness again when the insert commits. Pending requests
    /// consumed by order lines are removed only after the commit.
    #[instrument(skip(self, new_receipt), fields(receipt_no = %new_receipt.receipt_no))]
    pub async fn create_receipt(
        &self,
        store_id: &str,
        new_receipt: NewPurchaseReceipt,
    ) -> Result<PurchaseReceipt, ServiceError> {
        self.create_receipt_inner(store_id, new_receipt)
            .await
            .map_err(|e| record_failure("create_receipt", e))
    }

    async fn create_receipt_inner(
        &self,
        store_id: &str,
        new_receipt: NewPurchaseReceipt,
    ) -> Result<PurchaseReceipt, ServiceError> {
        new_receipt.validate()?;
        let receipt_no = new_receipt.receipt_no.trim();
        if receipt_no.is_empty() {
            return Err(ServiceError::ValidationError(
                "receiptNo must not be blank".to_string(),
            ));
        }
        if new_receipt.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "a receipt needs at least one item".to_string(),
            ));
        }
        validate_items(&new_receipt.items)?;
        self.check_pending_claims(store_id, &new_receipt.items).await?;

        if self
            .store
            .find_receipt_by_number(store_id, receipt_no)
            .await?
            .is_some()
        {
            return Err(ServiceError::DuplicateReceiptNumber {
                store_id: store_id.to_string(),
                receipt_no: receipt_no.to_string(),
            });
        }

        let receipt = PurchaseReceipt::new(store_id, new_receipt);
        let product_names = self.product_names(&receipt.items).await;
        let created = self
            .coordinator
            .execute(&CreateReceiptCommand {
                receipt,
                product_names,
            })
            .await?;

        self.consume_pending_requests(store_id, created.external_request_ids())
            .await;

        info!(
            receipt_id = %created.receipt_id,
            items = created.items.len(),
            "Purchase receipt created"
        );
        self.emit(Event::ReceiptCreated {
            store_id: created.store_id.clone(),
            receipt_id: created.receipt_id,
            receipt_no: created.receipt_no.clone(),
            item_count: created.items.len(),
            at: Utc::now(),
        })
        .await;

        Ok(created)
    }

    /// Moves one line to `requested`. Asking for the current status is a no-op.
    #[instrument(skip(self))]
    pub async fn advance_status(
        &self,
        store_id: &str,
        receipt_id: Uuid,
        item_index: usize,
        requested: ItemStatus,
    ) -> Result<StatusChange, ServiceError> {
        let change = self
            .coordinator
            .execute(&AdvanceItemStatusCommand {
                target: receipt_ref(store_id, receipt_id),
                item_index,
                requested,
            })
            .await
            .map_err(|e| record_failure("advance_item_status", e))?;

        match &change.transition {
            Some(transition) => {
                info!(from = %transition.from, to = %transition.to, "Item status changed");
                self.emit(Event::ItemStatusChanged {
                    store_id: store_id.to_string(),
                    receipt_id,
                    item_index,
                    from: transition.from,
                    to: transition.to,
                    at: Utc::now(),
                })
                .await;
            }
            None => debug!("Item already has the requested status"),
        }

        Ok(change)
    }

    /// Applies header changes, drops `removed` lines and appends `added` ones.
    ///
    /// Each removed line must match one stored line by product, color,
    /// dimension, cushion and amount.
    #[instrument(skip(self, header, added, removed), fields(added = added.len(), removed = removed.len()))]
    pub async fn edit_receipt(
        &self,
        store_id: &str,
        receipt_id: Uuid,
        header: ReceiptHeaderUpdate,
        added: Vec<NewPurchaseItem>,
        removed: Vec<PurchaseItem>,
    ) -> Result<EditOutcome, ServiceError> {
        self.edit_receipt_inner(store_id, receipt_id, header, added, removed)
            .await
            .map_err(|e| record_failure("edit_receipt", e))
    }

    async fn edit_receipt_inner(
        &self,
        store_id: &str,
        receipt_id: Uuid,
        header: ReceiptHeaderUpdate,
        added: Vec<NewPurchaseItem>,
        removed: Vec<PurchaseItem>,
    ) -> Result<EditOutcome, ServiceError> {
        validate_items(&added)?;
        if header
            .personnel_id
            .as_deref()
            .is_some_and(|p| p.trim().is_empty())
        {
            return Err(ServiceError::ValidationError(
                "personnelId must not be blank".to_string(),
            ));
        }
        self.check_pending_claims(store_id, &added).await?;

        let added: Vec<PurchaseItem> = added.into_iter().map(NewPurchaseItem::into_item).collect();
        let product_names = self.product_names(added.iter().chain(removed.iter())).await;
        let outcome = self
            .coordinator
            .execute(&EditReceiptCommand {
                target: receipt_ref(store_id, receipt_id),
                header,
                added,
                removed,
                product_names,
            })
            .await?;

        let consumed = outcome
            .receipt
            .items
            .iter()
            .rev()
            .take(outcome.added)
            .filter_map(|item| item.external_request_id.clone())
            .collect();
        self.consume_pending_requests(store_id, consumed).await;

        info!(
            added = outcome.added,
            removed = outcome.removed.len(),
            total = %outcome.receipt.total_amount,
            "Purchase receipt edited"
        );
        self.emit(Event::ReceiptEdited {
            store_id: store_id.to_string(),
            receipt_id,
            added: outcome.added,
            removed: outcome.removed.len(),
            at: Utc::now(),
        })
        .await;

        Ok(outcome)
    }

    /// Cancels every line, reversing what each one still holds in the ledger.
    /// Calling it again on a cancelled receipt changes nothing.
    #[instrument(skip(self))]
    pub async fn cancel_all(
        &self,
        store_id: &str,
        receipt_id: Uuid,
    ) -> Result<CancelOutcome, ServiceError> {
        let product_names = match self.store.get_receipt(store_id, receipt_id).await {
            Ok(Some(receipt)) => self.product_names(&receipt.items).await,
            _ => ProductNames::default(),
        };

        let outcome = self
            .coordinator
            .execute(&CancelReceiptCommand {
                target: receipt_ref(store_id, receipt_id),
                product_names,
            })
            .await
            .map_err(|e| record_failure("cancel_receipt", e))?;

        if outcome.cancelled > 0 {
            info!(cancelled = outcome.cancelled, "Purchase receipt cancelled");
            self.emit(Event::ReceiptCancelled {
                store_id: store_id.to_string(),
                receipt_id,
                cancelled: outcome.cancelled,
                at: Utc::now(),
            })
            .await;
        } else {
            debug!("Receipt was already fully cancelled");
        }

        Ok(outcome)
    }

    /// Deletes a receipt whose lines are all `Completed` or `Cancelled`.
    /// Stock is left untouched.
    #[instrument(skip(self))]
    pub async fn delete_receipt(
        &self,
        store_id: &str,
        receipt_id: Uuid,
    ) -> Result<PurchaseReceipt, ServiceError> {
        let deleted = self
            .coordinator
            .execute(&DeleteReceiptCommand {
                target: receipt_ref(store_id, receipt_id),
            })
            .await
            .map_err(|e| record_failure("delete_receipt", e))?;

        info!(receipt_no = %deleted.receipt_no, "Purchase receipt deleted");
        self.emit(Event::ReceiptDeleted {
            store_id: store_id.to_string(),
            receipt_id,
            at: Utc::now(),
        })
        .await;

        Ok(deleted)
    }

    /// Sends every in-flight line back to `Pending`. Stock is left untouched.
    #[instrument(skip(self))]
    pub async fn reset_to_pending(
        &self,
        store_id: &str,
        receipt_id: Uuid,
    ) -> Result<ResetOutcome, ServiceError> {
        let outcome = self
            .coordinator
            .execute(&ResetReceiptCommand {
                target: receipt_ref(store_id, receipt_id),
            })
            .await
            .map_err(|e| record_failure("reset_receipt", e))?;

        if outcome.reset > 0 {
            info!(reset = outcome.reset, "Purchase receipt reset to pending");
            self.emit(Event::ReceiptReset {
                store_id: store_id.to_string(),
                receipt_id,
                reset: outcome.reset,
                at: Utc::now(),
            })
            .await;
        }

        Ok(outcome)
    }

    /// Proposes the next receipt number for a store.
    ///
    /// Best effort only: the value is not reserved, and `create_receipt` is
    /// where uniqueness is actually enforced.
    #[instrument(skip(self))]
    pub async fn next_receipt_number(&self, store_id: &str) -> String {
        let highest = match self
            .store
            .list_receipts(store_id, self.receipt_number_scan_limit)
            .await
        {
            Ok(receipts) => receipts
                .iter()
                .filter_map(PurchaseReceipt::numeric_receipt_no)
                .max(),
            Err(e) => {
                warn!(error = %e, "Receipt number scan failed; using timestamp");
                None
            }
        };

        match highest.and_then(|n| n.checked_add(1)) {
            Some(next) => next.to_string(),
            None => Utc::now().format(FALLBACK_NUMBER_FORMAT).to_string(),
        }
    }

    pub async fn get_receipt(
        &self,
        store_id: &str,
        receipt_id: Uuid,
    ) -> Result<PurchaseReceipt, ServiceError> {
        self.store
            .get_receipt(store_id, receipt_id)
            .await?
            .ok_or_else(|| ServiceError::receipt_not_found(store_id, receipt_id))
    }

    pub async fn list_receipts(
        &self,
        store_id: &str,
        limit: u64,
    ) -> Result<Vec<PurchaseReceipt>, ServiceError> {
        self.store.list_receipts(store_id, limit).await
    }

    pub async fn stock(&self, key: &VariantKey) -> Result<Option<StockRecord>, ServiceError> {
        self.store.get_stock(key).await
    }

    pub async fn pending_requests(
        &self,
        store_id: &str,
    ) -> Result<Vec<PendingRequest>, ServiceError> {
        self.demand.list_pending_requests(store_id).await
    }

    pub async fn describe_item(&self, item: &PurchaseItem) -> Result<ItemDescription, ServiceError> {
        catalog::describe(self.catalog.as_ref(), item).await
    }

    /// Catalog names for the products in `items`. Lookup failures only cost
    /// the display name, so they fall back to the id.
    async fn product_names<'a>(
        &self,
        items: impl IntoIterator<Item = &'a PurchaseItem>,
    ) -> ProductNames {
        let mut names = HashMap::new();
        for item in items {
            if names.contains_key(&item.product_id) {
                continue;
            }
            match self.catalog.product_name(&item.product_id).await {
                Ok(Some(name)) => {
                    names.insert(item.product_id.clone(), name);
                }
                Ok(None) => {}
                Err(e) => warn!(product_id = %item.product_id, error = %e, "Catalog lookup failed"),
            }
        }
        ProductNames::new(names)
    }

    /// Lines that claim a pending request must name one that is still
    /// pending in `store_id`, and no request may back two lines.
    async fn check_pending_claims(
        &self,
        store_id: &str,
        items: &[NewPurchaseItem],
    ) -> Result<(), ServiceError> {
        let mut claimed = HashSet::new();
        for id in items
            .iter()
            .filter_map(|item| item.external_request_id.as_deref())
            .filter(|id| !id.is_empty())
        {
            if !claimed.insert(id) {
                return Err(ServiceError::ValidationError(format!(
                    "pending request {id} is claimed by more than one line"
                )));
            }
        }
        if claimed.is_empty() {
            return Ok(());
        }

        let pending: HashSet<String> = self
            .demand
            .list_pending_requests(store_id)
            .await?
            .into_iter()
            .map(|request| request.id)
            .collect();
        match claimed.into_iter().find(|id| !pending.contains(*id)) {
            Some(id) => Err(ServiceError::ValidationError(format!(
                "pending request {id} is not pending in store {store_id}"
            ))),
            None => Ok(()),
        }
    }

    /// Runs after the ledger commit; the receipt already stands, so failures
    /// are logged rather than returned.
    async fn consume_pending_requests(&self, store_id: &str, request_ids: Vec<String>) {
        if request_ids.is_empty() {
            return;
        }
        if let Err(e) = self
            .demand
            .remove_pending_requests(store_id, &request_ids)
            .await
        {
            warn!(
                error = %e,
                requests = ?request_ids,
                "Failed to remove consumed pending requests"
            );
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

fn validate_items(items: &[NewPurchaseItem]) -> Result<(), ServiceError> {
    for (index, item) in items.iter().enumerate() {
        item.validate().map_err(|e| {
            ServiceError::ValidationError(format!("item {index}: {e}"))
        })?;
    }
    Ok(())
}

fn record_failure(operation: &'static str, err: ServiceError) -> ServiceError {
    counter!("ledger.operation.failed", 1, "operation" => operation, "code" => err.error_code());
    warn!(operation, code = err.error_code(), error = %err, "Ledger operation failed");
    err
}
