use std::collections::BTreeSet;

use super::{LedgerCommand, ProductNames, ReceiptRef};
use crate::{
    db::transaction::LedgerTransaction,
    errors::ServiceError,
    models::{PurchaseItem, PurchaseReceipt, ReceiptHeaderUpdate, VariantKey},
    services::status_machine::{contribution, creation_delta},
};

/// Three-way reconciliation of an existing receipt: header changes, lines
/// removed (their stock contribution reversed) and lines added (booked as
/// incoming).
#[derive(Debug, Clone)]
pub struct EditReceiptCommand {
    pub target: ReceiptRef,
    pub header: ReceiptHeaderUpdate,
    /// New lines, already `Pending`.
    pub added: Vec<PurchaseItem>,
    /// Lines to drop, matched against the receipt by `PurchaseItem::match_key`.
    pub removed: Vec<PurchaseItem>,
    pub product_names: ProductNames,
}

#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub receipt: PurchaseReceipt,
    /// The stored lines that were removed, with the status they had.
    pub removed: Vec<PurchaseItem>,
    pub added: usize,
}

impl LedgerCommand for EditReceiptCommand {
    type Output = EditOutcome;

    fn name(&self) -> &'static str {
        "edit_receipt"
    }

    fn receipt_ref(&self) -> Option<ReceiptRef> {
        Some(self.target.clone())
    }

    fn stock_keys(&self, _receipt: Option<&PurchaseReceipt>) -> BTreeSet<VariantKey> {
        // The match key contains the variant key, so the removed lines name
        // the same keys as the stored lines they will pair with.
        self.removed
            .iter()
            .chain(self.added.iter())
            .map(|item| item.variant_key())
            .collect()
    }

    fn apply(&self, txn: &mut LedgerTransaction) -> Result<Self::Output, ServiceError> {
        let mut receipt = txn.existing_receipt()?.clone();
        let mut remaining: Vec<Option<PurchaseItem>> =
            receipt.items.drain(..).map(Some).collect();
        let mut removed = Vec::with_capacity(self.removed.len());

        // Each requested removal consumes exactly one stored line.
        for wanted in &self.removed {
            let match_key = wanted.match_key();
            let stored = remaining
                .iter_mut()
                .find(|slot| {
                    slot.as_ref()
                        .is_some_and(|item| item.match_key() == match_key)
                })
                .and_then(Option::take)
                .ok_or_else(|| {
                    ServiceError::InvalidOperation(format!(
                        "receipt {} has no line matching {} / {} to remove",
                        receipt.receipt_id, wanted.product_id, wanted.color_id
                    ))
                })?;

            let reversal = -contribution(&stored);
            if !reversal.is_zero() {
                let key = stored.variant_key();
                txn.apply_delta(&key, reversal, Some(self.product_names.seed_for(&key)))?;
            }
            removed.push(stored);
        }

        for item in &self.added {
            let key = item.variant_key();
            txn.apply_delta(
                &key,
                creation_delta(item),
                Some(self.product_names.seed_for(&key)),
            )?;
        }

        receipt.items = remaining
            .into_iter()
            .flatten()
            .chain(self.added.iter().cloned())
            .collect();
        receipt.apply_header(self.header.clone());
        receipt.recompute_total();
        txn.update_receipt(receipt.clone())?;

        Ok(EditOutcome {
            receipt,
            removed,
            added: self.added.len(),
        })
    }
}
