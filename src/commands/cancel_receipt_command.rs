use std::collections::BTreeSet;

use rust_decimal::Decimal;

use super::{LedgerCommand, ProductNames, ReceiptRef};
use crate::{
    db::transaction::LedgerTransaction,
    errors::ServiceError,
    models::{ItemStatus, PurchaseReceipt, VariantKey},
    services::status_machine::contribution,
};

/// Cancels every line of a receipt, reversing what each still holds in the
/// ledger. Running it again is a no-op.
#[derive(Debug, Clone)]
pub struct CancelReceiptCommand {
    pub target: ReceiptRef,
    pub product_names: ProductNames,
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub receipt: PurchaseReceipt,
    /// Lines that were not cancelled before this call.
    pub cancelled: usize,
}

impl LedgerCommand for CancelReceiptCommand {
    type Output = CancelOutcome;

    fn name(&self) -> &'static str {
        "cancel_receipt"
    }

    fn receipt_ref(&self) -> Option<ReceiptRef> {
        Some(self.target.clone())
    }

    fn stock_keys(&self, receipt: Option<&PurchaseReceipt>) -> BTreeSet<VariantKey> {
        receipt
            .map(|r| {
                r.items
                    .iter()
                    .filter(|item| item.status != ItemStatus::Cancelled)
                    .map(|item| item.variant_key())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn apply(&self, txn: &mut LedgerTransaction) -> Result<Self::Output, ServiceError> {
        let mut receipt = txn.existing_receipt()?.clone();
        let mut cancelled = 0;

        for item in receipt
            .items
            .iter_mut()
            .filter(|item| item.status != ItemStatus::Cancelled)
        {
            let key = item.variant_key();
            txn.apply_delta(
                &key,
                -contribution(item),
                Some(self.product_names.seed_for(&key)),
            )?;
            item.status = ItemStatus::Cancelled;
            cancelled += 1;
        }

        if cancelled == 0 && receipt.total_amount.is_zero() {
            return Ok(CancelOutcome {
                receipt,
                cancelled,
            });
        }

        receipt.total_amount = Decimal::ZERO;
        txn.update_receipt(receipt.clone())?;
        Ok(CancelOutcome {
            receipt,
            cancelled,
        })
    }
}
