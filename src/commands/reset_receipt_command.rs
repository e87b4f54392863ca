use std::collections::BTreeSet;

use super::{LedgerCommand, ReceiptRef};
use crate::{
    db::transaction::LedgerTransaction,
    errors::ServiceError,
    models::{ItemStatus, PurchaseReceipt, VariantKey},
};

/// Sends every in-flight line back to `Pending`. All in-flight states share
/// the incoming bucket, so no counter moves.
#[derive(Debug, Clone)]
pub struct ResetReceiptCommand {
    pub target: ReceiptRef,
}

#[derive(Debug, Clone)]
pub struct ResetOutcome {
    pub receipt: PurchaseReceipt,
    pub reset: usize,
}

impl LedgerCommand for ResetReceiptCommand {
    type Output = ResetOutcome;

    fn name(&self) -> &'static str {
        "reset_receipt"
    }

    fn receipt_ref(&self) -> Option<ReceiptRef> {
        Some(self.target.clone())
    }

    fn stock_keys(&self, _receipt: Option<&PurchaseReceipt>) -> BTreeSet<VariantKey> {
        BTreeSet::new()
    }

    fn apply(&self, txn: &mut LedgerTransaction) -> Result<Self::Output, ServiceError> {
        let mut receipt = txn.existing_receipt()?.clone();
        let mut reset = 0;

        for item in receipt.items.iter_mut().filter(|item| {
            item.status.is_in_flight() && item.status != ItemStatus::Pending
        }) {
            item.status = ItemStatus::Pending;
            reset += 1;
        }

        if reset > 0 {
            txn.update_receipt(receipt.clone())?;
        }
        Ok(ResetOutcome { receipt, reset })
    }
}
