use std::collections::BTreeSet;

use super::{LedgerCommand, ReceiptRef};
use crate::{
    db::transaction::LedgerTransaction,
    errors::ServiceError,
    models::{PurchaseReceipt, VariantKey},
};

/// Removes a receipt whose lines have all reached a terminal status.
///
/// Deleting a receipt with in-flight lines would strand their incoming or
/// reserved quantity with nothing left to account for it.
#[derive(Debug, Clone)]
pub struct DeleteReceiptCommand {
    pub target: ReceiptRef,
}

impl LedgerCommand for DeleteReceiptCommand {
    type Output = PurchaseReceipt;

    fn name(&self) -> &'static str {
        "delete_receipt"
    }

    fn receipt_ref(&self) -> Option<ReceiptRef> {
        Some(self.target.clone())
    }

    fn stock_keys(&self, _receipt: Option<&PurchaseReceipt>) -> BTreeSet<VariantKey> {
        BTreeSet::new()
    }

    fn apply(&self, txn: &mut LedgerTransaction) -> Result<Self::Output, ServiceError> {
        let receipt = txn.existing_receipt()?.clone();

        let in_flight = receipt.in_flight_items();
        if in_flight > 0 {
            return Err(ServiceError::UnsafeDelete {
                receipt_id: receipt.receipt_id,
                in_flight,
            });
        }

        txn.delete_receipt()?;
        Ok(receipt)
    }
}
