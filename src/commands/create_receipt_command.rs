use std::collections::BTreeSet;

use super::{LedgerCommand, ProductNames, ReceiptRef};
use crate::{
    db::transaction::LedgerTransaction,
    errors::ServiceError,
    models::{PurchaseReceipt, VariantKey},
    services::status_machine::creation_delta,
};

/// Persists a new receipt and books every line as incoming stock.
#[derive(Debug, Clone)]
pub struct CreateReceiptCommand {
    pub receipt: PurchaseReceipt,
    pub product_names: ProductNames,
}

impl LedgerCommand for CreateReceiptCommand {
    type Output = PurchaseReceipt;

    fn name(&self) -> &'static str {
        "create_receipt"
    }

    fn receipt_ref(&self) -> Option<ReceiptRef> {
        None
    }

    fn stock_keys(&self, _receipt: Option<&PurchaseReceipt>) -> BTreeSet<VariantKey> {
        self.receipt.items.iter().map(|item| item.variant_key()).collect()
    }

    fn apply(&self, txn: &mut LedgerTransaction) -> Result<Self::Output, ServiceError> {
        for item in &self.receipt.items {
            let key = item.variant_key();
            txn.apply_delta(
                &key,
                creation_delta(item),
                Some(self.product_names.seed_for(&key)),
            )?;
        }

        txn.insert_receipt(self.receipt.clone());
        Ok(self.receipt.clone())
    }
}
