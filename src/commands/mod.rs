use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::{
    db::transaction::LedgerTransaction,
    errors::ServiceError,
    models::{PurchaseReceipt, StockSeed, VariantKey},
};

pub mod advance_item_status_command;
pub mod cancel_receipt_command;
pub mod create_receipt_command;
pub mod delete_receipt_command;
pub mod edit_receipt_command;
pub mod reset_receipt_command;

pub use advance_item_status_command::{AdvanceItemStatusCommand, StatusChange};
pub use cancel_receipt_command::{CancelOutcome, CancelReceiptCommand};
pub use create_receipt_command::CreateReceiptCommand;
pub use delete_receipt_command::DeleteReceiptCommand;
pub use edit_receipt_command::{EditOutcome, EditReceiptCommand};
pub use reset_receipt_command::{ResetOutcome, ResetReceiptCommand};

/// Identifies the receipt a command reads and writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiptRef {
    pub store_id: String,
    pub receipt_id: Uuid,
}

/// Command pattern for ledger mutations.
///
/// A command declares what it reads, then stages its writes on a
/// [`LedgerTransaction`]. The coordinator may call `stock_keys` and `apply`
/// several times, once per attempt, so both must be free of side effects
/// outside the transaction.
pub trait LedgerCommand: Send + Sync {
    /// The value handed back to the caller once the unit of work commits
    type Output: Send;

    /// Operation name used in spans, metrics and conflict errors
    fn name(&self) -> &'static str;

    /// Receipt to read before anything else, if the command targets one
    fn receipt_ref(&self) -> Option<ReceiptRef>;

    /// Stock keys this attempt may touch, derived from the freshly read receipt
    fn stock_keys(&self, receipt: Option<&PurchaseReceipt>) -> BTreeSet<VariantKey>;

    /// Stage all changes. Any error aborts the attempt without committing.
    fn apply(&self, txn: &mut LedgerTransaction) -> Result<Self::Output, ServiceError>;
}

/// Product names resolved ahead of the transaction, used when a stock key
/// is seen for the first time.
#[derive(Clone, Debug, Default)]
pub struct ProductNames(HashMap<String, String>);

impl ProductNames {
    pub fn new(names: HashMap<String, String>) -> Self {
        Self(names)
    }

    /// Falls back to the product id when the catalog had no name.
    pub fn seed_for(&self, key: &VariantKey) -> StockSeed {
        StockSeed {
            key: key.clone(),
            product_name: self
                .0
                .get(&key.product_id)
                .cloned()
                .unwrap_or_else(|| key.product_id.clone()),
        }
    }
}
