use std::collections::BTreeSet;

use super::{LedgerCommand, ReceiptRef};
use crate::{
    db::transaction::LedgerTransaction,
    errors::ServiceError,
    models::{ItemStatus, PurchaseReceipt, VariantKey},
    services::status_machine::{delta_rule, plan_transition, StatusTransition},
};

/// Moves one line to a new status, shifting stock across the `Completed`
/// boundary when the move crosses it.
#[derive(Debug, Clone)]
pub struct AdvanceItemStatusCommand {
    pub target: ReceiptRef,
    pub item_index: usize,
    pub requested: ItemStatus,
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub receipt: PurchaseReceipt,
    /// `None` when the item already had the requested status.
    pub transition: Option<StatusTransition>,
}

impl LedgerCommand for AdvanceItemStatusCommand {
    type Output = StatusChange;

    fn name(&self) -> &'static str {
        "advance_item_status"
    }

    fn receipt_ref(&self) -> Option<ReceiptRef> {
        Some(self.target.clone())
    }

    fn stock_keys(&self, receipt: Option<&PurchaseReceipt>) -> BTreeSet<VariantKey> {
        receipt
            .and_then(|r| r.items.get(self.item_index))
            .map(|item| BTreeSet::from([item.variant_key()]))
            .unwrap_or_default()
    }

    fn apply(&self, txn: &mut LedgerTransaction) -> Result<Self::Output, ServiceError> {
        let mut receipt = txn.existing_receipt()?.clone();
        let item = receipt
            .items
            .get(self.item_index)
            .ok_or(ServiceError::ItemNotFound {
                receipt_id: receipt.receipt_id,
                index: self.item_index,
            })?;

        let Some(transition) = plan_transition(item.status, self.requested)? else {
            return Ok(StatusChange {
                receipt,
                transition: None,
            });
        };

        // This path never seeds: the record must exist since the line was created.
        let key = item.variant_key();
        if txn.stock(&key).is_none() {
            return Err(ServiceError::StockRecordNotFound(key.to_string()));
        }
        txn.apply_delta(
            &key,
            delta_rule(item.item_type, transition.boundary, item.quantity),
            None,
        )?;

        receipt.items[self.item_index].status = transition.to;
        txn.update_receipt(receipt.clone())?;

        Ok(StatusChange {
            receipt,
            transition: Some(transition),
        })
    }
}
