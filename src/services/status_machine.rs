//! Item status lifecycle and the stock movements it implies.
//!
//! Only the `Completed` boundary moves quantity between the incoming and
//! on-hand buckets. Every other step among the in-flight states is a label
//! change: the quantity has been counted as incoming since the line was
//! created.

use crate::{
    errors::ServiceError,
    models::{ItemStatus, ItemType, PurchaseItem, StockDelta},
};

/// Which side of the `Completed` boundary a transition crosses, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StockBoundary {
    EnteringCompleted,
    LeavingCompleted,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: ItemStatus,
    pub to: ItemStatus,
    pub boundary: StockBoundary,
}

/// The single legal forward successor, or `None` for terminal states.
pub fn next_status(current: ItemStatus) -> Option<ItemStatus> {
    match current {
        ItemStatus::Pending => Some(ItemStatus::Approved),
        ItemStatus::Approved => Some(ItemStatus::InProduction),
        ItemStatus::InProduction => Some(ItemStatus::Shipping),
        ItemStatus::Shipping => Some(ItemStatus::Completed),
        ItemStatus::Completed | ItemStatus::Cancelled => None,
    }
}

/// Validates a requested status change.
///
/// Returns `Ok(None)` when nothing changes. Forward moves must be exactly one
/// step; regressions to any earlier pipeline state are allowed, including out
/// of `Completed`. `Cancelled` is only reachable through receipt cancellation
/// and is never left.
pub fn plan_transition(
    current: ItemStatus,
    requested: ItemStatus,
) -> Result<Option<StatusTransition>, ServiceError> {
    if current == requested {
        return Ok(None);
    }

    let (from_rank, to_rank) = match (current.pipeline_rank(), requested.pipeline_rank()) {
        (None, _) => {
            return Err(ServiceError::InvalidStatus(format!(
                "{current} items cannot change status"
            )))
        }
        (_, None) => {
            return Err(ServiceError::InvalidStatus(format!(
                "{requested} is only reachable by cancelling the receipt"
            )))
        }
        (Some(from), Some(to)) => (from, to),
    };

    if to_rank > from_rank && next_status(current) != Some(requested) {
        return Err(ServiceError::InvalidStatus(format!(
            "{current} can only advance to {}",
            next_status(current)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "nothing".to_string())
        )));
    }

    let boundary = match (current, requested) {
        (_, ItemStatus::Completed) => StockBoundary::EnteringCompleted,
        (ItemStatus::Completed, _) => StockBoundary::LeavingCompleted,
        _ => StockBoundary::None,
    };

    Ok(Some(StatusTransition {
        from: current,
        to: requested,
        boundary,
    }))
}

/// Counters moved when an item of `item_type` crosses `boundary`.
pub fn delta_rule(item_type: ItemType, boundary: StockBoundary, quantity: u32) -> StockDelta {
    let qty = i64::from(quantity);
    match (item_type, boundary) {
        (_, StockBoundary::None) => StockDelta::ZERO,
        (ItemType::Stock, StockBoundary::EnteringCompleted) => StockDelta {
            incoming: -qty,
            free: qty,
            ..StockDelta::ZERO
        },
        (ItemType::Stock, StockBoundary::LeavingCompleted) => StockDelta {
            free: -qty,
            incoming: qty,
            ..StockDelta::ZERO
        },
        (ItemType::Order, StockBoundary::EnteringCompleted) => StockDelta {
            incoming_reserved: -qty,
            reserved: qty,
            ..StockDelta::ZERO
        },
        (ItemType::Order, StockBoundary::LeavingCompleted) => StockDelta {
            reserved: -qty,
            incoming_reserved: qty,
            ..StockDelta::ZERO
        },
    }
}

/// Counters bumped when a new line joins a receipt.
///
/// Order lines that carry an external request id were already reserved by
/// the demand system when the request was raised, so they add nothing here.
pub fn creation_delta(item: &PurchaseItem) -> StockDelta {
    let qty = i64::from(item.quantity);
    match item.item_type {
        ItemType::Stock => StockDelta {
            incoming: qty,
            ..StockDelta::ZERO
        },
        ItemType::Order if item.external_request_id.is_some() => StockDelta::ZERO,
        ItemType::Order => StockDelta {
            incoming_reserved: qty,
            ..StockDelta::ZERO
        },
    }
}

/// What a line currently holds in the ledger, given its status.
///
/// Negating this is how removal and cancellation undo a line.
pub fn contribution(item: &PurchaseItem) -> StockDelta {
    let qty = i64::from(item.quantity);
    match (item.item_type, item.status) {
        (_, ItemStatus::Cancelled) => StockDelta::ZERO,
        (ItemType::Stock, ItemStatus::Completed) => StockDelta {
            free: qty,
            ..StockDelta::ZERO
        },
        (ItemType::Order, ItemStatus::Completed) => StockDelta {
            reserved: qty,
            ..StockDelta::ZERO
        },
        (
            ItemType::Stock,
            ItemStatus::Pending | ItemStatus::Approved | ItemStatus::InProduction | ItemStatus::Shipping,
        ) => StockDelta {
            incoming: qty,
            ..StockDelta::ZERO
        },
        (
            ItemType::Order,
            ItemStatus::Pending | ItemStatus::Approved | ItemStatus::InProduction | ItemStatus::Shipping,
        ) => StockDelta {
            incoming_reserved: qty,
            ..StockDelta::ZERO
        },
    }
}
