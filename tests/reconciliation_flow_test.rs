mod common;

use assert_matches::assert_matches;
use common::{harness, harness_with_demand, item, pending_request, receipt, STORE};
use purchase_ledger::{
    db::{store::ReceiptWrite, LedgerStore, WriteSet},
    models::{ItemStatus, ItemType, NewPurchaseItem, PurchaseReceipt, ReceiptHeaderUpdate},
    ServiceError,
};
use rust_decimal_macros::dec;

async fn advance_to(
    engine: &purchase_ledger::ReconciliationEngine,
    created: &PurchaseReceipt,
    index: usize,
    target: ItemStatus,
) {
    let path = [
        ItemStatus::Approved,
        ItemStatus::InProduction,
        ItemStatus::Shipping,
        ItemStatus::Completed,
    ];
    for status in path {
        engine
            .advance_status(STORE, created.receipt_id, index, status)
            .await
            .unwrap();
        if status == target {
            break;
        }
    }
}

#[tokio::test]
async fn create_then_cancel_restores_counters() {
    let h = harness();
    let created = h
        .engine
        .create_receipt(STORE, receipt("1001", vec![item(ItemType::Stock, 5, dec!(250))]))
        .await
        .unwrap();
    let key = created.items[0].variant_key();

    let stock = h.engine.stock(&key).await.unwrap().unwrap();
    assert_eq!(stock.incoming_stock, 5);
    assert_eq!(stock.product_name, "Three Seat Sofa");

    let outcome = h.engine.cancel_all(STORE, created.receipt_id).await.unwrap();
    assert_eq!(outcome.cancelled, 1);
    assert_eq!(outcome.receipt.total_amount, dec!(0));
    assert!(outcome
        .receipt
        .items
        .iter()
        .all(|i| i.status == ItemStatus::Cancelled));

    let stock = h.engine.stock(&key).await.unwrap().unwrap();
    assert_eq!(
        (
            stock.free_stock,
            stock.reserved_stock,
            stock.incoming_stock,
            stock.incoming_reserved_stock
        ),
        (0, 0, 0, 0)
    );
}

#[tokio::test]
async fn cancel_twice_is_a_no_op() {
    let h = harness();
    let created = h
        .engine
        .create_receipt(STORE, receipt("1002", vec![item(ItemType::Stock, 2, dec!(10))]))
        .await
        .unwrap();
    let key = created.items[0].variant_key();

    h.engine.cancel_all(STORE, created.receipt_id).await.unwrap();
    let version = h.store.stock_version(&key).await;

    let again = h.engine.cancel_all(STORE, created.receipt_id).await.unwrap();
    assert_eq!(again.cancelled, 0);
    assert_eq!(h.store.stock_version(&key).await, version);
}

#[tokio::test]
async fn cancelling_a_completed_line_takes_it_out_of_free_stock() {
    let h = harness();
    let created = h
        .engine
        .create_receipt(
            STORE,
            receipt(
                "1003",
                vec![
                    item(ItemType::Stock, 4, dec!(40)),
                    item(ItemType::Order, 1, dec!(90)),
                ],
            ),
        )
        .await
        .unwrap();
    let key = created.items[0].variant_key();
    advance_to(&h.engine, &created, 0, ItemStatus::Completed).await;

    let stock = h.engine.stock(&key).await.unwrap().unwrap();
    assert_eq!((stock.free_stock, stock.incoming_stock), (4, 0));
    assert_eq!(stock.incoming_reserved_stock, 1);

    h.engine.cancel_all(STORE, created.receipt_id).await.unwrap();

    let stock = h.engine.stock(&key).await.unwrap().unwrap();
    assert_eq!(stock.free_stock, 0);
    assert_eq!(stock.incoming_reserved_stock, 0);
}

#[tokio::test]
async fn delete_waits_for_terminal_items() {
    let h = harness();
    let created = h
        .engine
        .create_receipt(STORE, receipt("1004", vec![item(ItemType::Stock, 3, dec!(30))]))
        .await
        .unwrap();
    advance_to(&h.engine, &created, 0, ItemStatus::Shipping).await;

    let err = h
        .engine
        .delete_receipt(STORE, created.receipt_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::UnsafeDelete { in_flight: 1, .. });
    assert!(!err.is_retryable());

    h.engine
        .advance_status(STORE, created.receipt_id, 0, ItemStatus::Completed)
        .await
        .unwrap();
    let key = created.items[0].variant_key();
    let before = h.engine.stock(&key).await.unwrap();

    let deleted = h
        .engine
        .delete_receipt(STORE, created.receipt_id)
        .await
        .unwrap();
    assert_eq!(deleted.receipt_no, "1004");
    assert_eq!(h.engine.stock(&key).await.unwrap(), before);
    assert_matches!(
        h.engine.get_receipt(STORE, created.receipt_id).await,
        Err(ServiceError::ReceiptNotFound { .. })
    );
}

#[tokio::test]
async fn edit_swaps_lines_and_nets_incoming() {
    let h = harness();
    let created = h
        .engine
        .create_receipt(STORE, receipt("1005", vec![item(ItemType::Stock, 3, dec!(30))]))
        .await
        .unwrap();
    let key = created.items[0].variant_key();

    let outcome = h
        .engine
        .edit_receipt(
            STORE,
            created.receipt_id,
            ReceiptHeaderUpdate {
                note: Some("corrected".into()),
                ..Default::default()
            },
            vec![item(ItemType::Stock, 7, dec!(70))],
            vec![created.items[0].clone()],
        )
        .await
        .unwrap();

    assert_eq!(outcome.removed.len(), 1);
    assert_eq!(outcome.added, 1);
    assert_eq!(outcome.receipt.items.len(), 1);
    assert_eq!(outcome.receipt.items[0].quantity, 7);
    assert_eq!(outcome.receipt.total_amount, dec!(70));
    assert_eq!(outcome.receipt.note.as_deref(), Some("corrected"));

    let stock = h.engine.stock(&key).await.unwrap().unwrap();
    assert_eq!(stock.incoming_stock, 7);
}

#[tokio::test]
async fn edit_removes_one_line_per_request_and_respects_cushion() {
    let h = harness();
    let mut cushioned = item(ItemType::Stock, 2, dec!(15));
    cushioned.cushion_id = Some("soft".into());
    let created = h
        .engine
        .create_receipt(
            STORE,
            receipt(
                "1006",
                vec![
                    item(ItemType::Stock, 2, dec!(15)),
                    item(ItemType::Stock, 2, dec!(15)),
                    cushioned,
                ],
            ),
        )
        .await
        .unwrap();
    let key = created.items[0].variant_key();
    assert_eq!(h.engine.stock(&key).await.unwrap().unwrap().incoming_stock, 6);

    let outcome = h
        .engine
        .edit_receipt(
            STORE,
            created.receipt_id,
            ReceiptHeaderUpdate::default(),
            vec![],
            vec![created.items[2].clone()],
        )
        .await
        .unwrap();

    assert_eq!(outcome.receipt.items.len(), 2);
    assert!(outcome.receipt.items.iter().all(|i| i.cushion_id.is_none()));
    assert_eq!(h.engine.stock(&key).await.unwrap().unwrap().incoming_stock, 4);
}

#[tokio::test]
async fn edit_with_unmatched_removal_changes_nothing() {
    let h = harness();
    let created = h
        .engine
        .create_receipt(STORE, receipt("1007", vec![item(ItemType::Stock, 3, dec!(30))]))
        .await
        .unwrap();
    let key = created.items[0].variant_key();

    let mut stranger = created.items[0].clone();
    stranger.amount = dec!(31);
    let err = h
        .engine
        .edit_receipt(
            STORE,
            created.receipt_id,
            ReceiptHeaderUpdate::default(),
            vec![item(ItemType::Stock, 9, dec!(1))],
            vec![stranger],
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InvalidOperation(_));
    assert_eq!(h.engine.stock(&key).await.unwrap().unwrap().incoming_stock, 3);
    assert_eq!(
        h.engine
            .get_receipt(STORE, created.receipt_id)
            .await
            .unwrap(),
        created
    );
}

#[tokio::test]
async fn removing_a_completed_line_reverses_free_stock() {
    let h = harness();
    let created = h
        .engine
        .create_receipt(STORE, receipt("1008", vec![item(ItemType::Order, 2, dec!(80))]))
        .await
        .unwrap();
    advance_to(&h.engine, &created, 0, ItemStatus::Completed).await;
    let key = created.items[0].variant_key();
    let completed = h
        .engine
        .get_receipt(STORE, created.receipt_id)
        .await
        .unwrap()
        .items[0]
        .clone();

    let stock = h.engine.stock(&key).await.unwrap().unwrap();
    assert_eq!((stock.reserved_stock, stock.incoming_reserved_stock), (2, 0));

    h.engine
        .edit_receipt(
            STORE,
            created.receipt_id,
            ReceiptHeaderUpdate::default(),
            vec![],
            vec![completed],
        )
        .await
        .unwrap();

    let stock = h.engine.stock(&key).await.unwrap().unwrap();
    assert_eq!(stock.reserved_stock, 0);
}

#[tokio::test]
async fn duplicate_receipt_numbers_are_rejected_per_store() {
    let h = harness();
    h.engine
        .create_receipt(STORE, receipt("2000", vec![item(ItemType::Stock, 1, dec!(5))]))
        .await
        .unwrap();

    let err = h
        .engine
        .create_receipt(STORE, receipt(" 2000 ", vec![item(ItemType::Stock, 1, dec!(5))]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::DuplicateReceiptNumber { ref receipt_no, .. } if receipt_no == "2000");
    assert_eq!(err.error_code(), "duplicate_receipt_number");

    h.engine
        .create_receipt("store-2", receipt("2000", vec![item(ItemType::Stock, 1, dec!(5))]))
        .await
        .unwrap();

    let key = item(ItemType::Stock, 1, dec!(5)).into_item().variant_key();
    assert_eq!(h.engine.stock(&key).await.unwrap().unwrap().incoming_stock, 2);
}

#[tokio::test]
async fn concurrent_duplicates_commit_exactly_once() {
    let h = harness();
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .create_receipt(STORE, receipt("3000", vec![item(ItemType::Stock, 1, dec!(5))]))
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert_matches!(e, ServiceError::DuplicateReceiptNumber { .. }),
        }
    }

    assert_eq!(created, 1);
    let key = item(ItemType::Stock, 1, dec!(5)).into_item().variant_key();
    assert_eq!(h.engine.stock(&key).await.unwrap().unwrap().incoming_stock, 1);
}

#[tokio::test]
async fn requesting_the_current_status_touches_nothing() {
    let h = harness();
    let created = h
        .engine
        .create_receipt(STORE, receipt("1009", vec![item(ItemType::Stock, 3, dec!(30))]))
        .await
        .unwrap();
    let key = created.items[0].variant_key();
    let version = h.store.stock_version(&key).await;

    let change = h
        .engine
        .advance_status(STORE, created.receipt_id, 0, ItemStatus::Pending)
        .await
        .unwrap();

    assert!(change.transition.is_none());
    assert_eq!(change.receipt, created);
    assert_eq!(h.store.stock_version(&key).await, version);
}

#[tokio::test]
async fn skipping_states_and_direct_cancel_are_rejected() {
    let h = harness();
    let created = h
        .engine
        .create_receipt(STORE, receipt("1010", vec![item(ItemType::Stock, 3, dec!(30))]))
        .await
        .unwrap();

    assert_matches!(
        h.engine
            .advance_status(STORE, created.receipt_id, 0, ItemStatus::Shipping)
            .await,
        Err(ServiceError::InvalidStatus(_))
    );
    assert_matches!(
        h.engine
            .advance_status(STORE, created.receipt_id, 0, ItemStatus::Cancelled)
            .await,
        Err(ServiceError::InvalidStatus(_))
    );

    h.engine.cancel_all(STORE, created.receipt_id).await.unwrap();
    assert_matches!(
        h.engine
            .advance_status(STORE, created.receipt_id, 0, ItemStatus::Pending)
            .await,
        Err(ServiceError::InvalidStatus(_))
    );
}

#[tokio::test]
async fn regression_out_of_completed_returns_stock_to_incoming() {
    let h = harness();
    let created = h
        .engine
        .create_receipt(STORE, receipt("1011", vec![item(ItemType::Stock, 6, dec!(60))]))
        .await
        .unwrap();
    advance_to(&h.engine, &created, 0, ItemStatus::Completed).await;
    let key = created.items[0].variant_key();

    let change = h
        .engine
        .advance_status(STORE, created.receipt_id, 0, ItemStatus::Approved)
        .await
        .unwrap();

    assert_eq!(change.receipt.items[0].status, ItemStatus::Approved);
    let stock = h.engine.stock(&key).await.unwrap().unwrap();
    assert_eq!((stock.free_stock, stock.incoming_stock), (0, 6));
}

#[tokio::test]
async fn advancing_without_a_stock_record_fails() {
    let h = harness();
    let orphan = PurchaseReceipt::new(
        STORE,
        receipt("1012", vec![item(ItemType::Stock, 1, dec!(1))]),
    );
    h.store
        .commit(WriteSet {
            receipt: Some(ReceiptWrite::Insert(orphan.clone())),
            stock: vec![],
        })
        .await
        .unwrap();

    assert_matches!(
        h.engine
            .advance_status(STORE, orphan.receipt_id, 0, ItemStatus::Approved)
            .await,
        Err(ServiceError::StockRecordNotFound(_))
    );
    let unchanged = h.engine.get_receipt(STORE, orphan.receipt_id).await.unwrap();
    assert_eq!(unchanged.items[0].status, ItemStatus::Pending);
}

#[tokio::test]
async fn reset_sends_in_flight_lines_back_to_pending() {
    let h = harness();
    let created = h
        .engine
        .create_receipt(
            STORE,
            receipt(
                "1013",
                vec![
                    item(ItemType::Stock, 1, dec!(10)),
                    item(ItemType::Stock, 2, dec!(20)),
                    item(ItemType::Order, 3, dec!(30)),
                ],
            ),
        )
        .await
        .unwrap();
    advance_to(&h.engine, &created, 0, ItemStatus::Shipping).await;
    advance_to(&h.engine, &created, 1, ItemStatus::Completed).await;
    let key = created.items[0].variant_key();
    let before = h.engine.stock(&key).await.unwrap();

    let outcome = h
        .engine
        .reset_to_pending(STORE, created.receipt_id)
        .await
        .unwrap();

    assert_eq!(outcome.reset, 1);
    let statuses: Vec<_> = outcome.receipt.items.iter().map(|i| i.status).collect();
    assert_eq!(
        statuses,
        vec![ItemStatus::Pending, ItemStatus::Completed, ItemStatus::Pending]
    );
    assert_eq!(h.engine.stock(&key).await.unwrap(), before);
}

#[tokio::test]
async fn consumed_pending_requests_are_not_reserved_twice() {
    let h = harness_with_demand(vec![pending_request("req-1", 2), pending_request("req-2", 1)]);
    let requests = h.engine.pending_requests(STORE).await.unwrap();
    let from_request = NewPurchaseItem::from_pending_request(&requests[0], dec!(400), "backorder");

    let created = h
        .engine
        .create_receipt(STORE, receipt("1014", vec![from_request]))
        .await
        .unwrap();

    assert_eq!(created.items[0].item_type, ItemType::Order);
    assert_eq!(created.items[0].external_request_id.as_deref(), Some("req-1"));
    let stock = h
        .engine
        .stock(&created.items[0].variant_key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock.incoming_reserved_stock, 0);

    let left: Vec<_> = h
        .engine
        .pending_requests(STORE)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(left, vec!["req-2".to_string()]);
}

#[tokio::test]
async fn a_pending_request_backs_at_most_one_receipt() {
    let h = harness_with_demand(vec![pending_request("req-1", 2)]);
    let requests = h.engine.pending_requests(STORE).await.unwrap();
    let line = NewPurchaseItem::from_pending_request(&requests[0], dec!(400), "backorder");

    let first = h
        .engine
        .create_receipt(STORE, receipt("1020", vec![line.clone()]))
        .await
        .unwrap();
    assert_matches!(
        h.engine
            .create_receipt(STORE, receipt("1021", vec![line.clone()]))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        h.engine
            .edit_receipt(STORE, first.receipt_id, Default::default(), vec![line], vec![])
            .await,
        Err(ServiceError::ValidationError(_))
    );

    assert_eq!(h.engine.list_receipts(STORE, 10).await.unwrap().len(), 1);
    let reread = h.engine.get_receipt(STORE, first.receipt_id).await.unwrap();
    assert_eq!(reread.items.len(), 1);
}

#[tokio::test]
async fn concurrent_creates_on_one_key_lose_no_updates() {
    let h = harness();
    let tasks: Vec<_> = (0..12)
        .map(|n| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .create_receipt(
                        STORE,
                        receipt(&format!("{}", 5000 + n), vec![item(ItemType::Stock, 2, dec!(5))]),
                    )
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let key = item(ItemType::Stock, 2, dec!(5)).into_item().variant_key();
    assert_eq!(h.engine.stock(&key).await.unwrap().unwrap().incoming_stock, 24);
    assert_eq!(h.engine.next_receipt_number(STORE).await, "5012");
}

#[tokio::test]
async fn describe_item_uses_catalog_names() {
    let h = harness();
    let created = h
        .engine
        .create_receipt(STORE, receipt("1015", vec![item(ItemType::Stock, 1, dec!(5))]))
        .await
        .unwrap();

    let description = h.engine.describe_item(&created.items[0]).await.unwrap();
    assert_eq!(description.label(), "Three Seat Sofa / grey / 220");
}
