//! SQL-backed ledger store (Postgres or SQLite through sea-orm).
//!
//! Every row carries a `version`. Updates and deletes are conditional on the
//! version read by the coordinator, and a commit runs inside one database
//! transaction, so a single stale row rolls back the whole write set.

use async_trait::async_trait;
use sea_orm::{
    sea_query::Expr, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, SqlErr, TransactionTrait,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::{
    CommitOutcome, LedgerStore, ReceiptWrite, StockWrite, Versioned, WriteSet, ABSENT_VERSION,
};
use crate::{
    entities::{
        purchase_receipts::{self, Entity as ReceiptEntity},
        stock_records::{self, Entity as StockEntity},
    },
    errors::ServiceError,
    models::{PurchaseReceipt, StockRecord, VariantKey},
};

#[derive(Clone)]
pub struct SeaOrmLedgerStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmLedgerStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn apply_receipt_write(
        txn: &DatabaseTransaction,
        write: ReceiptWrite,
    ) -> Result<CommitOutcome, ServiceError> {
        match write {
            ReceiptWrite::Insert(receipt) => {
                let taken = ReceiptEntity::find()
                    .filter(purchase_receipts::Column::StoreId.eq(receipt.store_id.as_str()))
                    .filter(purchase_receipts::Column::ReceiptNo.eq(receipt.receipt_no.as_str()))
                    .one(txn)
                    .await?
                    .is_some();
                if taken {
                    return Err(duplicate(&receipt));
                }

                let row = purchase_receipts::ActiveModel {
                    store_id: Set(receipt.store_id.clone()),
                    receipt_id: Set(receipt.receipt_id.to_string()),
                    receipt_no: Set(receipt.receipt_no.clone()),
                    created_at: Set(receipt.created_at),
                    version: Set(1),
                    body: Set(serde_json::to_string(&receipt)?),
                };
                match ReceiptEntity::insert(row).exec_without_returning(txn).await {
                    Ok(_) => Ok(CommitOutcome::Committed),
                    // A concurrent insert won the (store_id, receipt_no) index.
                    Err(e) if is_unique_violation(&e) => Err(duplicate(&receipt)),
                    Err(e) => Err(ServiceError::db_error(e)),
                }
            }
            ReceiptWrite::Update {
                expected_version,
                receipt,
            } => {
                let result = ReceiptEntity::update_many()
                    .col_expr(
                        purchase_receipts::Column::Body,
                        Expr::value(serde_json::to_string(&receipt)?),
                    )
                    .col_expr(
                        purchase_receipts::Column::ReceiptNo,
                        Expr::value(receipt.receipt_no.clone()),
                    )
                    .col_expr(
                        purchase_receipts::Column::Version,
                        Expr::value(expected_version + 1),
                    )
                    .filter(purchase_receipts::Column::StoreId.eq(receipt.store_id.as_str()))
                    .filter(purchase_receipts::Column::ReceiptId.eq(receipt.receipt_id.to_string()))
                    .filter(purchase_receipts::Column::Version.eq(expected_version))
                    .exec(txn)
                    .await?;
                Ok(outcome_of(result.rows_affected))
            }
            ReceiptWrite::Delete {
                store_id,
                receipt_id,
                expected_version,
            } => {
                let result = ReceiptEntity::delete_many()
                    .filter(purchase_receipts::Column::StoreId.eq(store_id))
                    .filter(purchase_receipts::Column::ReceiptId.eq(receipt_id.to_string()))
                    .filter(purchase_receipts::Column::Version.eq(expected_version))
                    .exec(txn)
                    .await?;
                Ok(outcome_of(result.rows_affected))
            }
        }
    }

    async fn apply_stock_write(
        txn: &DatabaseTransaction,
        write: StockWrite,
    ) -> Result<CommitOutcome, ServiceError> {
        let record = write.record;
        let key = record.key().storage_key();

        if write.expected_version == ABSENT_VERSION {
            let row = stock_records::ActiveModel {
                key: Set(key),
                product_id: Set(record.product_id),
                color_id: Set(record.color_id),
                dimension_id: Set(record.dimension_id),
                product_name: Set(record.product_name),
                free_stock: Set(record.free_stock),
                reserved_stock: Set(record.reserved_stock),
                incoming_stock: Set(record.incoming_stock),
                incoming_reserved_stock: Set(record.incoming_reserved_stock),
                version: Set(1),
            };
            return match StockEntity::insert(row).exec_without_returning(txn).await {
                Ok(_) => Ok(CommitOutcome::Committed),
                // Someone else seeded the key after our read.
                Err(e) if is_unique_violation(&e) => Ok(CommitOutcome::Conflict),
                Err(e) => Err(ServiceError::db_error(e)),
            };
        }

        let result = StockEntity::update_many()
            .col_expr(stock_records::Column::FreeStock, Expr::value(record.free_stock))
            .col_expr(
                stock_records::Column::ReservedStock,
                Expr::value(record.reserved_stock),
            )
            .col_expr(
                stock_records::Column::IncomingStock,
                Expr::value(record.incoming_stock),
            )
            .col_expr(
                stock_records::Column::IncomingReservedStock,
                Expr::value(record.incoming_reserved_stock),
            )
            .col_expr(
                stock_records::Column::Version,
                Expr::value(write.expected_version + 1),
            )
            .filter(stock_records::Column::Key.eq(key))
            .filter(stock_records::Column::Version.eq(write.expected_version))
            .exec(txn)
            .await?;
        Ok(outcome_of(result.rows_affected))
    }

    async fn apply_writes(
        txn: &DatabaseTransaction,
        writes: WriteSet,
    ) -> Result<CommitOutcome, ServiceError> {
        for write in writes.stock {
            if Self::apply_stock_write(txn, write).await? == CommitOutcome::Conflict {
                return Ok(CommitOutcome::Conflict);
            }
        }
        if let Some(write) = writes.receipt {
            return Self::apply_receipt_write(txn, write).await;
        }
        Ok(CommitOutcome::Committed)
    }
}

#[async_trait]
impl LedgerStore for SeaOrmLedgerStore {
    #[instrument(skip(self))]
    async fn read_receipt(
        &self,
        store_id: &str,
        receipt_id: Uuid,
    ) -> Result<Option<Versioned<PurchaseReceipt>>, ServiceError> {
        let row = ReceiptEntity::find_by_id((store_id.to_string(), receipt_id.to_string()))
            .one(&*self.db)
            .await?;

        row.map(|model| Ok(Versioned::new(model.to_receipt()?, model.version)))
            .transpose()
    }

    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    async fn read_stock(
        &self,
        keys: &BTreeSet<VariantKey>,
    ) -> Result<BTreeMap<VariantKey, Versioned<StockRecord>>, ServiceError> {
        let storage_keys: Vec<String> = keys.iter().map(VariantKey::storage_key).collect();
        let rows = StockEntity::find()
            .filter(stock_records::Column::Key.is_in(storage_keys))
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|model| {
                let version = model.version;
                let record = StockRecord::from(model);
                (record.key(), Versioned::new(record, version))
            })
            .filter(|(key, _)| keys.contains(key))
            .collect())
    }

    #[instrument(skip(self, writes), fields(stock_writes = writes.stock.len()))]
    async fn commit(&self, writes: WriteSet) -> Result<CommitOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        match Self::apply_writes(&txn, writes).await {
            Ok(CommitOutcome::Committed) => {
                txn.commit().await?;
                Ok(CommitOutcome::Committed)
            }
            Ok(CommitOutcome::Conflict) => {
                debug!("Stale version detected; rolling back");
                txn.rollback().await?;
                Ok(CommitOutcome::Conflict)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!("Rollback after failed commit also failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn find_receipt_by_number(
        &self,
        store_id: &str,
        receipt_no: &str,
    ) -> Result<Option<PurchaseReceipt>, ServiceError> {
        ReceiptEntity::find()
            .filter(purchase_receipts::Column::StoreId.eq(store_id))
            .filter(purchase_receipts::Column::ReceiptNo.eq(receipt_no))
            .one(&*self.db)
            .await?
            .map(|model| model.to_receipt())
            .transpose()
    }

    async fn list_receipts(
        &self,
        store_id: &str,
        limit: u64,
    ) -> Result<Vec<PurchaseReceipt>, ServiceError> {
        ReceiptEntity::find()
            .filter(purchase_receipts::Column::StoreId.eq(store_id))
            .order_by_desc(purchase_receipts::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?
            .iter()
            .map(purchase_receipts::Model::to_receipt)
            .collect()
    }
}

fn outcome_of(rows_affected: u64) -> CommitOutcome {
    if rows_affected == 0 {
        CommitOutcome::Conflict
    } else {
        CommitOutcome::Committed
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn duplicate(receipt: &PurchaseReceipt) -> ServiceError {
    ServiceError::DuplicateReceiptNumber {
        store_id: receipt.store_id.clone(),
        receipt_no: receipt.receipt_no.clone(),
    }
}
