use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_stock_records_table::Migration),
            Box::new(m20240101_000002_create_purchase_receipts_table::Migration),
        ]
    }
}

mod m20240101_000001_create_stock_records_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_stock_records_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockRecords::Key)
                                .string()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StockRecords::ProductId).string().not_null())
                        .col(ColumnDef::new(StockRecords::ColorId).string().not_null())
                        .col(ColumnDef::new(StockRecords::DimensionId).string().null())
                        .col(ColumnDef::new(StockRecords::ProductName).string().not_null())
                        .col(
                            ColumnDef::new(StockRecords::FreeStock)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockRecords::ReservedStock)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockRecords::IncomingStock)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockRecords::IncomingReservedStock)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockRecords::Version)
                                .big_integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_records_product_id")
                        .table(StockRecords::Table)
                        .col(StockRecords::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockRecords::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockRecords {
        Table,
        Key,
        ProductId,
        ColorId,
        DimensionId,
        ProductName,
        FreeStock,
        ReservedStock,
        IncomingStock,
        IncomingReservedStock,
        Version,
    }
}

mod m20240101_000002_create_purchase_receipts_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_purchase_receipts_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseReceipts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(PurchaseReceipts::StoreId).string().not_null())
                        .col(ColumnDef::new(PurchaseReceipts::ReceiptId).string().not_null())
                        .col(ColumnDef::new(PurchaseReceipts::ReceiptNo).string().not_null())
                        .col(
                            ColumnDef::new(PurchaseReceipts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseReceipts::Version)
                                .big_integer()
                                .not_null()
                                .default(1),
                        )
                        .col(ColumnDef::new(PurchaseReceipts::Body).text().not_null())
                        .primary_key(
                            Index::create()
                                .col(PurchaseReceipts::StoreId)
                                .col(PurchaseReceipts::ReceiptId),
                        )
                        .to_owned(),
                )
                .await?;

            // Receipt numbers are unique per store; inserts rely on this index.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_receipts_store_receipt_no")
                        .table(PurchaseReceipts::Table)
                        .col(PurchaseReceipts::StoreId)
                        .col(PurchaseReceipts::ReceiptNo)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_receipts_created_at")
                        .table(PurchaseReceipts::Table)
                        .col(PurchaseReceipts::StoreId)
                        .col(PurchaseReceipts::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PurchaseReceipts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PurchaseReceipts {
        Table,
        StoreId,
        ReceiptId,
        ReceiptNo,
        CreatedAt,
        Version,
        Body,
    }
}
