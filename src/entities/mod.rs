pub mod purchase_receipts;
pub mod stock_records;
