// Ledger models
pub mod pending_request;
pub mod purchase_receipt;
pub mod stock_record;

pub use pending_request::PendingRequest;
pub use purchase_receipt::{
    ItemMatchKey, ItemStatus, ItemType, NewPurchaseItem, NewPurchaseReceipt, PurchaseItem,
    PurchaseReceipt, ReceiptHeaderUpdate,
};
pub use stock_record::{StockDelta, StockRecord, StockSeed, VariantKey, NO_DIMENSION};
