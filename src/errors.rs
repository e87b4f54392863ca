use sea_orm::error::DbErr;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Receipt number {receipt_no} already exists in store {store_id}")]
    DuplicateReceiptNumber { store_id: String, receipt_no: String },

    #[error("Receipt {receipt_id} not found in store {store_id}")]
    ReceiptNotFound { store_id: String, receipt_id: Uuid },

    #[error("Stock record not found: {0}")]
    StockRecordNotFound(String),

    #[error("Receipt {receipt_id} has no item at index {index}")]
    ItemNotFound { receipt_id: Uuid, index: usize },

    #[error("Transient conflict: {operation} gave up after {attempts} attempts")]
    TransientConflict {
        operation: &'static str,
        attempts: u32,
    },

    #[error("Receipt {receipt_id} cannot be deleted: {in_flight} item(s) still in the pipeline")]
    UnsafeDelete { receipt_id: Uuid, in_flight: usize },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Stock counter overflow on {0}")]
    StockOverflow(String),

    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Demand service error: {0}")]
    DemandServiceError(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    pub fn receipt_not_found(store_id: &str, receipt_id: Uuid) -> Self {
        ServiceError::ReceiptNotFound {
            store_id: store_id.to_string(),
            receipt_id,
        }
    }

    /// Whether the caller may resubmit the same request unchanged.
    ///
    /// Only optimistic-concurrency exhaustion and connection-level database
    /// failures qualify; business-rule violations never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientConflict { .. } => true,
            Self::DatabaseError(err) => matches!(
                err,
                DbErr::ConnectionAcquire(_) | DbErr::Conn(_)
            ),
            _ => false,
        }
    }

    /// Stable machine-readable code, used for metric labels and by callers
    /// that need to branch on the error kind without matching the enum.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateReceiptNumber { .. } => "duplicate_receipt_number",
            Self::ReceiptNotFound { .. } => "receipt_not_found",
            Self::StockRecordNotFound(_) => "stock_record_not_found",
            Self::ItemNotFound { .. } => "item_not_found",
            Self::TransientConflict { .. } => "transient_conflict",
            Self::UnsafeDelete { .. } => "unsafe_delete",
            Self::InvalidStatus(_) => "invalid_status",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::StockOverflow(_) => "stock_overflow",
            Self::DatabaseError(_) => "database_error",
            Self::SerializationError(_) => "serialization_error",
            Self::DemandServiceError(_) => "demand_service_error",
            Self::EventError(_) => "event_error",
            Self::Other(_) => "internal_error",
        }
    }
}
