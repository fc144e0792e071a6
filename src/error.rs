use crate::domain::transaction::TransactionStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Durable store unavailable: {0}")]
    TransientStore(String),
    #[error("Gateway error: {0}")]
    Gateway(String),
    #[error("Callback for already settled transaction {0}")]
    DuplicateCallback(String),
    #[error("Reconciliation conflict for {key}: {reason}")]
    SyncConflict { key: String, reason: String },
    #[error("Invalid status transition for {checkout_id}: {from} -> {to}")]
    InvalidTransition {
        checkout_id: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },
    #[error("Record already exists: {0}")]
    AlreadyExists(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Insufficient words: requested {requested}, available {available}")]
    InsufficientWords { requested: u64, available: u64 },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PaymentError {
    /// Errors that mean the durable store could not be reached, as opposed to
    /// errors about the data itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, PaymentError::TransientStore(_))
    }
}
