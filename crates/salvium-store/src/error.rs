//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("unknown database handle: {0}")]
    DatabaseNotFound(String),

    #[error("wallet action {0} not found")]
    ActionNotFound(i64),

    #[error("invalid wallet type: {0}")]
    InvalidWalletType(i64),

    #[error("invalid wallet id: {0}")]
    InvalidWalletId(i64),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection lock poisoned: {0}")]
    Poisoned(String),

    #[error("transaction belongs to a different coordinator")]
    ForeignTransaction,
}

pub type Result<T> = std::result::Result<T, StoreError>;
