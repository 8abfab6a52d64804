use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("disbursement voucher not found: {0}")]
    DvNotFound(String),

    #[error("dv_number already in use: {0}")]
    DuplicateDvNumber(String),

    #[error("version conflict on {dv_id}: expected version {expected}")]
    VersionConflict { dv_id: String, expected: u64 },

    #[error("history write failed: {0}")]
    HistoryWrite(String),

    #[error("core error: {0}")]
    Core(#[from] dvtrack_core::CoreError),
}
