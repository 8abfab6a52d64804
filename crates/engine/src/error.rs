use dvtrack_core::{CoreError, DvStatus};
use dvtrack_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{action} is not allowed on {dv_number} while {status}: {reason}")]
    InvalidTransition {
        dv_number: String,
        status: DvStatus,
        action: &'static str,
        reason: String,
    },

    #[error("invalid {field}: {rule}")]
    Validation { field: &'static str, rule: String },

    #[error("disbursement voucher changed concurrently: {0}")]
    ConcurrentModification(String),

    #[error("disbursement voucher not found: {0}")]
    NotFound(String),

    #[error("failed to record history: {0}")]
    HistoryWriteFailure(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl EngineError {
    pub(crate) fn validation(field: &'static str, rule: impl Into<String>) -> Self {
        Self::Validation {
            field,
            rule: rule.into(),
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::DvNotFound(dv) => Self::NotFound(dv),
            StorageError::VersionConflict { dv_id, .. } => Self::ConcurrentModification(dv_id),
            StorageError::HistoryWrite(detail) => Self::HistoryWriteFailure(detail),
            StorageError::DuplicateDvNumber(number) => Self::Validation {
                field: "dv_number",
                rule: format!("{number} is already in use"),
            },
            StorageError::Core(core) => Self::Core(core),
            other => Self::Storage(other),
        }
    }
}
