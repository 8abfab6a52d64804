use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown status: {0}")]
    UnknownStatus(String),

    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("unknown {kind}: {value}")]
    UnknownTag { kind: &'static str, value: String },

    #[error("invalid reference number {value:?}: {rule}")]
    InvalidReference { value: String, rule: String },

    #[error("invariant violated on {dv_number}: {detail}")]
    InvariantViolated { dv_number: String, detail: String },
}
