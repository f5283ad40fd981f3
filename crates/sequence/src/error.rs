use waybill_core::error::CoreError;
use waybill_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("invalid sequence format: {0}")]
    InvalidFormat(String),

    #[error("invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("sequence value {value} does not fit in {digits} digit(s)")]
    Overflow { value: i64, digits: u8 },

    #[error("sequence {key} still conflicting after {attempts} attempt(s)")]
    Exhausted { key: String, attempts: u32 },

    #[error("unknown sequence type: {0}")]
    UnknownType(String),

    #[error(transparent)]
    Store(#[from] DbError),
}

impl From<SequenceError> for CoreError {
    fn from(err: SequenceError) -> Self {
        match err {
            SequenceError::InvalidFormat(_)
            | SequenceError::InvalidSequence(_)
            | SequenceError::UnknownType(_) => CoreError::Validation(err.to_string()),
            SequenceError::Exhausted { .. } => CoreError::Conflict(err.to_string()),
            SequenceError::Overflow { .. } => CoreError::Internal(err.to_string()),
            SequenceError::Store(db) => db.into(),
        }
    }
}
