use waybill_core::error::CoreError;

/// Repository-level error.
///
/// Not-found and optimistic-version conflicts are typed so services can map
/// them without inspecting driver errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} was modified concurrently (expected version {expected})")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: i64,
    },

    #[error("sequence {key} was updated concurrently")]
    SequenceConflict { key: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl DbError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// True for errors a caller may retry: version conflicts and Postgres
    /// serialization failures / deadlocks.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::VersionConflict { .. } | Self::SequenceConflict { .. } => true,
            Self::Sqlx(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }

    /// True for a unique-constraint violation on a `uq_` constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Sqlx(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some("23505")
                    && db.constraint().is_some_and(|c| c.starts_with("uq_"))
            }
            _ => false,
        }
    }
}

impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => CoreError::NotFound { entity, id },
            DbError::VersionConflict { .. } | DbError::SequenceConflict { .. } => {
                CoreError::Conflict(err.to_string())
            }
            DbError::InvalidInput(msg) => CoreError::Validation(msg),
            DbError::Sqlx(sqlx::Error::RowNotFound) => {
                CoreError::NotFound {
                    entity: "Record",
                    id: String::new(),
                }
            }
            ref e if e.is_unique_violation() => CoreError::Conflict(e.to_string()),
            DbError::Sqlx(e) => CoreError::Internal(e.to_string()),
        }
    }
}
