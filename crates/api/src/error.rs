use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use waybill_core::error::{CoreError, FieldError};
use waybill_db::DbError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce the JSON envelope
/// `{ "error": <message>, "code": <CODE>, "details": [..]? }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let core = match self {
            AppError::Core(core) => core,
            AppError::Database(err) => {
                if let DbError::Sqlx(sqlx_err) = &err {
                    if let Some(conflict) = unique_violation(sqlx_err) {
                        return envelope(StatusCode::CONFLICT, "CONFLICT", conflict, None);
                    }
                }
                CoreError::from(err)
            }
            AppError::BadRequest(msg) => {
                return envelope(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None);
            }
        };

        match core {
            CoreError::NotFound { entity, id } => envelope(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{entity} with id {id} not found"),
                None,
            ),
            CoreError::Validation(msg) => {
                envelope(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg, None)
            }
            CoreError::InvalidFields(fields) => envelope(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "Validation failed".to_string(),
                Some(fields),
            ),
            CoreError::Conflict(msg) => envelope(StatusCode::CONFLICT, "CONFLICT", msg, None),
            CoreError::Unauthorized(msg) => {
                envelope(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None)
            }
            CoreError::Forbidden(msg) => envelope(StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            CoreError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                envelope(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        }
    }
}

fn envelope(
    status: StatusCode,
    code: &str,
    message: String,
    details: Option<Vec<FieldError>>,
) -> Response {
    let mut body = json!({
        "error": message,
        "code": code,
    });
    if let Some(details) = details {
        body["details"] = json!(details);
    }
    (status, axum::Json(body)).into_response()
}

/// A unique violation on a `uq_` constraint, as a conflict message.
fn unique_violation(err: &sqlx::Error) -> Option<String> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    if db_err.code().as_deref() != Some("23505") {
        return None;
    }
    let constraint = db_err.constraint().filter(|c| c.starts_with("uq_"))?;
    Some(format!("Duplicate value violates unique constraint: {constraint}"))
}
