//! Identifier minting and checking against the caller's tenant format.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use waybill_core::error::CoreError;
use waybill_sequence::{GenerateRequest, SequenceError, SequenceType};

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Most identifiers one request may mint.
pub const MAX_BATCH: usize = 100;

type SequenceResponse = Json<DataResponse<serde_json::Value>>;

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    #[serde(default = "one")]
    pub count: usize,
}

fn one() -> usize {
    1
}

#[derive(Debug, Deserialize)]
pub struct ValidateBody {
    pub value: String,
}

fn sequence_type(raw: &str) -> Result<SequenceType, CoreError> {
    raw.parse::<SequenceType>().map_err(CoreError::from)
}

/// POST /api/v1/sequences/{type}/generate
///
/// Mints `count` identifiers from one counter allocation.
pub async fn generate(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(body): Json<GenerateBody>,
) -> AppResult<SequenceResponse> {
    let sequence_type = sequence_type(&kind)?;
    if body.count == 0 || body.count > MAX_BATCH {
        return Err(CoreError::Validation(format!("count must be between 1 and {MAX_BATCH}")).into());
    }

    let req = GenerateRequest::new(
        sequence_type,
        auth.organization_id.clone(),
        Some(auth.business_unit_id.clone()),
    );
    let values = state
        .sequences
        .generate_batch(&req, body.count)
        .await
        .map_err(CoreError::from)?;

    tracing::info!(
        sequence_type = %sequence_type,
        organization_id = %auth.organization_id,
        count = values.len(),
        "Sequences generated",
    );
    Ok(Json(DataResponse {
        data: json!({ "sequenceType": sequence_type, "values": values }),
    }))
}

/// POST /api/v1/sequences/{type}/validate
///
/// A malformed value is a normal answer (`valid: false`), not an error.
pub async fn validate(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(body): Json<ValidateBody>,
) -> AppResult<SequenceResponse> {
    let sequence_type = sequence_type(&kind)?;
    let org = &auth.organization_id;
    let bu = Some(&auth.business_unit_id);

    let checked = match state.sequences.validate(sequence_type, org, bu, &body.value).await {
        Ok(()) => state.sequences.parse(sequence_type, org, bu, &body.value).await,
        Err(e) => Err(e),
    };
    let data = match checked {
        Ok(parsed) => json!({ "valid": true, "value": body.value, "parsed": parsed }),
        Err(SequenceError::InvalidSequence(reason)) => {
            json!({ "valid": false, "value": body.value, "error": reason })
        }
        Err(e) => return Err(CoreError::from(e).into()),
    };
    Ok(Json(DataResponse { data }))
}
