//! Sequence counter and format models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use waybill_core::types::{PulId, Timestamp};

/// A row from the `sequences` table.
#[derive(Debug, Clone, FromRow)]
pub struct SequenceRow {
    pub id: PulId,
    pub sequence_type: String,
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub year: i16,
    pub month: i16,
    pub current_sequence: i64,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Counter bucket key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceKey {
    pub sequence_type: String,
    pub organization_id: PulId,
    /// `None` means the organization-wide bucket.
    pub business_unit_id: Option<PulId>,
    pub year: i16,
    pub month: i16,
}

impl std::fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{:04}-{:02}",
            self.sequence_type,
            self.organization_id,
            self.business_unit_id
                .as_ref()
                .map(PulId::as_str)
                .unwrap_or("-"),
            self.year,
            self.month
        )
    }
}

/// A row from the `sequence_formats` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceFormatRow {
    pub id: PulId,
    pub sequence_type: String,
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub prefix: String,
    pub include_year: bool,
    pub year_digits: i16,
    pub include_month: bool,
    pub include_week_number: bool,
    pub include_day: bool,
    pub sequence_digits: i16,
    pub include_location_code: bool,
    pub location_code: String,
    pub include_random_digits: bool,
    pub random_digits: i16,
    pub include_check_digit: bool,
    pub include_business_unit_code: bool,
    pub business_unit_code: String,
    pub use_separators: bool,
    pub separator_char: String,
    pub allow_custom_format: bool,
    pub custom_format: String,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for inserting or replacing a tenant's format.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSequenceFormat {
    pub sequence_type: String,
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub prefix: String,
    pub include_year: bool,
    pub year_digits: i16,
    pub include_month: bool,
    pub include_week_number: bool,
    pub include_day: bool,
    pub sequence_digits: i16,
    pub include_location_code: bool,
    pub location_code: String,
    pub include_random_digits: bool,
    pub random_digits: i16,
    pub include_check_digit: bool,
    pub include_business_unit_code: bool,
    pub business_unit_code: String,
    pub use_separators: bool,
    pub separator_char: String,
    pub allow_custom_format: bool,
    pub custom_format: String,
}
