//! Where formats come from.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use waybill_core::types::PulId;
use waybill_db::repositories::SequenceFormatRepo;

use crate::error::SequenceError;
use crate::format::SequenceFormat;

/// Kinds of identifier the platform mints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceType {
    ProNumber,
    Consolidation,
    Invoice,
    WorkOrder,
}

impl SequenceType {
    pub const ALL: [SequenceType; 4] = [
        Self::ProNumber,
        Self::Consolidation,
        Self::Invoice,
        Self::WorkOrder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProNumber => "pro_number",
            Self::Consolidation => "consolidation",
            Self::Invoice => "invoice",
            Self::WorkOrder => "work_order",
        }
    }

    /// Built-in format used when a tenant has not configured one.
    pub fn default_format(self) -> SequenceFormat {
        match self {
            // S + YYMM + 4-digit sequence + 6 random digits, e.g. S24120001123456.
            Self::ProNumber => SequenceFormat {
                prefix: "S".into(),
                include_year: true,
                year_digits: 2,
                include_month: true,
                sequence_digits: 4,
                include_random_digits: true,
                random_digits: 6,
                ..Default::default()
            },
            Self::Consolidation => SequenceFormat {
                prefix: "C".into(),
                include_year: true,
                year_digits: 2,
                include_month: true,
                sequence_digits: 5,
                include_random_digits: true,
                random_digits: 4,
                ..Default::default()
            },
            Self::Invoice => SequenceFormat {
                prefix: "INV".into(),
                include_year: true,
                year_digits: 4,
                include_month: true,
                sequence_digits: 6,
                include_check_digit: true,
                use_separators: true,
                separator_char: "-".into(),
                ..Default::default()
            },
            Self::WorkOrder => SequenceFormat {
                prefix: "WO".into(),
                include_year: true,
                year_digits: 2,
                include_month: true,
                sequence_digits: 5,
                ..Default::default()
            },
        }
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SequenceType {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SequenceError::UnknownType(s.to_string()))
    }
}

/// Resolves the format a tenant uses for a sequence type.
#[async_trait]
pub trait FormatProvider: Send + Sync {
    async fn get_format(
        &self,
        sequence_type: SequenceType,
        organization_id: &PulId,
        business_unit_id: Option<&PulId>,
    ) -> Result<SequenceFormat, SequenceError>;
}

/// Always answers with the built-in defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFormatProvider;

#[async_trait]
impl FormatProvider for DefaultFormatProvider {
    async fn get_format(
        &self,
        sequence_type: SequenceType,
        _organization_id: &PulId,
        _business_unit_id: Option<&PulId>,
    ) -> Result<SequenceFormat, SequenceError> {
        Ok(sequence_type.default_format())
    }
}

/// Reads `sequence_formats`, falling back to the built-in default.
#[derive(Clone)]
pub struct PgFormatProvider {
    pool: PgPool,
}

impl PgFormatProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FormatProvider for PgFormatProvider {
    async fn get_format(
        &self,
        sequence_type: SequenceType,
        organization_id: &PulId,
        business_unit_id: Option<&PulId>,
    ) -> Result<SequenceFormat, SequenceError> {
        let row = SequenceFormatRepo::find_for_scope(
            &self.pool,
            sequence_type.as_str(),
            organization_id,
            business_unit_id,
        )
        .await?;

        Ok(match row {
            Some(row) => SequenceFormat::from(&row),
            None => {
                tracing::debug!(
                    sequence_type = %sequence_type,
                    organization_id = %organization_id,
                    "No configured sequence format, using default",
                );
                sequence_type.default_format()
            }
        })
    }
}
