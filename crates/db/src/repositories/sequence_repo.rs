//! Repositories for the `sequences` and `sequence_formats` tables.

use sqlx::{PgPool, Postgres, Transaction};
use waybill_core::types::{now_ts, prefixes, PulId};

use crate::error::DbError;
use crate::models::sequence::{SequenceFormatRow, SequenceKey, SequenceRow, UpsertSequenceFormat};

/// Column list for `sequences` queries.
const COLUMNS: &str = "id, sequence_type, organization_id, business_unit_id, year, month, \
    current_sequence, version, created_at, updated_at";

/// Column list for `sequence_formats` queries.
const FORMAT_COLUMNS: &str = "id, sequence_type, organization_id, business_unit_id, prefix, \
    include_year, year_digits, include_month, include_week_number, include_day, \
    sequence_digits, include_location_code, location_code, include_random_digits, \
    random_digits, include_check_digit, include_business_unit_code, business_unit_code, \
    use_separators, separator_char, allow_custom_format, custom_format, version, \
    created_at, updated_at";

/// Allocates counter values.
pub struct SequenceRepo;

impl SequenceRepo {
    /// Reserve `count` consecutive values for `key` and return the first.
    ///
    /// Runs one SERIALIZABLE transaction: lock (or create) the bucket row,
    /// then advance it guarded by the version that was read. A lost race
    /// surfaces as [`DbError::SequenceConflict`]; the caller decides whether
    /// to retry.
    pub async fn allocate(pool: &PgPool, key: &SequenceKey, count: i64) -> Result<i64, DbError> {
        if count < 1 {
            return Err(DbError::InvalidInput(format!(
                "sequence allocation count must be positive, got {count}"
            )));
        }

        let mut tx = pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let row = match Self::lock_bucket(&mut tx, key).await? {
            Some(row) => row,
            None => {
                let now = now_ts();
                sqlx::query(
                    "INSERT INTO sequences \
                        (id, sequence_type, organization_id, business_unit_id, year, month, \
                         current_sequence, version, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, 0, 0, $7, $7) \
                     ON CONFLICT DO NOTHING",
                )
                .bind(PulId::new(prefixes::SEQUENCE))
                .bind(&key.sequence_type)
                .bind(&key.organization_id)
                .bind(&key.business_unit_id)
                .bind(key.year)
                .bind(key.month)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                Self::lock_bucket(&mut tx, key)
                    .await?
                    .ok_or_else(|| DbError::SequenceConflict {
                        key: key.to_string(),
                    })?
            }
        };

        let result = sqlx::query(
            "UPDATE sequences \
             SET current_sequence = current_sequence + $2, version = version + 1, \
                 updated_at = $3 \
             WHERE id = $1 AND version = $4",
        )
        .bind(&row.id)
        .bind(count)
        .bind(now_ts())
        .bind(row.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::SequenceConflict {
                key: key.to_string(),
            });
        }

        tx.commit().await?;
        Ok(row.current_sequence + 1)
    }

    /// Current state of a bucket, if it exists.
    pub async fn find(pool: &PgPool, key: &SequenceKey) -> Result<Option<SequenceRow>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM sequences \
             WHERE sequence_type = $1 AND organization_id = $2 \
               AND business_unit_id IS NOT DISTINCT FROM $3 AND year = $4 AND month = $5"
        );
        let row = sqlx::query_as::<_, SequenceRow>(&query)
            .bind(&key.sequence_type)
            .bind(&key.organization_id)
            .bind(&key.business_unit_id)
            .bind(key.year)
            .bind(key.month)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    async fn lock_bucket(
        tx: &mut Transaction<'_, Postgres>,
        key: &SequenceKey,
    ) -> Result<Option<SequenceRow>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM sequences \
             WHERE sequence_type = $1 AND organization_id = $2 \
               AND business_unit_id IS NOT DISTINCT FROM $3 AND year = $4 AND month = $5 \
             FOR UPDATE"
        );
        let row = sqlx::query_as::<_, SequenceRow>(&query)
            .bind(&key.sequence_type)
            .bind(&key.organization_id)
            .bind(&key.business_unit_id)
            .bind(key.year)
            .bind(key.month)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row)
    }
}

/// Per-tenant identifier formats.
pub struct SequenceFormatRepo;

impl SequenceFormatRepo {
    /// The most specific format for a scope: the business unit's own row,
    /// else the organization-wide row.
    pub async fn find_for_scope(
        pool: &PgPool,
        sequence_type: &str,
        organization_id: &PulId,
        business_unit_id: Option<&PulId>,
    ) -> Result<Option<SequenceFormatRow>, DbError> {
        let query = format!(
            "SELECT {FORMAT_COLUMNS} FROM sequence_formats \
             WHERE sequence_type = $1 AND organization_id = $2 \
               AND (business_unit_id = $3 OR business_unit_id IS NULL) \
             ORDER BY business_unit_id NULLS LAST \
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, SequenceFormatRow>(&query)
            .bind(sequence_type)
            .bind(organization_id)
            .bind(business_unit_id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// Insert or replace the format for a scope.
    pub async fn upsert(
        pool: &PgPool,
        input: &UpsertSequenceFormat,
    ) -> Result<SequenceFormatRow, DbError> {
        let query = format!(
            "INSERT INTO sequence_formats \
                (id, sequence_type, organization_id, business_unit_id, prefix, include_year, \
                 year_digits, include_month, include_week_number, include_day, sequence_digits, \
                 include_location_code, location_code, include_random_digits, random_digits, \
                 include_check_digit, include_business_unit_code, business_unit_code, \
                 use_separators, separator_char, allow_custom_format, custom_format, \
                 created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19, $20, $21, $22, $23, $23) \
             ON CONFLICT (sequence_type, organization_id, (COALESCE(business_unit_id, ''))) \
             DO UPDATE SET \
                prefix = EXCLUDED.prefix, include_year = EXCLUDED.include_year, \
                year_digits = EXCLUDED.year_digits, include_month = EXCLUDED.include_month, \
                include_week_number = EXCLUDED.include_week_number, \
                include_day = EXCLUDED.include_day, sequence_digits = EXCLUDED.sequence_digits, \
                include_location_code = EXCLUDED.include_location_code, \
                location_code = EXCLUDED.location_code, \
                include_random_digits = EXCLUDED.include_random_digits, \
                random_digits = EXCLUDED.random_digits, \
                include_check_digit = EXCLUDED.include_check_digit, \
                include_business_unit_code = EXCLUDED.include_business_unit_code, \
                business_unit_code = EXCLUDED.business_unit_code, \
                use_separators = EXCLUDED.use_separators, \
                separator_char = EXCLUDED.separator_char, \
                allow_custom_format = EXCLUDED.allow_custom_format, \
                custom_format = EXCLUDED.custom_format, \
                version = sequence_formats.version + 1, updated_at = EXCLUDED.updated_at \
             RETURNING {FORMAT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SequenceFormatRow>(&query)
            .bind(PulId::new(prefixes::SEQUENCE_FORMAT))
            .bind(&input.sequence_type)
            .bind(&input.organization_id)
            .bind(&input.business_unit_id)
            .bind(&input.prefix)
            .bind(input.include_year)
            .bind(input.year_digits)
            .bind(input.include_month)
            .bind(input.include_week_number)
            .bind(input.include_day)
            .bind(input.sequence_digits)
            .bind(input.include_location_code)
            .bind(&input.location_code)
            .bind(input.include_random_digits)
            .bind(input.random_digits)
            .bind(input.include_check_digit)
            .bind(input.include_business_unit_code)
            .bind(&input.business_unit_code)
            .bind(input.use_separators)
            .bind(&input.separator_char)
            .bind(input.allow_custom_format)
            .bind(&input.custom_format)
            .bind(now_ts())
            .fetch_one(pool)
            .await?;
        Ok(row)
    }
}
