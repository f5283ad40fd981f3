//! Formatted identifier generation with a per-tenant format cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Utc};
use tokio::sync::RwLock;
use waybill_core::types::PulId;
use waybill_db::models::sequence::SequenceKey;

use crate::error::SequenceError;
use crate::format::{ParsedSequence, SequenceFormat};
use crate::provider::{FormatProvider, SequenceType};
use crate::store::SequenceStore;

/// How long a resolved format is reused before asking the provider again.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Input to [`SequenceGenerator::generate`].
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub sequence_type: SequenceType,
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    /// Used instead of the tenant's configured format.
    pub format: Option<SequenceFormat>,
    /// Bucket and date components; defaults to now.
    pub at: Option<DateTime<Utc>>,
}

impl GenerateRequest {
    pub fn new(
        sequence_type: SequenceType,
        organization_id: PulId,
        business_unit_id: Option<PulId>,
    ) -> Self {
        Self {
            sequence_type,
            organization_id,
            business_unit_id,
            format: None,
            at: None,
        }
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }

    pub fn with_format(mut self, format: SequenceFormat) -> Self {
        self.format = Some(format);
        self
    }
}

type CacheKey = (SequenceType, PulId, Option<PulId>);

struct CachedFormat {
    format: SequenceFormat,
    cached_at: Instant,
}

/// Mints identifiers: resolve format, allocate counter, render, validate.
pub struct SequenceGenerator {
    store: Arc<dyn SequenceStore>,
    provider: Arc<dyn FormatProvider>,
    cache: RwLock<HashMap<CacheKey, CachedFormat>>,
    cache_ttl: Duration,
}

impl SequenceGenerator {
    pub fn new(store: Arc<dyn SequenceStore>, provider: Arc<dyn FormatProvider>) -> Self {
        Self {
            store,
            provider,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// One identifier.
    pub async fn generate(&self, req: &GenerateRequest) -> Result<String, SequenceError> {
        let mut values = self.generate_batch(req, 1).await?;
        values
            .pop()
            .ok_or_else(|| SequenceError::InvalidSequence("no value allocated".into()))
    }

    /// `count` identifiers from one counter allocation.
    pub async fn generate_batch(
        &self,
        req: &GenerateRequest,
        count: usize,
    ) -> Result<Vec<String>, SequenceError> {
        let format = match &req.format {
            Some(format) => format.clone(),
            None => {
                self.resolve_format(
                    req.sequence_type,
                    &req.organization_id,
                    req.business_unit_id.as_ref(),
                )
                .await?
            }
        };
        format.validate()?;

        let at = req.at.unwrap_or_else(Utc::now);
        let key = SequenceKey {
            sequence_type: req.sequence_type.as_str().to_string(),
            organization_id: req.organization_id.clone(),
            business_unit_id: req.business_unit_id.clone(),
            year: bucket_component(at.year()),
            month: bucket_component(at.month() as i32),
        };

        let numbers = if count == 1 {
            vec![self.store.next_sequence(&key).await?]
        } else {
            self.store.next_sequence_batch(&key, count).await?
        };

        let values = {
            let mut rng = rand::rng();
            numbers
                .into_iter()
                .map(|n| {
                    let value = format.render(n, at, &mut rng)?;
                    format.validate_sequence(&value)?;
                    Ok(value)
                })
                .collect::<Result<Vec<_>, SequenceError>>()?
        };

        tracing::debug!(
            sequence_type = %req.sequence_type,
            organization_id = %req.organization_id,
            count = values.len(),
            "Generated sequences",
        );
        Ok(values)
    }

    /// A shipment pro number for the tenant.
    pub async fn generate_shipment_pro_number(
        &self,
        organization_id: &PulId,
        business_unit_id: Option<&PulId>,
    ) -> Result<String, SequenceError> {
        let req = GenerateRequest::new(
            SequenceType::ProNumber,
            organization_id.clone(),
            business_unit_id.cloned(),
        );
        self.generate(&req).await
    }

    /// Check `value` against the tenant's format.
    pub async fn validate(
        &self,
        sequence_type: SequenceType,
        organization_id: &PulId,
        business_unit_id: Option<&PulId>,
        value: &str,
    ) -> Result<(), SequenceError> {
        self.resolve_format(sequence_type, organization_id, business_unit_id)
            .await?
            .validate_sequence(value)
    }

    /// Split `value` into components using the tenant's format.
    pub async fn parse(
        &self,
        sequence_type: SequenceType,
        organization_id: &PulId,
        business_unit_id: Option<&PulId>,
        value: &str,
    ) -> Result<ParsedSequence, SequenceError> {
        self.resolve_format(sequence_type, organization_id, business_unit_id)
            .await?
            .parse(value)
    }

    /// Drop every cached format so the next call asks the provider.
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    async fn resolve_format(
        &self,
        sequence_type: SequenceType,
        organization_id: &PulId,
        business_unit_id: Option<&PulId>,
    ) -> Result<SequenceFormat, SequenceError> {
        let key: CacheKey = (
            sequence_type,
            organization_id.clone(),
            business_unit_id.cloned(),
        );

        if let Some(entry) = self.cache.read().await.get(&key) {
            if entry.cached_at.elapsed() < self.cache_ttl {
                return Ok(entry.format.clone());
            }
        }

        let format = self
            .provider
            .get_format(sequence_type, organization_id, business_unit_id)
            .await?;
        self.cache.write().await.insert(
            key,
            CachedFormat {
                format: format.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(format)
    }
}

fn bucket_component(v: i32) -> i16 {
    // Years and months always fit.
    i16::try_from(v).unwrap_or(i16::MAX)
}
