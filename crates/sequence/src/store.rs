//! Counter allocation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Mutex;
use waybill_db::models::sequence::SequenceKey;
use waybill_db::repositories::SequenceRepo;
use waybill_db::DbError;

use crate::error::SequenceError;

/// Allocates monotonic counter values per [`SequenceKey`].
///
/// Concurrent callers on the same key never receive the same value.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// The next value for `key`.
    async fn next_sequence(&self, key: &SequenceKey) -> Result<i64, SequenceError>;

    /// `count` consecutive values for `key`, allocated in one step.
    async fn next_sequence_batch(
        &self,
        key: &SequenceKey,
        count: usize,
    ) -> Result<Vec<i64>, SequenceError>;
}

/// Bounded exponential backoff for conflicting allocations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Wait after the given failed attempt (0-based): 50ms, 100ms, 200ms, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Postgres-backed store.
///
/// Each attempt is one serializable transaction guarded by the bucket's
/// version; conflicts and serialization failures are retried per
/// [`RetryPolicy`], anything else is returned immediately.
#[derive(Clone)]
pub struct PgSequenceStore {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PgSequenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_retry(pool, RetryPolicy::default())
    }

    pub fn with_retry(pool: PgPool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    async fn allocate(&self, key: &SequenceKey, count: i64) -> Result<i64, SequenceError> {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 0..attempts {
            match SequenceRepo::allocate(&self.pool, key, count).await {
                Ok(first) => return Ok(first),
                Err(err) if err.is_retryable() => {
                    tracing::debug!(
                        key = %key,
                        attempt = attempt + 1,
                        error = %err,
                        "Sequence allocation conflicted",
                    );
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        tracing::warn!(key = %key, attempts, "Sequence allocation retries exhausted");
        Err(SequenceError::Exhausted {
            key: key.to_string(),
            attempts,
        })
    }
}

fn batch_count(count: usize) -> Result<i64, SequenceError> {
    i64::try_from(count)
        .ok()
        .filter(|c| *c > 0)
        .ok_or_else(|| DbError::InvalidInput(format!("invalid batch size {count}")).into())
}

#[async_trait]
impl SequenceStore for PgSequenceStore {
    async fn next_sequence(&self, key: &SequenceKey) -> Result<i64, SequenceError> {
        self.allocate(key, 1).await
    }

    async fn next_sequence_batch(
        &self,
        key: &SequenceKey,
        count: usize,
    ) -> Result<Vec<i64>, SequenceError> {
        let n = batch_count(count)?;
        let first = self.allocate(key, n).await?;
        Ok((first..first + n).collect())
    }
}

/// Process-local store for tests and single-node tooling.
#[derive(Default)]
pub struct MemorySequenceStore {
    counters: Mutex<HashMap<SequenceKey, i64>>,
}

impl MemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `key` at `value`; the next allocation returns `value + 1`.
    pub async fn seed(&self, key: SequenceKey, value: i64) {
        self.counters.lock().await.insert(key, value);
    }
}

#[async_trait]
impl SequenceStore for MemorySequenceStore {
    async fn next_sequence(&self, key: &SequenceKey) -> Result<i64, SequenceError> {
        let mut counters = self.counters.lock().await;
        let current = counters.entry(key.clone()).or_insert(0);
        *current += 1;
        Ok(*current)
    }

    async fn next_sequence_batch(
        &self,
        key: &SequenceKey,
        count: usize,
    ) -> Result<Vec<i64>, SequenceError> {
        let n = batch_count(count)?;
        let mut counters = self.counters.lock().await;
        let current = counters.entry(key.clone()).or_insert(0);
        let first = *current + 1;
        *current += n;
        Ok((first..first + n).collect())
    }
}
