//! Integration tests for the Postgres sequence store and format provider.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use waybill_core::types::{prefixes, PulId};
use waybill_db::models::sequence::{SequenceKey, UpsertSequenceFormat};
use waybill_db::repositories::SequenceFormatRepo;
use waybill_sequence::{
    FormatProvider, PgFormatProvider, PgSequenceStore, RetryPolicy, SequenceGenerator,
    SequenceStore, SequenceType,
};

fn key(org: &PulId) -> SequenceKey {
    SequenceKey {
        sequence_type: SequenceType::ProNumber.as_str().into(),
        organization_id: org.clone(),
        business_unit_id: None,
        year: 2024,
        month: 12,
    }
}

fn patient_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 10,
        base_delay: Duration::from_millis(1),
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn concurrent_allocations_are_distinct_and_gapless(pool: PgPool) {
    let store = Arc::new(PgSequenceStore::with_retry(pool, patient_retry()));
    let org = PulId::new(prefixes::ORGANIZATION);

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let store = store.clone();
            let k = key(&org);
            tokio::spawn(async move { store.next_sequence(&k).await })
        })
        .collect();

    let mut values = BTreeSet::new();
    for task in tasks {
        values.insert(task.await.unwrap().unwrap());
    }
    assert_eq!(values.into_iter().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn batch_allocation_returns_a_contiguous_range(pool: PgPool) {
    let store = PgSequenceStore::new(pool);
    let org = PulId::new(prefixes::ORGANIZATION);

    assert_eq!(store.next_sequence(&key(&org)).await.unwrap(), 1);
    assert_eq!(
        store.next_sequence_batch(&key(&org), 4).await.unwrap(),
        vec![2, 3, 4, 5]
    );
    assert_eq!(store.next_sequence(&key(&org)).await.unwrap(), 6);
}

// ---------------------------------------------------------------------------
// Provider + generator
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn provider_prefers_configured_format(pool: PgPool) {
    let provider = PgFormatProvider::new(pool.clone());
    let org = PulId::new(prefixes::ORGANIZATION);

    let fallback = provider
        .get_format(SequenceType::ProNumber, &org, None)
        .await
        .unwrap();
    assert_eq!(fallback, SequenceType::ProNumber.default_format());

    SequenceFormatRepo::upsert(
        &pool,
        &UpsertSequenceFormat {
            sequence_type: SequenceType::ProNumber.as_str().into(),
            organization_id: org.clone(),
            business_unit_id: None,
            prefix: "ACME".into(),
            include_year: true,
            year_digits: 4,
            include_month: false,
            include_week_number: false,
            include_day: false,
            sequence_digits: 6,
            include_location_code: false,
            location_code: String::new(),
            include_random_digits: false,
            random_digits: 0,
            include_check_digit: false,
            include_business_unit_code: false,
            business_unit_code: String::new(),
            use_separators: true,
            separator_char: "-".into(),
            allow_custom_format: false,
            custom_format: String::new(),
        },
    )
    .await
    .unwrap();

    let generator = SequenceGenerator::new(
        Arc::new(PgSequenceStore::new(pool.clone())),
        Arc::new(PgFormatProvider::new(pool)),
    );
    let value = generator
        .generate_shipment_pro_number(&org, None)
        .await
        .unwrap();
    assert!(value.starts_with("ACME-"), "got {value}");
    assert!(value.ends_with("-000001"), "got {value}");
}
