//! Integration tests for the audit listener and the batch processor.

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;
use sqlx::PgPool;
use waybill_core::audit_changes::actions;
use waybill_core::notification::event_types;
use waybill_core::types::{prefixes, PulId};
use waybill_db::models::notification::NotificationQuery;
use waybill_db::repositories::NotificationRepo;
use waybill_notifications::batch::PendingNotification;
use waybill_notifications::{AuditListener, BatchProcessor};

use common::{audit, preference, scope, service, tenant, user, Tenant};

fn setup(
    pool: &PgPool,
) -> (
    Arc<AuditListener>,
    Arc<BatchProcessor>,
    Arc<common::RecordingBroadcaster>,
) {
    let (svc, broadcaster) = service(pool);
    let batcher = Arc::new(BatchProcessor::new(svc.clone()));
    let listener = Arc::new(AuditListener::new(svc, batcher.clone()).since(0));
    (listener, batcher, broadcaster)
}

async fn inbox_total(pool: &PgPool, t: &Tenant, user: &PulId) -> i64 {
    NotificationRepo::list_for_user(
        pool,
        &NotificationQuery {
            scope: scope(t, user),
            limit: 50,
            offset: 0,
            unread_only: false,
        },
    )
    .await
    .unwrap()
    .total
}

// ---------------------------------------------------------------------------
// Audit listener
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn creator_is_notified_of_someone_elses_update(pool: PgPool) {
    let t = tenant();
    let creator = user(&pool, &t, "Ann Lee").await;
    let editor = user(&pool, &t, "Bo Chen").await;
    preference(&pool, &t, &creator, json!({})).await;
    audit(&pool, &t, &creator, actions::CREATE, "shp_1", 100).await;
    audit(&pool, &t, &editor, actions::UPDATE, "shp_1", 200).await;

    let (listener, _, broadcaster) = setup(&pool);
    let now = Utc.with_ymd_and_hms(2024, 12, 2, 18, 0, 0).unwrap();
    let report = listener.poll_once(now).await.unwrap();

    assert_eq!(report.entries, 1);
    assert_eq!(report.sent, 1);
    assert_eq!(listener.last_check(), now.timestamp());

    let calls = broadcaster.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].target_id, creator.as_str());
    assert_eq!(calls[0].content["title"], "Shipment S2412000112345 Updated");
    assert_eq!(
        calls[0].content["message"],
        "Bo Chen updated Shipment S2412000112345: Status changed from New to InTransit"
    );
    assert_eq!(calls[0].content["eventType"], "shipment.status_change");

    // Nothing new since the watermark.
    let again = listener.poll_once(now).await.unwrap();
    assert_eq!(again.entries, 0);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn same_second_backlog_is_drained_across_ticks(pool: PgPool) {
    let t = tenant();
    let editor = user(&pool, &t, "Bo Chen").await;
    let mut creators = Vec::new();
    for i in 0..130 {
        let creator = user(&pool, &t, &format!("Creator {i}")).await;
        preference(&pool, &t, &creator, json!({})).await;
        let record = format!("shp_{i}");
        audit(&pool, &t, &creator, actions::CREATE, &record, 100).await;
        audit(&pool, &t, &editor, actions::UPDATE, &record, 200).await;
        creators.push(creator);
    }

    let (listener, _, broadcaster) = setup(&pool);
    let now = Utc.with_ymd_and_hms(2024, 12, 2, 18, 0, 0).unwrap();

    let first = listener.poll_once(now).await.unwrap();
    assert_eq!(first.entries, 100);
    assert_eq!(first.sent, 100);
    let cursor = listener.cursor();
    assert_eq!(cursor.timestamp, 200);
    assert!(cursor.after_id.is_some());

    let second = listener.poll_once(now).await.unwrap();
    assert_eq!(second.entries, 30);
    assert_eq!(second.sent, 30);
    assert_eq!(listener.last_check(), now.timestamp());
    assert_eq!(listener.cursor().after_id, None);

    let calls = broadcaster.calls();
    assert_eq!(calls.len(), 130);
    for creator in &creators {
        assert_eq!(inbox_total(&pool, &t, creator).await, 1);
        assert_eq!(
            calls.iter().filter(|c| c.target_id == creator.as_str()).count(),
            1
        );
    }
}

#[sqlx::test(migrations = "../db/migrations")]
async fn updates_by_the_creator_are_skipped(pool: PgPool) {
    let t = tenant();
    let creator = user(&pool, &t, "Ann Lee").await;
    preference(&pool, &t, &creator, json!({})).await;
    audit(&pool, &t, &creator, actions::CREATE, "shp_1", 100).await;
    audit(&pool, &t, &creator, actions::UPDATE, "shp_1", 200).await;
    // No create entry at all for this record.
    audit(&pool, &t, &creator, actions::UPDATE, "shp_orphan", 300).await;

    let (listener, _, broadcaster) = setup(&pool);
    let report = listener.poll_once(Utc::now()).await.unwrap();

    assert_eq!(report.entries, 2);
    assert_eq!(report.skipped, 2);
    assert!(broadcaster.calls().is_empty());
    assert_eq!(inbox_total(&pool, &t, &creator).await, 0);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn quiet_hours_suppress_in_local_time(pool: PgPool) {
    let t = tenant();
    let creator = user(&pool, &t, "Ann Lee").await;
    let editor = user(&pool, &t, "Bo Chen").await;
    preference(
        &pool,
        &t,
        &creator,
        json!({
            "quietHoursEnabled": true,
            "quietHoursStart": "22:00",
            "quietHoursEnd": "06:00",
            "timezone": "America/Chicago",
        }),
    )
    .await;
    audit(&pool, &t, &creator, actions::CREATE, "shp_1", 100).await;
    audit(&pool, &t, &editor, actions::UPDATE, "shp_1", 200).await;

    let (listener, _, broadcaster) = setup(&pool);
    // 23:00 in Chicago.
    let night = Utc.with_ymd_and_hms(2024, 12, 3, 5, 0, 0).unwrap();
    let report = listener.poll_once(night).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(broadcaster.calls().is_empty());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn unwanted_update_types_are_skipped(pool: PgPool) {
    let t = tenant();
    let creator = user(&pool, &t, "Ann Lee").await;
    let editor = user(&pool, &t, "Bo Chen").await;
    preference(&pool, &t, &creator, json!({"updateTypes": ["price_change"]})).await;
    audit(&pool, &t, &creator, actions::CREATE, "shp_1", 100).await;
    audit(&pool, &t, &editor, actions::UPDATE, "shp_1", 200).await;

    let (listener, _, broadcaster) = setup(&pool);
    let report = listener.poll_once(Utc::now()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.sent, 0);
    assert!(broadcaster.calls().is_empty());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn batching_preference_queues_instead_of_sending(pool: PgPool) {
    let t = tenant();
    let creator = user(&pool, &t, "Ann Lee").await;
    let editor = user(&pool, &t, "Bo Chen").await;
    preference(
        &pool,
        &t,
        &creator,
        json!({"batchNotifications": true, "batchIntervalMinutes": 2}),
    )
    .await;
    audit(&pool, &t, &creator, actions::CREATE, "shp_1", 100).await;
    audit(&pool, &t, &editor, actions::UPDATE, "shp_1", 200).await;
    audit(&pool, &t, &editor, actions::UPDATE, "shp_1", 300).await;

    let (listener, batcher, broadcaster) = setup(&pool);
    let report = listener.poll_once(Utc::now()).await.unwrap();

    assert_eq!(report.batched, 2);
    assert!(broadcaster.calls().is_empty());
    assert_eq!(batcher.pending_count(&creator).await, 2);

    assert_eq!(batcher.flush_all().await, 1);
    assert_eq!(batcher.pending_count(&creator).await, 0);
    let calls = broadcaster.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].content["title"], "You have 2 updates");
}

// ---------------------------------------------------------------------------
// Batch processor
// ---------------------------------------------------------------------------

fn pending(t: &Tenant, user: &PulId, queued_at: i64) -> PendingNotification {
    PendingNotification {
        user_id: user.clone(),
        organization_id: t.org.clone(),
        business_unit_id: Some(t.bu.clone()),
        event_type: "shipment.status_change".into(),
        title: "Shipment Updated".into(),
        message: "Bo Chen updated Shipment".into(),
        data: json!({}),
        related_entities: Vec::new(),
        queued_at,
    }
}

#[sqlx::test(migrations = "../db/migrations")]
async fn batch_flushes_once_the_interval_has_elapsed(pool: PgPool) {
    let t = tenant();
    let owner = PulId::new(prefixes::USER);
    preference(
        &pool,
        &t,
        &owner,
        json!({"batchNotifications": true, "batchIntervalMinutes": 2}),
    )
    .await;

    let (svc, broadcaster) = service(&pool);
    let batcher = BatchProcessor::new(svc);
    let t0 = 1_733_000_000;
    for offset in [0, 30, 90] {
        batcher.add_to_batch(pending(&t, &owner, t0 + offset)).await;
    }

    assert_eq!(batcher.process_batches(t0 + 60).await, 0);
    assert_eq!(batcher.pending_count(&owner).await, 3);

    assert_eq!(batcher.process_batches(t0 + 120).await, 1);
    assert_eq!(batcher.pending_count(&owner).await, 0);

    let calls = broadcaster.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].content["title"], "You have 3 updates");
    assert_eq!(calls[0].content["eventType"], event_types::BATCH_SUMMARY);
    assert_eq!(calls[0].content["data"]["count"], 3);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn batch_without_preference_flushes_immediately(pool: PgPool) {
    let t = tenant();
    let owner = PulId::new(prefixes::USER);
    let (svc, broadcaster) = service(&pool);
    let batcher = BatchProcessor::new(svc);

    batcher.add_to_batch(pending(&t, &owner, 1_733_000_000)).await;
    assert_eq!(batcher.process_batches(1_733_000_001).await, 1);
    assert_eq!(broadcaster.calls()[0].content["title"], "You have 1 update");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn failed_flush_keeps_the_queue(pool: PgPool) {
    let t = tenant();
    let owner = PulId::new(prefixes::USER);
    let (svc, broadcaster) = service(&pool);
    let batcher = BatchProcessor::new(svc);
    broadcaster.set_fail_all(true);

    batcher.add_to_batch(pending(&t, &owner, 10)).await;
    batcher.add_to_batch(pending(&t, &owner, 20)).await;
    assert_eq!(batcher.flush_all().await, 0);
    assert_eq!(batcher.pending_count(&owner).await, 2);

    broadcaster.set_fail_all(false);
    batcher.stop().await;
    assert_eq!(batcher.pending_count(&owner).await, 0);
    assert_eq!(broadcaster.calls().len(), 1);
}
