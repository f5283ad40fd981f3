//! Integration tests for `NotificationService`, the dispatchers and the
//! maintenance sweep.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use sqlx::PgPool;
use waybill_core::error::CoreError;
use waybill_core::notification::DeliveryStatus;
use waybill_core::rooms::BroadcastTarget;
use waybill_core::types::{now_ts, prefixes, PulId};
use waybill_db::models::notification::{CreateNotification, NotificationQuery};
use waybill_db::repositories::NotificationRepo;
use waybill_notifications::dispatch::{CommentMention, JobCompletion};
use waybill_notifications::NotificationMaintenance;

use common::{scope, service, tenant, wait_for_status};

fn mention(t: &common::Tenant, user: &PulId) -> CommentMention {
    CommentMention {
        organization_id: t.org.clone(),
        business_unit_id: Some(t.bu.clone()),
        mentioned_user_id: user.clone(),
        mentioned_by_name: "Ann".into(),
        resource: "shipment".into(),
        resource_id: "shp_1".into(),
        comment_id: "cmt_1".into(),
        comment_text: "please check the seal number".into(),
    }
}

// ---------------------------------------------------------------------------
// Send
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn send_persists_broadcasts_then_marks_delivered(pool: PgPool) {
    let (svc, broadcaster) = service(&pool);
    let t = tenant();
    let user = PulId::new(prefixes::USER);

    let sent = svc
        .send_notification(CreateNotification::for_user(
            t.org.clone(),
            Some(t.bu.clone()),
            user.clone(),
            "shipment.status_change",
            "T",
            "M",
        ))
        .await
        .expect("send should succeed");

    let calls = broadcaster.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].target, BroadcastTarget::User);
    assert_eq!(calls[0].target_id, user.as_str());
    assert_eq!(calls[0].content["id"], sent.id.as_str());
    assert_eq!(calls[0].content["title"], "T");
    assert_eq!(calls[0].content["message"], "M");

    assert!(wait_for_status(&pool, &sent.id, DeliveryStatus::Delivered).await);
    let stored = NotificationRepo::find_by_id(&pool, &sent.id).await.unwrap().unwrap();
    assert!(stored.delivered_at.is_some());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn org_and_role_notifications_route_to_their_index(pool: PgPool) {
    let (svc, broadcaster) = service(&pool);
    let t = tenant();
    let role = PulId::new(prefixes::ROLE);

    svc.send_notification(CreateNotification::for_org(t.org.clone(), "system.notice", "T", "M"))
        .await
        .unwrap();
    svc.send_notification(CreateNotification::for_role(
        t.org.clone(),
        t.bu.clone(),
        role.clone(),
        "system.notice",
        "T",
        "M",
    ))
    .await
    .unwrap();

    let calls = broadcaster.calls();
    assert_eq!(calls[0].target, BroadcastTarget::Org);
    assert_eq!(calls[0].target_id, t.org.as_str());
    assert_eq!(calls[1].target, BroadcastTarget::Room);
    assert_eq!(calls[1].target_id, format!("role_{}_{}_{}", t.org, t.bu, role));
}

#[sqlx::test(migrations = "../db/migrations")]
async fn failed_broadcast_is_reported_and_left_for_retry(pool: PgPool) {
    let (svc, broadcaster) = service(&pool);
    let t = tenant();
    let user = PulId::new(prefixes::USER);
    broadcaster.set_fail_all(true);

    let err = svc
        .send_notification(CreateNotification::for_user(t.org.clone(), None, user.clone(), "e", "T", "M"))
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::Internal(_));

    let page = svc
        .user_notifications(&NotificationQuery {
            scope: scope(&t, &user),
            limit: 10,
            offset: 0,
            unread_only: false,
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].delivery_status, DeliveryStatus::Failed);

    // The sweep redelivers once the hub accepts again.
    broadcaster.set_fail_all(false);
    let maintenance = NotificationMaintenance::new(svc.clone());
    let report = maintenance.sweep_once(now_ts()).await.unwrap();
    assert_eq!(report.retried, 1);

    let stored = NotificationRepo::find_by_id(&pool, &page.items[0].id).await.unwrap().unwrap();
    assert_eq!(stored.delivery_status, DeliveryStatus::Delivered);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(broadcaster.calls().len(), 1);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn invalid_targeting_is_rejected_before_insert(pool: PgPool) {
    let (svc, broadcaster) = service(&pool);
    let t = tenant();
    let mut input = CreateNotification::for_user(t.org.clone(), None, PulId::new(prefixes::USER), "e", "T", "M");
    input.target_user_id = None;

    assert_matches!(
        svc.send_notification(input).await,
        Err(CoreError::InvalidFields(_))
    );
    assert!(broadcaster.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Read lifecycle
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn mark_read_decrements_unread_count_once(pool: PgPool) {
    let (svc, _) = service(&pool);
    let t = tenant();
    let user = PulId::new(prefixes::USER);
    let s = scope(&t, &user);

    let a = svc
        .send_notification(CreateNotification::for_user(t.org.clone(), None, user.clone(), "e", "A", "M"))
        .await
        .unwrap();
    svc.send_notification(CreateNotification::for_user(t.org.clone(), None, user.clone(), "e", "B", "M"))
        .await
        .unwrap();
    assert_eq!(svc.unread_count(&user, &t.org).await.unwrap(), 2);

    svc.mark_as_read(&a.id, &s).await.unwrap();
    assert_eq!(svc.unread_count(&user, &t.org).await.unwrap(), 1);
    assert_matches!(
        svc.mark_as_read(&a.id, &s).await,
        Err(CoreError::NotFound { .. })
    );

    svc.mark_as_dismissed(&a.id, &s).await.unwrap();
    assert_eq!(svc.read_all(&s).await.unwrap(), 1);
    assert_eq!(svc.unread_count(&user, &t.org).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Dispatchers
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn job_completion_is_stored_with_job_metadata(pool: PgPool) {
    let (svc, _) = service(&pool);
    let t = tenant();
    let user = PulId::new(prefixes::USER);

    let n = svc
        .send_job_completion(JobCompletion {
            organization_id: t.org.clone(),
            business_unit_id: Some(t.bu.clone()),
            user_id: user,
            job_id: "job-42".into(),
            job_type: "delay_shipment".into(),
            success: true,
            result: "12 shipments delayed".into(),
            data: json!({"count": 12}),
        })
        .await
        .unwrap();

    assert_eq!(n.title, "Shipment Delay Processing");
    assert_eq!(n.message, "12 shipments delayed");
    assert_eq!(n.job_id.as_deref(), Some("job-42"));
    assert_eq!(n.data["details"]["count"], 12);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn bulk_mentions_attempt_everyone_and_count_failures(pool: PgPool) {
    let (svc, broadcaster) = service(&pool);
    let t = tenant();
    let users: Vec<PulId> = (0..3).map(|_| PulId::new(prefixes::USER)).collect();
    broadcaster.fail_for(users[1].as_str());

    let err = svc
        .send_bulk_comment_mentions(users.iter().map(|u| mention(&t, u)).collect())
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::Internal(msg) if msg == "failed to send 1 of 3 mention notifications");
    assert_eq!(broadcaster.calls().len(), 2);

    svc.send_bulk_comment_mentions(vec![mention(&t, &users[0])])
        .await
        .expect("all sends succeed");
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn sweep_expires_and_purges(pool: PgPool) {
    let (svc, _) = service(&pool);
    let t = tenant();
    let user = PulId::new(prefixes::USER);
    let s = scope(&t, &user);

    let stale = NotificationRepo::create(
        &pool,
        &CreateNotification::for_user(t.org.clone(), None, user.clone(), "e", "Old", "M")
            .expires_at(now_ts() - 10),
    )
    .await
    .unwrap();
    let read = svc
        .send_notification(CreateNotification::for_user(t.org.clone(), None, user.clone(), "e", "Read", "M"))
        .await
        .unwrap();
    svc.mark_as_read(&read.id, &s).await.unwrap();

    let maintenance = NotificationMaintenance::new(svc.clone()).with_retention_days(30);

    let report = maintenance.sweep_once(now_ts()).await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.purged, 0);
    let stored = NotificationRepo::find_by_id(&pool, &stale.id).await.unwrap().unwrap();
    assert_eq!(stored.delivery_status, DeliveryStatus::Expired);

    // Thirty-one days later the read notification falls out of retention.
    let later = now_ts() + 31 * 86_400;
    let report = maintenance.sweep_once(later).await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(report.purged, 1);
    assert!(NotificationRepo::find_by_id(&pool, &read.id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn scheduled_sweep_failures_are_counted_and_the_loop_keeps_running(pool: PgPool) {
    let (svc, _) = service(&pool);
    let maintenance = Arc::new(
        NotificationMaintenance::new(svc).with_interval(Duration::from_millis(20)),
    );
    pool.close().await;

    assert!(maintenance.start());
    for _ in 0..100 {
        if maintenance.failed_sweeps() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    maintenance.stop().await;
    assert!(maintenance.failed_sweeps() >= 2);
}
