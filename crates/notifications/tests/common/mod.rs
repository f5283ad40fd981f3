//! Shared fixtures for the notification integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::PgPool;
use waybill_core::audit_changes::actions;
use waybill_core::notification::DeliveryStatus;
use waybill_core::permissions::Principal;
use waybill_core::rooms::BroadcastTarget;
use waybill_core::types::{prefixes, PulId, Timestamp};
use waybill_db::models::audit::CreateAuditEntry;
use waybill_db::models::notification::NotificationScope;
use waybill_db::models::preference::{CreateNotificationPreference, PreferenceSettings};
use waybill_db::models::user::CreateUser;
use waybill_db::repositories::{AuditRepo, NotificationPreferenceRepo, NotificationRepo, UserRepo};
use waybill_notifications::{Broadcaster, BusError, NotificationService};

// ---------------------------------------------------------------------------
// RecordingBroadcaster
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Broadcast {
    pub target: BroadcastTarget,
    pub target_id: String,
    pub content: Value,
}

/// Records every broadcast; fails for target ids registered with `fail_for`.
#[derive(Default)]
pub struct RecordingBroadcaster {
    calls: Mutex<Vec<Broadcast>>,
    failing: Mutex<HashSet<String>>,
    fail_all: Mutex<bool>,
}

impl RecordingBroadcaster {
    pub fn calls(&self) -> Vec<Broadcast> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_for(&self, target_id: &str) {
        self.failing.lock().unwrap().insert(target_id.to_string());
    }

    pub fn set_fail_all(&self, fail: bool) {
        *self.fail_all.lock().unwrap() = fail;
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn broadcast(
        &self,
        target: BroadcastTarget,
        target_id: &str,
        content: Value,
    ) -> Result<(), BusError> {
        if *self.fail_all.lock().unwrap() || self.failing.lock().unwrap().contains(target_id) {
            return Err(BusError::Closed);
        }
        self.calls.lock().unwrap().push(Broadcast {
            target,
            target_id: target_id.to_string(),
            content,
        });
        Ok(())
    }
}

pub fn service(pool: &PgPool) -> (NotificationService, Arc<RecordingBroadcaster>) {
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let service = NotificationService::new(pool.clone(), broadcaster.clone());
    (service, broadcaster)
}

// ---------------------------------------------------------------------------
// Tenants and principals
// ---------------------------------------------------------------------------

pub struct Tenant {
    pub org: PulId,
    pub bu: PulId,
}

pub fn tenant() -> Tenant {
    Tenant {
        org: PulId::new(prefixes::ORGANIZATION),
        bu: PulId::new(prefixes::BUSINESS_UNIT),
    }
}

pub async fn user(pool: &PgPool, t: &Tenant, name: &str) -> PulId {
    UserRepo::create(
        pool,
        &CreateUser {
            organization_id: t.org.clone(),
            business_unit_id: Some(t.bu.clone()),
            name: name.into(),
            username: format!("{}-{}", name.to_lowercase().replace(' ', "."), PulId::new("u")),
            email: None,
        },
    )
    .await
    .expect("user should be created")
    .id
}

pub fn principal(t: &Tenant, user_id: &PulId, permissions: &[&str]) -> Principal {
    Principal {
        user_id: user_id.clone(),
        organization_id: t.org.clone(),
        business_unit_id: t.bu.clone(),
        role: "dispatcher".into(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
    }
}

pub fn scope(t: &Tenant, user_id: &PulId) -> NotificationScope {
    NotificationScope {
        user_id: user_id.clone(),
        organization_id: t.org.clone(),
        business_unit_id: Some(t.bu.clone()),
    }
}

// ---------------------------------------------------------------------------
// Preferences and audit entries
// ---------------------------------------------------------------------------

pub fn settings(extra: Value) -> PreferenceSettings {
    let mut base = json!({
        "resource": "shipment",
        "updateTypes": ["status_change"],
    });
    if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
        base.extend(extra.clone());
    }
    serde_json::from_value(base).expect("settings should deserialize")
}

pub fn new_preference(t: &Tenant, user_id: &PulId, extra: Value) -> CreateNotificationPreference {
    CreateNotificationPreference {
        user_id: user_id.clone(),
        organization_id: t.org.clone(),
        business_unit_id: t.bu.clone(),
        settings: settings(extra),
    }
}

pub async fn preference(pool: &PgPool, t: &Tenant, user_id: &PulId, extra: Value) {
    NotificationPreferenceRepo::create(pool, &new_preference(t, user_id, extra))
        .await
        .expect("preference should be created");
}

pub async fn audit(
    pool: &PgPool,
    t: &Tenant,
    user_id: &PulId,
    action: &str,
    resource_id: &str,
    ts: Timestamp,
) {
    let changes = if action == actions::CREATE {
        json!({})
    } else {
        json!({"status": {"from": "New", "to": "InTransit"}})
    };
    AuditRepo::create(
        pool,
        &CreateAuditEntry {
            organization_id: t.org.clone(),
            business_unit_id: t.bu.clone(),
            user_id: user_id.clone(),
            resource: "shipment".into(),
            resource_id: resource_id.into(),
            action: action.into(),
            changes,
            previous_state: None,
            current_state: Some(json!({"pro_number": "S2412000112345"})),
            comment: None,
            timestamp: Some(ts),
        },
    )
    .await
    .expect("audit entry should be created");
}

/// Poll until the background delivered-status write lands.
pub async fn wait_for_status(pool: &PgPool, id: &PulId, status: DeliveryStatus) -> bool {
    for _ in 0..50 {
        let row = NotificationRepo::find_by_id(pool, id).await.unwrap();
        if row.is_some_and(|n| n.delivery_status == status) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
