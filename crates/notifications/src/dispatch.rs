//! Specialized notification dispatchers.
//!
//! Each request type renders into a [`CreateNotification`] and goes through
//! [`NotificationService::send_notification`].

use futures::stream::{self, StreamExt};
use serde_json::json;
use waybill_core::audit_changes::{display_name, resource_url};
use waybill_core::error::CoreError;
use waybill_core::jobs::render_job_notification;
use waybill_core::notification::{
    event_types, sources, NotificationAction, Priority, RelatedEntity,
};
use waybill_core::types::{PulId, Timestamp};
use waybill_db::models::notification::{CreateNotification, Notification};

use crate::service::NotificationService;

/// Upper bound on concurrent sends in [`NotificationService::send_bulk_comment_mentions`].
pub const MAX_CONCURRENT_MENTIONS: usize = 10;

/// Characters of a comment quoted in a mention notification.
pub const COMMENT_PREVIEW_CHARS: usize = 100;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A background job finished.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub user_id: PulId,
    pub job_id: String,
    pub job_type: String,
    pub success: bool,
    pub result: String,
    pub data: serde_json::Value,
}

impl JobCompletion {
    pub fn into_notification(self) -> CreateNotification {
        let content =
            render_job_notification(&self.job_type, &self.job_id, self.success, &self.result);
        CreateNotification::for_user(
            self.organization_id,
            self.business_unit_id,
            self.user_id,
            content.event_type,
            content.title,
            content.message,
        )
        .with_priority(content.priority)
        .with_source(sources::JOB_SYSTEM)
        .with_job_id(self.job_id.clone())
        .with_data(json!({
            "jobId": self.job_id,
            "jobType": self.job_type,
            "success": self.success,
            "result": self.result,
            "details": self.data,
        }))
    }
}

/// A configuration was copied into the user's tenant.
#[derive(Debug, Clone)]
pub struct ConfigurationCopied {
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub user_id: PulId,
    pub config_type: String,
    pub config_name: String,
    pub copied_by_name: String,
}

impl ConfigurationCopied {
    pub fn into_notification(self) -> CreateNotification {
        let message = format!(
            "{} copied the {} configuration \"{}\"",
            self.copied_by_name, self.config_type, self.config_name
        );
        CreateNotification::for_user(
            self.organization_id,
            self.business_unit_id,
            self.user_id,
            event_types::CONFIGURATION_COPIED,
            "Configuration Copied",
            message,
        )
        .with_priority(Priority::Low)
        .with_source(sources::SYSTEM)
        .with_data(json!({
            "configType": self.config_type,
            "configName": self.config_name,
            "copiedBy": self.copied_by_name,
        }))
    }
}

/// A report export can be downloaded until `expires_at`.
#[derive(Debug, Clone)]
pub struct ReportExportReady {
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub user_id: PulId,
    pub report_id: String,
    pub report_name: String,
    pub download_url: String,
    pub expires_at: Timestamp,
}

impl ReportExportReady {
    pub fn into_notification(self) -> CreateNotification {
        CreateNotification::for_user(
            self.organization_id,
            self.business_unit_id,
            self.user_id,
            event_types::REPORT_EXPORT_READY,
            "Report Ready",
            format!("Your report \"{}\" is ready to download", self.report_name),
        )
        .with_source(sources::SYSTEM)
        .with_related_entity(RelatedEntity {
            entity_type: "report".into(),
            id: self.report_id.clone(),
            name: self.report_name.clone(),
            url: self.download_url.clone(),
        })
        .with_action(NotificationAction::link("download", "Download", self.download_url))
        .with_data(json!({ "reportId": self.report_id }))
        .expires_at(self.expires_at)
    }
}

/// A record changed hands; the new owner is notified.
#[derive(Debug, Clone)]
pub struct OwnershipTransfer {
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub new_owner_id: PulId,
    pub previous_owner_name: String,
    pub transferred_by_name: String,
    pub resource: String,
    pub resource_id: String,
    pub resource_name: String,
}

impl OwnershipTransfer {
    pub fn into_notification(self) -> CreateNotification {
        let url = resource_url(&self.resource, &self.resource_id);
        let message = format!(
            "{} transferred ownership of {} from {} to you",
            self.transferred_by_name, self.resource_name, self.previous_owner_name
        );
        CreateNotification::for_user(
            self.organization_id,
            self.business_unit_id,
            self.new_owner_id,
            event_types::OWNERSHIP_TRANSFERRED,
            "Ownership Transferred",
            message,
        )
        .with_priority(Priority::High)
        .with_source(sources::SYSTEM)
        .with_related_entity(RelatedEntity {
            entity_type: self.resource.clone(),
            id: self.resource_id.clone(),
            name: self.resource_name,
            url: url.clone(),
        })
        .with_action(NotificationAction::link("view", "View", url))
        .with_data(json!({
            "resource": self.resource,
            "resourceId": self.resource_id,
            "previousOwner": self.previous_owner_name,
        }))
    }
}

/// A hold on a shipment was released.
#[derive(Debug, Clone)]
pub struct ShipmentHoldReleased {
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub user_id: PulId,
    pub shipment_id: String,
    pub pro_number: String,
    pub hold_type: String,
    pub released_by_name: String,
}

impl ShipmentHoldReleased {
    pub fn into_notification(self) -> CreateNotification {
        let url = resource_url("shipment", &self.shipment_id);
        let message = format!(
            "{} released the {} hold on shipment {}",
            self.released_by_name, self.hold_type, self.pro_number
        );
        CreateNotification::for_user(
            self.organization_id,
            self.business_unit_id,
            self.user_id,
            event_types::SHIPMENT_HOLD_RELEASED,
            "Shipment Hold Released",
            message,
        )
        .with_priority(Priority::High)
        .with_source(sources::SYSTEM)
        .with_related_entity(RelatedEntity {
            entity_type: "shipment".into(),
            id: self.shipment_id.clone(),
            name: format!("Shipment {}", self.pro_number),
            url: url.clone(),
        })
        .with_action(NotificationAction::link("view", "View Shipment", url))
        .with_data(json!({
            "shipmentId": self.shipment_id,
            "proNumber": self.pro_number,
            "holdType": self.hold_type,
        }))
    }
}

/// A user was mentioned in a comment.
#[derive(Debug, Clone)]
pub struct CommentMention {
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub mentioned_user_id: PulId,
    pub mentioned_by_name: String,
    pub resource: String,
    pub resource_id: String,
    pub comment_id: String,
    pub comment_text: String,
}

impl CommentMention {
    pub fn into_notification(self) -> CreateNotification {
        let url = resource_url(&self.resource, &self.resource_id);
        let display = display_name(&self.resource, None);
        let preview = truncate_preview(&self.comment_text, COMMENT_PREVIEW_CHARS);
        let message = format!(
            "{} mentioned you in a comment on {display}: \"{preview}\"",
            self.mentioned_by_name
        );
        CreateNotification::for_user(
            self.organization_id,
            self.business_unit_id,
            self.mentioned_user_id,
            event_types::COMMENT_MENTION,
            "You were mentioned",
            message,
        )
        .with_source(sources::SYSTEM)
        .with_related_entity(RelatedEntity {
            entity_type: self.resource.clone(),
            id: self.resource_id.clone(),
            name: display,
            url: url.clone(),
        })
        .with_action(NotificationAction::link("view", "View Comment", url))
        .with_data(json!({
            "resource": self.resource,
            "resourceId": self.resource_id,
            "commentId": self.comment_id,
            "mentionedBy": self.mentioned_by_name,
        }))
    }
}

/// First `max` characters of `text`, with an ellipsis when cut.
fn truncate_preview(text: &str, max: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Service entry points
// ---------------------------------------------------------------------------

impl NotificationService {
    pub async fn send_job_completion(
        &self,
        request: JobCompletion,
    ) -> Result<Notification, CoreError> {
        tracing::debug!(job_id = %request.job_id, job_type = %request.job_type, "Job completion");
        self.send_notification(request.into_notification()).await
    }

    pub async fn send_configuration_copied(
        &self,
        request: ConfigurationCopied,
    ) -> Result<Notification, CoreError> {
        self.send_notification(request.into_notification()).await
    }

    pub async fn send_report_export_ready(
        &self,
        request: ReportExportReady,
    ) -> Result<Notification, CoreError> {
        self.send_notification(request.into_notification()).await
    }

    pub async fn send_ownership_transfer(
        &self,
        request: OwnershipTransfer,
    ) -> Result<Notification, CoreError> {
        self.send_notification(request.into_notification()).await
    }

    pub async fn send_shipment_hold_released(
        &self,
        request: ShipmentHoldReleased,
    ) -> Result<Notification, CoreError> {
        self.send_notification(request.into_notification()).await
    }

    pub async fn send_comment_mention(
        &self,
        request: CommentMention,
    ) -> Result<Notification, CoreError> {
        self.send_notification(request.into_notification()).await
    }

    /// Send every mention, at most [`MAX_CONCURRENT_MENTIONS`] at a time.
    ///
    /// A failure never stops the remaining sends; the aggregate error
    /// reports how many failed.
    pub async fn send_bulk_comment_mentions(
        &self,
        requests: Vec<CommentMention>,
    ) -> Result<(), CoreError> {
        let total = requests.len();
        let results: Vec<Result<Notification, CoreError>> = stream::iter(requests)
            .map(|request| self.send_comment_mention(request))
            .buffer_unordered(MAX_CONCURRENT_MENTIONS)
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            tracing::warn!(error = %err, "Mention notification failed");
        }

        if failed > 0 {
            tracing::error!(failed, total, "Bulk mention dispatch partially failed");
            return Err(CoreError::Internal(format!(
                "failed to send {failed} of {total} mention notifications"
            )));
        }
        tracing::info!(total, "Bulk mention notifications sent");
        Ok(())
    }
}
