//! Static registry mapping background job types to notification shapes.

use crate::notification::Priority;

/// How a completed job of a given type is announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobNotificationEntry {
    pub job_type: &'static str,
    pub event_type: &'static str,
    pub success_priority: Priority,
    pub failure_priority: Priority,
    /// `%s` receives the status word ("Completed"/"Failed").
    pub title_template: &'static str,
    /// `%s` placeholders receive job id, status phrase and result, in order.
    pub message_template: &'static str,
    /// Use `title_template` verbatim.
    pub use_custom_title: bool,
    /// `message_template` takes only the result string.
    pub use_custom_message: bool,
}

const REGISTRY: &[JobNotificationEntry] = &[
    JobNotificationEntry {
        job_type: "duplicate_shipment",
        event_type: "job.shipment.duplicate_complete",
        success_priority: Priority::Medium,
        failure_priority: Priority::High,
        title_template: "Shipment Duplication %s",
        message_template: "Shipment duplication job %s has %s: %s",
        use_custom_title: false,
        use_custom_message: false,
    },
    JobNotificationEntry {
        job_type: "pattern_analysis",
        event_type: "job.analysis.pattern_complete",
        success_priority: Priority::Medium,
        failure_priority: Priority::High,
        title_template: "Pattern Analysis %s",
        message_template: "Pattern analysis job %s has %s: %s",
        use_custom_title: false,
        use_custom_message: false,
    },
    JobNotificationEntry {
        job_type: "delay_shipment",
        event_type: "job.shipment.delay",
        success_priority: Priority::Medium,
        failure_priority: Priority::High,
        title_template: "Shipment Delay Processing",
        message_template: "%s",
        use_custom_title: true,
        use_custom_message: true,
    },
    JobNotificationEntry {
        job_type: "compliance_check",
        event_type: "job.compliance.check_complete",
        success_priority: Priority::High,
        failure_priority: Priority::Critical,
        title_template: "Compliance Check %s",
        message_template: "Compliance check job %s has %s: %s",
        use_custom_title: false,
        use_custom_message: false,
    },
    JobNotificationEntry {
        job_type: "billing_process",
        event_type: "job.billing.process_complete",
        success_priority: Priority::Medium,
        failure_priority: Priority::High,
        title_template: "Billing Process %s",
        message_template: "Billing process job %s has %s: %s",
        use_custom_title: false,
        use_custom_message: false,
    },
];

/// Shape used for job types missing from the registry.
const GENERIC: JobNotificationEntry = JobNotificationEntry {
    job_type: "generic",
    event_type: "job.completed",
    success_priority: Priority::Medium,
    failure_priority: Priority::High,
    title_template: "Job %s",
    message_template: "Job %s has %s: %s",
    use_custom_title: false,
    use_custom_message: false,
};

pub fn lookup(job_type: &str) -> Option<&'static JobNotificationEntry> {
    REGISTRY.iter().find(|e| e.job_type == job_type)
}

/// Rendered notification content for a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNotificationContent {
    pub event_type: String,
    pub priority: Priority,
    pub title: String,
    pub message: String,
}

/// Resolve and fill in the templates for a finished job.
pub fn render_job_notification(
    job_type: &str,
    job_id: &str,
    success: bool,
    result: &str,
) -> JobNotificationContent {
    let entry = lookup(job_type).unwrap_or(&GENERIC);
    let (status_word, status_phrase, priority) = if success {
        ("Completed", "completed successfully", entry.success_priority)
    } else {
        ("Failed", "failed", entry.failure_priority)
    };

    let title = if entry.use_custom_title {
        entry.title_template.to_string()
    } else {
        fill_placeholders(entry.title_template, &[status_word])
    };
    let message = if entry.use_custom_message {
        fill_placeholders(entry.message_template, &[result])
    } else {
        fill_placeholders(entry.message_template, &[job_id, status_phrase, result])
    };

    JobNotificationContent {
        event_type: entry.event_type.to_string(),
        priority,
        title,
        message,
    }
}

/// Replace each `%s` in order. Surplus placeholders are left untouched.
fn fill_placeholders(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("%s") {
        out.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => out.push_str(arg),
            None => out.push_str("%s"),
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}
