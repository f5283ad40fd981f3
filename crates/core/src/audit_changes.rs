//! Interpreting audited changes: update-type detection, value formatting,
//! change summaries, display names and resource URLs.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::preference::{Resource, UpdateType};

/// Audit actions this subsystem reads or writes.
pub mod actions {
    pub const CREATE: &str = "Create";
    pub const UPDATE: &str = "Update";
    pub const DELETE: &str = "Delete";
}

/// Maximum number of individual changes spelled out in a summary.
pub const MAX_SUMMARY_CHANGES: usize = 3;

const STATUS_FIELDS: &[&str] = &["status"];
const ASSIGNMENT_FIELDS: &[&str] = &["assigned_to", "assigned_user_id", "worker_id"];
const DATE_FIELDS: &[&str] = &[
    "arrival_time",
    "departure_time",
    "planned_arrival",
    "planned_departure",
    "actual_ship_date",
    "actual_delivery_date",
];
const LOCATION_FIELDS: &[&str] = &[
    "location",
    "location_id",
    "origin_location_id",
    "destination_location_id",
];
const PRICE_FIELDS: &[&str] = &["price", "rate", "total_charge", "accessorial_charges"];
const COMPLIANCE_FIELDS: &[&str] = &["hazmat_status", "compliance_status"];

/// Classify a change set.
///
/// Categories are checked in a fixed order so that a change touching several
/// categories is classified deterministically.
pub fn detect_update_type(resource: &str, changes: &Map<String, Value>) -> UpdateType {
    if changes.is_empty() {
        return UpdateType::Any;
    }

    let categories: [(&[&str], UpdateType); 6] = [
        (STATUS_FIELDS, UpdateType::StatusChange),
        (ASSIGNMENT_FIELDS, UpdateType::Assignment),
        (DATE_FIELDS, UpdateType::DateChange),
        (LOCATION_FIELDS, UpdateType::LocationChange),
        (PRICE_FIELDS, UpdateType::PriceChange),
        (COMPLIANCE_FIELDS, UpdateType::ComplianceChange),
    ];
    for (fields, update_type) in categories {
        if fields.iter().any(|f| changes.contains_key(*f)) {
            return update_type;
        }
    }

    if resource == "document" {
        UpdateType::DocumentUpload
    } else {
        UpdateType::FieldChange
    }
}

/// Render a changed value for humans.
///
/// Epoch-second numbers on date fields render as `Mon D, YYYY H:MM AM/PM`,
/// booleans as Yes/No, null as "empty".
pub fn format_field_value(field: &str, value: &Value) -> String {
    match value {
        Value::Null => "empty".to_string(),
        Value::Bool(true) => "Yes".to_string(),
        Value::Bool(false) => "No".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) if DATE_FIELDS.contains(&field) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|dt| dt.format("%b %-d, %Y %-I:%M %p").to_string())
            .unwrap_or_else(|| n.to_string()),
        other => other.to_string(),
    }
}

/// `planned_arrival` -> `Planned Arrival`.
pub fn humanize_field(field: &str) -> String {
    field
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Compact one-line summary of a change set.
///
/// Each change is expected as `{"from": .., "to": ..}`; bare values are
/// treated as the new value. At most [`MAX_SUMMARY_CHANGES`] are listed.
pub fn summarize_changes(changes: &Map<String, Value>) -> Option<String> {
    if changes.is_empty() {
        return None;
    }

    let mut parts: Vec<String> = changes
        .iter()
        .take(MAX_SUMMARY_CHANGES)
        .map(|(field, change)| {
            let label = humanize_field(field);
            match change {
                Value::Object(obj) if obj.contains_key("from") || obj.contains_key("to") => {
                    let from = format_field_value(field, obj.get("from").unwrap_or(&Value::Null));
                    let to = format_field_value(field, obj.get("to").unwrap_or(&Value::Null));
                    format!("{label} changed from {from} to {to}")
                }
                value => format!("{label} changed to {}", format_field_value(field, value)),
            }
        })
        .collect();

    let remaining = changes.len().saturating_sub(MAX_SUMMARY_CHANGES);
    if remaining > 0 {
        let noun = if remaining == 1 { "change" } else { "changes" };
        parts.push(format!("and {remaining} more {noun}"));
    }
    Some(parts.join(", "))
}

/// Human label for a resource name, e.g. `equipment_type` -> `Equipment Type`.
pub fn resource_label(resource: &str) -> String {
    humanize_field(resource)
}

/// Display name for an audited record: the resource label, followed by the
/// record's business identifier when the current state carries one.
pub fn display_name(resource: &str, current_state: Option<&Value>) -> String {
    let label = resource_label(resource);
    let identifier = current_state.and_then(|state| {
        ["pro_number", "code", "name"]
            .iter()
            .find_map(|key| state.get(*key).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
    });
    match identifier {
        Some(id) => format!("{label} {id}"),
        None => label,
    }
}

/// UI path for a resource record.
pub fn resource_url(resource: &str, resource_id: &str) -> String {
    let base = match Resource::parse(resource) {
        Some(Resource::Shipment) => "/shipments/management",
        Some(Resource::Worker) => "/dispatch/configurations/workers",
        Some(Resource::Customer) => "/billing/configurations/customers",
        Some(Resource::Tractor) => "/equipment/configurations/tractors",
        Some(Resource::Trailer) => "/equipment/configurations/trailers",
        Some(Resource::Location) => "/dispatch/configurations/locations",
        Some(Resource::Commodity) => "/shipments/configurations/commodities",
        Some(Resource::FleetCode) => "/dispatch/configurations/fleet-codes",
        Some(Resource::EquipmentType) => "/equipment/configurations/equipment-types",
        Some(Resource::EquipmentManufacturer) => {
            "/equipment/configurations/equipment-manufacturers"
        }
        None => return format!("/{resource}/{resource_id}"),
    };
    format!("{base}?entityId={resource_id}&modal=edit")
}

/// Field-level diff between two JSON objects, in the `{"from", "to"}` shape
/// read back by [`summarize_changes`]. Fields listed in `ignore` are skipped.
pub fn diff_objects(before: &Value, after: &Value, ignore: &[&str]) -> Map<String, Value> {
    let empty = Map::new();
    let before = before.as_object().unwrap_or(&empty);
    let after = after.as_object().unwrap_or(&empty);

    let mut diff = Map::new();
    for (key, new_value) in after {
        if ignore.contains(&key.as_str()) {
            continue;
        }
        let old_value = before.get(key).unwrap_or(&Value::Null);
        if old_value != new_value {
            diff.insert(
                key.clone(),
                serde_json::json!({ "from": old_value, "to": new_value }),
            );
        }
    }
    for (key, old_value) in before {
        if !after.contains_key(key) && !ignore.contains(&key.as_str()) {
            diff.insert(
                key.clone(),
                serde_json::json!({ "from": old_value, "to": Value::Null }),
            );
        }
    }
    diff
}
