//! Notification preference rules: resource and update-type vocabularies,
//! structural validation, actor filtering and quiet hours.

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, FieldError};

/// Inclusive bounds for `batch_interval_minutes`.
pub const MIN_BATCH_INTERVAL_MINUTES: i32 = 1;
pub const MAX_BATCH_INTERVAL_MINUTES: i32 = 1440;

/// Channels a preference may currently select.
pub const ALLOWED_PREFERRED_CHANNELS: &[&str] = &["user"];

/// Resources a user can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Shipment,
    Worker,
    Customer,
    Tractor,
    Trailer,
    Location,
    Commodity,
    FleetCode,
    EquipmentType,
    EquipmentManufacturer,
}

impl Resource {
    pub const ALL: [Resource; 10] = [
        Self::Shipment,
        Self::Worker,
        Self::Customer,
        Self::Tractor,
        Self::Trailer,
        Self::Location,
        Self::Commodity,
        Self::FleetCode,
        Self::EquipmentType,
        Self::EquipmentManufacturer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shipment => "shipment",
            Self::Worker => "worker",
            Self::Customer => "customer",
            Self::Tractor => "tractor",
            Self::Trailer => "trailer",
            Self::Location => "location",
            Self::Commodity => "commodity",
            Self::FleetCode => "fleet_code",
            Self::EquipmentType => "equipment_type",
            Self::EquipmentManufacturer => "equipment_manufacturer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == value)
    }
}

/// Category of change detected on an audited update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    StatusChange,
    Assignment,
    DateChange,
    LocationChange,
    PriceChange,
    ComplianceChange,
    DocumentUpload,
    FieldChange,
    Any,
}

impl UpdateType {
    pub const ALL: [UpdateType; 9] = [
        Self::StatusChange,
        Self::Assignment,
        Self::DateChange,
        Self::LocationChange,
        Self::PriceChange,
        Self::ComplianceChange,
        Self::DocumentUpload,
        Self::FieldChange,
        Self::Any,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusChange => "status_change",
            Self::Assignment => "assignment",
            Self::DateChange => "date_change",
            Self::LocationChange => "location_change",
            Self::PriceChange => "price_change",
            Self::ComplianceChange => "compliance_change",
            Self::DocumentUpload => "document_upload",
            Self::FieldChange => "field_change",
            Self::Any => "any",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

/// True if the preference accepts updates of `update_type`.
pub fn is_update_type_enabled(
    notify_on_all_updates: bool,
    update_types: &[String],
    update_type: UpdateType,
) -> bool {
    notify_on_all_updates
        || update_types
            .iter()
            .any(|t| t == update_type.as_str() || t == UpdateType::Any.as_str())
}

/// False iff `updater_id` is in the exclusion list.
pub fn should_notify_user(excluded_user_ids: &[String], updater_id: &str) -> bool {
    !excluded_user_ids.iter().any(|id| id == updater_id)
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Option<Tz> {
    name.parse::<Tz>().ok()
}

/// Whether `now` falls inside the `start`..`end` window in `tz`.
///
/// Times are `HH:MM`. When `end < start` the window spans midnight. Bounds
/// are exclusive. Unparseable times mean "not in quiet hours".
pub fn is_in_quiet_hours(now: DateTime<Utc>, tz: Tz, start: &str, end: &str) -> bool {
    let (Some(start), Some(end)) = (parse_hhmm(start), parse_hhmm(end)) else {
        return false;
    };
    let local = now.with_timezone(&tz).time();

    if end < start {
        local > start || local < end
    } else {
        local > start && local < end
    }
}

fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// Borrowed view of the user-editable preference fields, validated before
/// every create and update.
#[derive(Debug, Clone, Copy)]
pub struct PreferenceDraft<'a> {
    pub resource: &'a str,
    pub notify_on_all_updates: bool,
    pub update_types: &'a [String],
    pub excluded_user_ids: &'a [String],
    pub preferred_channels: &'a [String],
    pub quiet_hours_enabled: bool,
    pub quiet_hours_start: Option<&'a str>,
    pub quiet_hours_end: Option<&'a str>,
    pub timezone: &'a str,
    pub batch_notifications: bool,
    pub batch_interval_minutes: i32,
}

/// Structural and business-rule validation of a preference.
///
/// Collects every failing field before returning.
pub fn validate_preference(draft: &PreferenceDraft<'_>) -> Result<(), CoreError> {
    let mut errors = Vec::new();

    if Resource::parse(draft.resource).is_none() {
        errors.push(FieldError::new(
            "resource",
            format!("'{}' is not a supported resource", draft.resource),
        ));
    }

    if !draft.notify_on_all_updates && draft.update_types.is_empty() {
        errors.push(FieldError::new(
            "updateTypes",
            "at least one update type is required unless notifyOnAllUpdates is set",
        ));
    }
    for t in draft.update_types {
        if UpdateType::parse(t).is_none() {
            errors.push(FieldError::new(
                "updateTypes",
                format!("'{t}' is not a supported update type"),
            ));
        }
    }

    if draft.preferred_channels.is_empty() {
        errors.push(FieldError::new(
            "preferredChannels",
            "at least one preferred channel is required",
        ));
    }
    for c in draft.preferred_channels {
        if !ALLOWED_PREFERRED_CHANNELS.contains(&c.as_str()) {
            errors.push(FieldError::new(
                "preferredChannels",
                format!("'{c}' is not a supported channel"),
            ));
        }
    }

    if draft.excluded_user_ids.iter().any(|id| id.trim().is_empty()) {
        errors.push(FieldError::new(
            "excludedUserIds",
            "excluded user ids must not be blank",
        ));
    }

    if draft.quiet_hours_enabled {
        for (field, value) in [
            ("quietHoursStart", draft.quiet_hours_start),
            ("quietHoursEnd", draft.quiet_hours_end),
        ] {
            match value.map(str::trim) {
                None | Some("") => errors.push(FieldError::new(
                    field,
                    "required when quiet hours are enabled",
                )),
                Some(v) if parse_hhmm(v).is_none() => {
                    errors.push(FieldError::new(field, "must be formatted as HH:MM"))
                }
                Some(_) => {}
            }
        }
    }

    if !(MIN_BATCH_INTERVAL_MINUTES..=MAX_BATCH_INTERVAL_MINUTES)
        .contains(&draft.batch_interval_minutes)
    {
        errors.push(FieldError::new(
            "batchIntervalMinutes",
            format!(
                "must be between {MIN_BATCH_INTERVAL_MINUTES} and {MAX_BATCH_INTERVAL_MINUTES}"
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CoreError::InvalidFields(errors))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 1, h, m, 0).unwrap()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn draft<'a>(update_types: &'a [String], channels: &'a [String]) -> PreferenceDraft<'a> {
        PreferenceDraft {
            resource: "shipment",
            notify_on_all_updates: false,
            update_types,
            excluded_user_ids: &[],
            preferred_channels: channels,
            quiet_hours_enabled: false,
            quiet_hours_start: None,
            quiet_hours_end: None,
            timezone: "UTC",
            batch_notifications: false,
            batch_interval_minutes: 15,
        }
    }

    fn field_names(err: CoreError) -> Vec<String> {
        match err {
            CoreError::InvalidFields(fields) => fields.into_iter().map(|f| f.field).collect(),
            other => panic!("expected InvalidFields, got {other:?}"),
        }
    }

    // -- quiet hours --

    #[test]
    fn overnight_window() {
        let tz = chrono_tz::UTC;
        assert!(is_in_quiet_hours(at(23, 30), tz, "22:00", "06:00"));
        assert!(!is_in_quiet_hours(at(8, 0), tz, "22:00", "06:00"));
        assert!(is_in_quiet_hours(at(3, 0), tz, "22:00", "06:00"));
        assert!(!is_in_quiet_hours(at(12, 0), tz, "22:00", "06:00"));
    }

    #[test]
    fn daytime_window() {
        let tz = chrono_tz::UTC;
        assert!(is_in_quiet_hours(at(12, 0), tz, "09:00", "17:00"));
        assert!(!is_in_quiet_hours(at(18, 0), tz, "09:00", "17:00"));
    }

    #[test]
    fn window_is_evaluated_in_preference_timezone() {
        // 06:30 UTC is 00:30 CST.
        let now = Utc.with_ymd_and_hms(2024, 12, 2, 6, 30, 0).unwrap();
        let chicago = parse_timezone("America/Chicago").unwrap();
        assert!(is_in_quiet_hours(now, chicago, "22:00", "06:00"));
        assert!(!is_in_quiet_hours(now, chrono_tz::UTC, "22:00", "06:00"));
    }

    #[test]
    fn empty_start_is_never_quiet() {
        let tz = parse_timezone("Not/AZone").unwrap_or(chrono_tz::UTC);
        assert!(!is_in_quiet_hours(at(23, 0), tz, "", "06:00"));
    }

    #[test]
    fn invalid_timezone_does_not_parse() {
        assert!(parse_timezone("Mars/Olympus_Mons").is_none());
        assert!(parse_timezone("Europe/Berlin").is_some());
    }

    // -- helpers --

    #[test]
    fn update_type_matching() {
        let types = strings(&["status_change"]);
        assert!(is_update_type_enabled(false, &types, UpdateType::StatusChange));
        assert!(!is_update_type_enabled(false, &types, UpdateType::PriceChange));
        assert!(is_update_type_enabled(true, &[], UpdateType::PriceChange));
        let any = strings(&["any"]);
        assert!(is_update_type_enabled(false, &any, UpdateType::DateChange));
    }

    #[test]
    fn excluded_actor_is_not_notified() {
        let excluded = strings(&["usr_a"]);
        assert!(!should_notify_user(&excluded, "usr_a"));
        assert!(should_notify_user(&excluded, "usr_b"));
    }

    // -- validation --

    #[test]
    fn valid_draft_passes() {
        let types = strings(&["status_change"]);
        let channels = strings(&["user"]);
        assert!(validate_preference(&draft(&types, &channels)).is_ok());
    }

    #[test]
    fn update_types_required_unless_all_updates() {
        let channels = strings(&["user"]);
        let mut d = draft(&[], &channels);
        assert_eq!(field_names(validate_preference(&d).unwrap_err()), ["updateTypes"]);
        d.notify_on_all_updates = true;
        assert!(validate_preference(&d).is_ok());
    }

    #[test]
    fn quiet_hours_need_both_bounds() {
        let types = strings(&["any"]);
        let channels = strings(&["user"]);
        let mut d = draft(&types, &channels);
        d.quiet_hours_enabled = true;
        d.quiet_hours_start = Some("22:00");
        d.quiet_hours_end = Some("");
        assert_eq!(field_names(validate_preference(&d).unwrap_err()), ["quietHoursEnd"]);
    }

    #[test]
    fn batch_interval_bounds() {
        let types = strings(&["any"]);
        let channels = strings(&["user"]);
        let mut d = draft(&types, &channels);
        d.batch_notifications = true;

        d.batch_interval_minutes = 0;
        assert!(validate_preference(&d).is_err());
        d.batch_interval_minutes = 1441;
        assert!(validate_preference(&d).is_err());
        d.batch_interval_minutes = 1440;
        assert!(validate_preference(&d).is_ok());
    }

    #[test]
    fn unknown_resource_and_channel_rejected() {
        let types = strings(&["any"]);
        let channels = strings(&["email"]);
        let mut d = draft(&types, &channels);
        d.resource = "invoice";
        assert_eq!(
            field_names(validate_preference(&d).unwrap_err()),
            ["resource", "preferredChannels"]
        );
    }
}
