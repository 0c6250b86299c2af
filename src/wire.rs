//! JSON views for request handlers. Instants travel as RFC 3339 with an
//! explicit offset, dates as `YYYY-MM-DD`, operating hours as `HH:MM:SS`.

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::model::*;
use crate::oracle::{Availability, Unavailable};
use crate::recurrence::{Recurrence, RecurrenceKind};

const DATE_FORMAT: &str = "%Y-%m-%d";
const HOURS_FORMAT: &str = "%H:%M:%S";
const END_OF_DAY: &str = "24:00:00";

/// Parse an RFC 3339 timestamp. A missing offset is rejected rather than
/// guessed.
pub fn parse_instant(s: &str) -> Result<Ms> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| Error::invalid(format!("invalid timestamp {s:?}: {e}")))
}

pub fn format_instant(ms: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        None => ms.to_string(),
    }
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|e| Error::invalid(format!("invalid date {s:?}: {e}")))
}

/// Seconds after midnight. `24:00:00` is accepted as a closing time.
pub fn parse_hours(s: &str) -> Result<u32> {
    let s = s.trim();
    if s == END_OF_DAY {
        return Ok(86_400);
    }
    NaiveTime::parse_from_str(s, HOURS_FORMAT)
        .map(|t| t.num_seconds_from_midnight())
        .map_err(|e| Error::invalid(format!("invalid time of day {s:?}: {e}")))
}

pub fn format_hours(secs: u32) -> String {
    match NaiveTime::from_num_seconds_from_midnight_opt(secs, 0) {
        Some(t) => t.format(HOURS_FORMAT).to_string(),
        None => END_OF_DAY.to_string(),
    }
}

/// Body of a create or update reservation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    /// Client-chosen id for idempotent retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Ulid>,
    #[serde(rename = "room_id")]
    pub resource_id: Ulid,
    #[serde(default, alias = "contact_id", skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<Ulid>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub recurring_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_end_date: Option<String>,
}

impl ReservationRequest {
    pub fn into_draft(self) -> Result<ReservationDraft> {
        let start = parse_instant(&self.start_time)?;
        let end = parse_instant(&self.end_time)?;
        let span = Span::try_new(start, end)
            .ok_or_else(|| Error::invalid("end time must be after start time"))?;
        let kind: RecurrenceKind = self.recurring_type.trim().parse()?;
        let until = self
            .recurring_end_date
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(parse_date)
            .transpose()?;

        Ok(ReservationDraft {
            id: self.id,
            resource_id: self.resource_id,
            subject_id: self.subject_id,
            title: self.title,
            description: self.description.filter(|d| !d.is_empty()),
            span,
            recurrence: Recurrence::new(kind, until),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationView {
    pub id: Ulid,
    #[serde(rename = "room_id")]
    pub resource_id: Ulid,
    #[serde(rename = "user_id")]
    pub owner_id: Ulid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<Ulid>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub recurring_type: RecurrenceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_end_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Reservation> for ReservationView {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            resource_id: r.resource_id,
            owner_id: r.owner_id,
            subject_id: r.subject_id,
            title: r.title.clone(),
            description: r.description.clone(),
            start_time: format_instant(r.span.start),
            end_time: format_instant(r.span.end),
            recurring_type: r.recurrence.kind,
            recurring_end_date: r
                .recurrence
                .until
                .map(|d| d.format(DATE_FORMAT).to_string()),
            created_at: format_instant(r.created_at),
            updated_at: format_instant(r.updated_at),
        }
    }
}

/// Body of a create or update room request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub name: String,
    pub capacity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_end: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub is_available: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl ResourceRequest {
    pub fn into_spec(self) -> Result<ResourceSpec> {
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        let hours = match (
            non_empty(self.availability_start),
            non_empty(self.availability_end),
        ) {
            (None, None) => None,
            (Some(open), Some(close)) => Some(
                OperatingHours::new(parse_hours(&open)?, parse_hours(&close)?).ok_or_else(|| {
                    Error::invalid("availability_start must be before availability_end")
                })?,
            ),
            _ => {
                return Err(Error::invalid(
                    "availability_start and availability_end go together",
                ));
            }
        };
        Ok(ResourceSpec {
            name: self.name.trim().to_string(),
            capacity: self.capacity,
            hours,
            enabled: self.is_available,
            location: non_empty(self.location),
            description: non_empty(self.description),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceView {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_end: Option<String>,
    pub is_available: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Resource> for ResourceView {
    fn from(r: &Resource) -> Self {
        Self {
            id: r.id,
            name: r.name.clone(),
            capacity: r.capacity,
            location: r.location.clone(),
            description: r.description.clone(),
            availability_start: r.hours.map(|h| format_hours(h.open)),
            availability_end: r.hours.map(|h| format_hours(h.close)),
            is_available: r.enabled,
            created_at: format_instant(r.created_at),
            updated_at: format_instant(r.updated_at),
        }
    }
}

/// Answer to a check-availability request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityView {
    pub room_id: Ulid,
    pub start_time: String,
    pub end_time: String,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Ulid>,
}

impl AvailabilityView {
    pub fn new(resource_id: Ulid, span: Span, availability: &Availability) -> Self {
        let (reason, conflicts) = match availability {
            Availability::Available => (None, Vec::new()),
            Availability::Unavailable(why @ Unavailable::Conflict(ids)) => {
                (Some(why.to_string()), ids.clone())
            }
            Availability::Unavailable(why) => (Some(why.to_string()), Vec::new()),
        };
        Self {
            room_id: resource_id,
            start_time: format_instant(span.start),
            end_time: format_instant(span.end),
            available: availability.is_available(),
            reason,
            conflicts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instants_need_an_offset() {
        assert_eq!(
            parse_instant("2024-01-01T10:00:00Z").unwrap(),
            1_704_103_200_000
        );
        assert_eq!(
            parse_instant("2024-01-01T12:00:00+02:00").unwrap(),
            1_704_103_200_000
        );
        assert!(parse_instant("2024-01-01T10:00:00").is_err());
        assert!(parse_instant("yesterday").is_err());
    }

    #[test]
    fn instants_format_in_utc() {
        assert_eq!(format_instant(1_704_103_200_000), "2024-01-01T10:00:00Z");
        assert_eq!(format_instant(1_704_103_200_500), "2024-01-01T10:00:00.500Z");
    }

    #[test]
    fn hours_parse_and_format() {
        assert_eq!(parse_hours("08:00:00").unwrap(), 8 * 3600);
        assert_eq!(parse_hours("24:00:00").unwrap(), 86_400);
        assert!(parse_hours("8am").is_err());
        assert_eq!(format_hours(21 * 3600), "21:00:00");
        assert_eq!(format_hours(86_400), "24:00:00");
    }

    #[test]
    fn request_converts_to_draft() {
        let json = r#"{
            "room_id": "01HQZX3Y7W0000000000000000",
            "contact_id": "01HQZX3Y7W0000000000000001",
            "title": "Bible study",
            "start_time": "2024-03-05T18:00:00Z",
            "end_time": "2024-03-05T19:30:00Z",
            "recurring_type": "weekly",
            "recurring_end_date": "2024-05-28"
        }"#;
        let request: ReservationRequest = serde_json::from_str(json).unwrap();
        let draft = request.into_draft().unwrap();
        assert_eq!(draft.title, "Bible study");
        assert!(draft.subject_id.is_some());
        assert_eq!(draft.span.duration_ms(), 90 * 60_000);
        assert_eq!(
            draft.recurrence,
            Recurrence::weekly(Some(NaiveDate::from_ymd_opt(2024, 5, 28).unwrap()))
        );
    }

    #[test]
    fn request_defaults_to_single_booking() {
        let json = r#"{
            "room_id": "01HQZX3Y7W0000000000000000",
            "title": "Choir",
            "start_time": "2024-03-05T18:00:00Z",
            "end_time": "2024-03-05T19:00:00Z",
            "recurring_end_date": "2024-05-28"
        }"#;
        let draft = serde_json::from_str::<ReservationRequest>(json)
            .unwrap()
            .into_draft()
            .unwrap();
        assert_eq!(draft.recurrence, Recurrence::NONE);
    }

    #[test]
    fn request_rejects_bad_fields() {
        let base = ReservationRequest {
            id: None,
            resource_id: Ulid::new(),
            subject_id: None,
            title: "x".into(),
            description: None,
            start_time: "2024-03-05T19:00:00Z".into(),
            end_time: "2024-03-05T18:00:00Z".into(),
            recurring_type: String::new(),
            recurring_end_date: None,
        };
        assert!(base.clone().into_draft().is_err());

        let unknown_kind = ReservationRequest {
            end_time: "2024-03-05T20:00:00Z".into(),
            recurring_type: "yearly".into(),
            ..base
        };
        assert!(matches!(
            unknown_kind.into_draft(),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn resource_request_hours_go_together() {
        let request = ResourceRequest {
            name: " Youth Room ".into(),
            capacity: 50,
            location: Some("West Wing".into()),
            description: Some(String::new()),
            availability_start: Some("08:00:00".into()),
            availability_end: Some("22:00:00".into()),
            is_available: true,
        };
        let spec = request.clone().into_spec().unwrap();
        assert_eq!(spec.name, "Youth Room");
        assert_eq!(spec.hours, OperatingHours::new(8 * 3600, 22 * 3600));
        assert_eq!(spec.description, None);

        let half = ResourceRequest {
            availability_end: None,
            ..request
        };
        assert!(half.into_spec().is_err());
    }

    #[test]
    fn views_serialize_handler_field_names() {
        let resource = Resource {
            id: Ulid::new(),
            name: "Kitchen".into(),
            capacity: 10,
            hours: OperatingHours::new(8 * 3600, 21 * 3600),
            enabled: true,
            location: Some("Near Fellowship Hall".into()),
            description: None,
            created_at: 0,
            updated_at: 0,
        };
        let json = serde_json::to_value(ResourceView::from(&resource)).unwrap();
        assert_eq!(json["availability_start"], "08:00:00");
        assert_eq!(json["availability_end"], "21:00:00");
        assert_eq!(json["is_available"], true);
        assert_eq!(json["created_at"], "1970-01-01T00:00:00Z");
        assert!(json.get("description").is_none());

        let view = AvailabilityView::new(
            resource.id,
            Span::new(0, 3_600_000),
            &Availability::Unavailable(Unavailable::Disabled),
        );
        let json = serde_json::to_value(view).unwrap();
        assert_eq!(json["available"], false);
        assert_eq!(json["reason"], "resource is disabled");
        assert!(json.get("conflicts").is_none());
    }
}
