use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct College {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitter {
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// A single event listing. Timestamps are kept exactly as supplied and only
/// interpreted when filtering or sorting, so malformed values survive a
/// round trip through the catalog untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub college: Option<College>,
    #[serde(default)]
    pub submitting_user: Option<Submitter>,
    #[serde(default)]
    pub approved: bool,
}

impl EventRecord {
    pub fn starts_at(&self) -> Option<NaiveDateTime> {
        self.start_time.as_deref().and_then(parse_timestamp)
    }

    pub fn organizer(&self) -> &str {
        self.college.as_ref().map(|c| c.name.as_str()).unwrap_or("")
    }

    pub fn has_category_named(&self, name: &str) -> bool {
        self.categories
            .iter()
            .any(|c| c.name.to_lowercase() == name.to_lowercase())
    }
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parses an event timestamp into local wall-clock time.
///
/// Offset-carrying RFC 3339 values are converted to the local zone; naive
/// values are assumed to already be local. A bare date means midnight.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// Parses a calendar day, accepting a full timestamp and truncating it.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    parse_timestamp(raw).map(|dt| dt.date())
}

/// Parses the clock time entered on the submission form, either 24-hour
/// (`14:30`) or 12-hour (`02:30 PM`).
pub fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    ["%H:%M:%S", "%H:%M", "%I:%M %p", "%I:%M%p"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(raw, format).ok())
}
