//! Event records returned by the lookup API.
//!
//! The API hands back naive local dates and times plus an IANA timezone
//! name. `EventRecord` decodes one raw object and pins both ends of the
//! event to real instants.

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, Result};

const DATE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"];
const DISPLAY_FORMAT: &str = "%A, %b %d %Y %I:%M %p";

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    name: String,
    #[serde(default)]
    summary: Option<String>,
    url: String,
    timezone: String,
    start_date: String,
    start_time: String,
    end_date: String,
    end_time: String,
    #[serde(default)]
    image: Option<RawImage>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    #[serde(default)]
    url: Option<String>,
}

/// A decoded event with timezone-aware start and end.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub url: String,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub image_url: Option<String>,
}

impl EventRecord {
    /// Decode a raw API object.
    ///
    /// Fails for this event only when a field is missing, the timezone is
    /// unknown, or a date/time does not parse.
    pub fn from_value(value: &Value) -> Result<Self> {
        let id_hint = value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();

        let raw: RawEvent =
            serde_json::from_value(value.clone()).map_err(|e| AppError::event(&id_hint, e))?;

        let timezone: Tz = raw
            .timezone
            .parse()
            .map_err(|e| AppError::event(&raw.id, format!("timezone '{}': {e}", raw.timezone)))?;

        let start = localize(timezone, &raw.start_date, &raw.start_time)
            .map_err(|e| AppError::event(&raw.id, format!("start: {e}")))?;
        let end = localize(timezone, &raw.end_date, &raw.end_time)
            .map_err(|e| AppError::event(&raw.id, format!("end: {e}")))?;

        let image_url = raw
            .image
            .and_then(|image| image.url)
            .filter(|url| !url.trim().is_empty());

        Ok(Self {
            id: raw.id,
            name: raw.name,
            summary: raw.summary.unwrap_or_default(),
            url: raw.url,
            start,
            end,
            image_url,
        })
    }

    pub fn start_instant(&self) -> DateTime<Utc> {
        self.start.with_timezone(&Utc)
    }

    pub fn end_instant(&self) -> DateTime<Utc> {
        self.end.with_timezone(&Utc)
    }

    /// True when the event has not started yet at `now`.
    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.start_instant() > now
    }

    /// Local start and end rendered as "Day, Mon DD YYYY HH:MM AM/PM – ...".
    pub fn time_range(&self) -> String {
        format!(
            "{} – {}",
            self.start.format(DISPLAY_FORMAT),
            self.end.format(DISPLAY_FORMAT)
        )
    }
}

/// Pin a naive local date and time to an instant in `tz`.
///
/// Ambiguous wall-clock times (clocks falling back) resolve to the later,
/// standard-time instant. Times inside a spring-forward gap are shifted
/// forward by one hour.
pub fn localize(tz: Tz, date: &str, time: &str) -> std::result::Result<DateTime<Tz>, String> {
    let text = format!("{} {}", date.trim(), time.trim());
    let naive = DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&text, format).ok())
        .ok_or_else(|| format!("unparseable date/time '{text}'"))?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt),
        LocalResult::Ambiguous(_, later) => Ok(later),
        LocalResult::None => tz
            .from_local_datetime(&(naive + TimeDelta::hours(1)))
            .earliest()
            .ok_or_else(|| format!("'{text}' does not exist in {tz}")),
    }
}
