use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::calendar::{add_days, days_count, midnight};

const RECORD_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Domain identifier as supplied by the data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventId {
    Number(i64),
    Text(String),
}

impl EventId {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_i64().map(Self::Number),
            Value::String(text) if !text.trim().is_empty() => Some(Self::Text(text.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(number) => Value::from(*number),
            Self::Text(text) => Value::from(text.clone()),
        }
    }

    /// Loose comparison used by command-line lookups.
    pub fn matches(&self, raw: &str) -> bool {
        match self {
            Self::Number(number) => raw.trim().parse::<i64>().ok() == Some(*number),
            Self::Text(text) => text == raw.trim(),
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => write!(f, "{text}"),
        }
    }
}

/// Names of the source fields that feed each canonical event property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct FieldMapping {
    pub id: String,
    pub subject: String,
    pub start_time: String,
    pub end_time: String,
    pub is_all_day: String,
    pub location: String,
    pub description: String,
    pub is_readonly: String,
    pub is_block: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            subject: "subject".to_string(),
            start_time: "startTime".to_string(),
            end_time: "endTime".to_string(),
            is_all_day: "isAllDay".to_string(),
            location: "location".to_string(),
            description: "description".to_string(),
            is_readonly: "isReadonly".to_string(),
            is_block: "isBlock".to_string(),
        }
    }
}

impl FieldMapping {
    fn mapped_names(&self) -> [&str; 9] {
        [
            self.id.as_str(),
            self.subject.as_str(),
            self.start_time.as_str(),
            self.end_time.as_str(),
            self.is_all_day.as_str(),
            self.location.as_str(),
            self.description.as_str(),
            self.is_readonly.as_str(),
            self.is_block.as_str(),
        ]
    }

    fn is_mapped(&self, key: &str) -> bool {
        self.mapped_names().contains(&key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Tracking token assigned once per creation or import.
    pub guid: Uuid,

    pub id: Option<EventId>,

    pub subject: String,

    pub start: NaiveDateTime,

    pub end: NaiveDateTime,

    pub is_all_day: bool,

    pub location: Option<String>,

    pub description: Option<String>,

    pub is_readonly: bool,

    pub is_block: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Event {
    pub fn new(subject: impl Into<String>, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            guid: Uuid::new_v4(),
            id: None,
            subject: subject.into(),
            start,
            end,
            is_all_day: false,
            location: None,
            description: None,
            is_readonly: false,
            is_block: false,
            extra: BTreeMap::new(),
        }
    }

    pub fn all_day(subject: impl Into<String>, first: NaiveDate, last: NaiveDate) -> Self {
        let mut event = Self::new(subject, midnight(first), midnight(last));
        event.is_all_day = true;
        event
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn blocking(mut self) -> Self {
        self.is_block = true;
        self
    }

    /// Builds an event from a raw record. Mapped fields missing from the
    /// record are left unset; a record without a usable start or end
    /// cannot be placed and yields `None`.
    pub fn from_record(
        record: &Map<String, Value>,
        mapping: &FieldMapping,
        tz: &Tz,
    ) -> Option<Self> {
        let start = record
            .get(&mapping.start_time)
            .and_then(|value| parse_timestamp(value, tz));
        let end = record
            .get(&mapping.end_time)
            .and_then(|value| parse_timestamp(value, tz));
        let (Some(start), Some(end)) = (start, end) else {
            warn!(
                start_field = %mapping.start_time,
                end_field = %mapping.end_time,
                "record lacks a valid start or end; skipping"
            );
            return None;
        };

        let extra = record
            .iter()
            .filter(|(key, _)| !mapping.is_mapped(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Some(Self {
            guid: Uuid::new_v4(),
            id: record.get(&mapping.id).and_then(EventId::from_value),
            subject: record
                .get(&mapping.subject)
                .and_then(value_as_text)
                .unwrap_or_default(),
            start,
            end,
            is_all_day: record
                .get(&mapping.is_all_day)
                .map(value_as_bool)
                .unwrap_or(false),
            location: record.get(&mapping.location).and_then(value_as_text),
            description: record.get(&mapping.description).and_then(value_as_text),
            is_readonly: record
                .get(&mapping.is_readonly)
                .map(value_as_bool)
                .unwrap_or(false),
            is_block: record
                .get(&mapping.is_block)
                .map(value_as_bool)
                .unwrap_or(false),
            extra,
        })
    }

    /// Inverse of [`Event::from_record`]; the tracking token stays internal.
    pub fn to_record(&self, mapping: &FieldMapping) -> Map<String, Value> {
        let mut record: Map<String, Value> = self
            .extra
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if let Some(id) = &self.id {
            record.insert(mapping.id.clone(), id.to_value());
        }
        record.insert(mapping.subject.clone(), Value::from(self.subject.clone()));
        record.insert(
            mapping.start_time.clone(),
            Value::from(self.start.format(RECORD_DATETIME_FORMAT).to_string()),
        );
        record.insert(
            mapping.end_time.clone(),
            Value::from(self.end.format(RECORD_DATETIME_FORMAT).to_string()),
        );
        record.insert(mapping.is_all_day.clone(), Value::from(self.is_all_day));
        if let Some(location) = &self.location {
            record.insert(mapping.location.clone(), Value::from(location.clone()));
        }
        if let Some(description) = &self.description {
            record.insert(mapping.description.clone(), Value::from(description.clone()));
        }
        record.insert(mapping.is_readonly.clone(), Value::from(self.is_readonly));
        record.insert(mapping.is_block.clone(), Value::from(self.is_block));
        record
    }

    pub fn duration(&self) -> Duration {
        let (start, end) = self.effective_range();
        end - start
    }

    /// Time range the event occupies on the grid. All-day events cover
    /// whole days through their end date; inverted ranges collapse to
    /// their start.
    pub fn effective_range(&self) -> (NaiveDateTime, NaiveDateTime) {
        if self.is_all_day {
            let first = midnight(self.start.date());
            let last = self.end.date().max(self.start.date());
            return (first, midnight(add_days(last, 1)));
        }
        (self.start, self.end.max(self.start))
    }

    /// Last calendar day the event touches.
    pub fn last_day(&self) -> NaiveDate {
        add_days(self.start.date(), self.days_count() - 1)
    }

    /// Calendar days the event touches; inverted ranges count as one.
    pub fn days_count(&self) -> i64 {
        days_count(self.start, self.end.max(self.start), self.is_all_day)
    }

    pub fn spans_multiple_days(&self) -> bool {
        self.last_day() > self.start.date()
    }

    /// Whether any part of the event falls inside `[from, to)`.
    pub fn intersects(&self, from: NaiveDateTime, to: NaiveDateTime) -> bool {
        let (start, end) = self.effective_range();
        if start == end {
            return start >= from && start < to;
        }
        start < to && end > from
    }
}

/// Maps raw source records into events, assigning fresh tracking tokens.
pub fn map_records(records: &[Value], mapping: &FieldMapping, tz: &Tz) -> Vec<Event> {
    partition_records(records, mapping, tz)
        .placed
        .into_iter()
        .map(|(event, _)| event)
        .collect()
}

/// Source records split by whether they can be placed on the grid.
#[derive(Debug, Clone, Default)]
pub struct PartitionedRecords {
    /// Mapped events with the record each came from.
    pub placed: Vec<(Event, Value)>,
    /// Records without a usable start or end, untouched.
    pub unplaced: Vec<Value>,
}

#[tracing::instrument(skip(records, mapping, tz), fields(count = records.len()))]
pub fn partition_records(records: &[Value], mapping: &FieldMapping, tz: &Tz) -> PartitionedRecords {
    let mut partitioned = PartitionedRecords::default();
    for record in records {
        let event = match record.as_object() {
            Some(object) => Event::from_record(object, mapping, tz),
            None => {
                warn!("event record is not an object; skipping");
                None
            }
        };
        match event {
            Some(event) => partitioned.placed.push((event, record.clone())),
            None => partitioned.unplaced.push(record.clone()),
        }
    }
    debug!(
        mapped = partitioned.placed.len(),
        unplaced = partitioned.unplaced.len(),
        "mapped event records"
    );
    partitioned
}

/// Coerces a raw value into a wall-clock timestamp in `tz`. Returns `None`
/// for anything that is not a recognizable date.
pub fn parse_timestamp(value: &Value, tz: &Tz) -> Option<NaiveDateTime> {
    match value {
        Value::String(raw) => parse_timestamp_str(raw, tz),
        Value::Number(number) => {
            let millis = number.as_i64()?;
            DateTime::from_timestamp_millis(millis).map(|utc| utc.with_timezone(tz).naive_local())
        }
        _ => None,
    }
}

fn parse_timestamp_str(raw: &str, tz: &Tz) -> Option<NaiveDateTime> {
    let token = raw.trim();
    if token.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(token) {
        return Some(dt.with_timezone(tz).naive_local());
    }

    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(token, fmt) {
            return Some(ndt);
        }
    }

    NaiveDate::parse_from_str(token, "%Y-%m-%d").ok().map(midnight)
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn value_as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "1" | "y" | "yes" | "on" | "true"
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .expect("valid date")
            .and_hms_opt(h, min, 0)
            .expect("valid time")
    }

    #[test]
    fn maps_custom_field_names_and_keeps_extras() {
        let mapping = FieldMapping {
            subject: "Title".to_string(),
            start_time: "From".to_string(),
            end_time: "To".to_string(),
            ..FieldMapping::default()
        };
        let records = vec![json!({
            "id": 7,
            "Title": "Standup",
            "From": "2026-02-16T09:00:00",
            "To": "2026-02-16T09:15:00",
            "RoomId": 3,
            "isBlock": "yes"
        })];

        let events = map_records(&records, &mapping, &chrono_tz::UTC);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.id, Some(EventId::Number(7)));
        assert_eq!(event.subject, "Standup");
        assert_eq!(event.start, at(2026, 2, 16, 9, 0));
        assert!(event.is_block);
        assert!(event.location.is_none());
        assert_eq!(event.extra.get("RoomId"), Some(&json!(3)));

        let record = event.to_record(&mapping);
        assert_eq!(record.get("Title"), Some(&json!("Standup")));
        assert_eq!(record.get("RoomId"), Some(&json!(3)));
        assert_eq!(record.get("From"), Some(&json!("2026-02-16T09:00:00")));
    }

    #[test]
    fn skips_records_without_dates() {
        let records = vec![
            json!({ "subject": "no dates" }),
            json!({ "startTime": "garbage", "endTime": "2026-02-16" }),
            json!("not an object"),
        ];
        let events = map_records(&records, &FieldMapping::default(), &chrono_tz::UTC);
        assert!(events.is_empty());
    }

    #[test]
    fn tracking_tokens_are_unique_per_import() {
        let record = json!({
            "id": 1,
            "startTime": "2026-02-16T09:00",
            "endTime": "2026-02-16T10:00"
        });
        let events = map_records(
            &[record.clone(), record],
            &FieldMapping::default(),
            &chrono_tz::UTC,
        );
        assert_eq!(events.len(), 2);
        assert_ne!(events[0].guid, events[1].guid);
        assert_eq!(events[0].id, events[1].id);
    }

    #[test]
    fn parses_epoch_millis_and_offsets_into_zone() {
        let tz: Tz = "America/Mexico_City".parse().expect("valid tz");
        let from_millis = parse_timestamp(&json!(1_771_254_000_000_i64), &tz);
        // 2026-02-16T15:00:00Z is 09:00 in Mexico City.
        assert_eq!(from_millis, Some(at(2026, 2, 16, 9, 0)));
        let from_rfc = parse_timestamp(&json!("2026-02-16T15:00:00Z"), &tz);
        assert_eq!(from_rfc, Some(at(2026, 2, 16, 9, 0)));
        assert_eq!(parse_timestamp(&json!(true), &tz), None);
    }

    #[test]
    fn midnight_end_does_not_claim_next_day() {
        let event = Event::new("late", at(2026, 2, 16, 22, 0), at(2026, 2, 17, 0, 0));
        assert_eq!(event.last_day(), event.start.date());
        assert!(!event.spans_multiple_days());

        let all_day = Event::all_day(
            "offsite",
            at(2026, 2, 16, 0, 0).date(),
            at(2026, 2, 18, 0, 0).date(),
        );
        assert_eq!(all_day.effective_range().1, at(2026, 2, 19, 0, 0));
        assert!(all_day.spans_multiple_days());
    }
}
