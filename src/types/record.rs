//! Weather observation records and the streams they travel on.
//!
//! A record is a JSON object mapping field names to nullable scalars. The
//! only field the engine itself interprets is `dateTime`; everything else
//! (temperatures, wind, pressure, whatever the station produces) passes
//! through opaquely to the remote endpoint.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use super::Timestamp;

/// Errors constructing a [`Record`] from raw fields.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// The record has no `dateTime` field.
    #[error("record is missing its dateTime field")]
    MissingDateTime,

    /// The `dateTime` field is not an integer.
    #[error("record dateTime is not an integer: {0}")]
    InvalidDateTime(String),
}

/// Which delivery pipeline a record belongs to.
///
/// Archive records are periodic aggregates and must never be silently
/// lost; raw records are high-rate instantaneous samples and tolerate
/// drops. The two streams have independent queues, workers, and retry
/// policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Archive,
    Raw,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Archive => f.write_str("archive"),
            Stream::Raw => f.write_str("raw"),
        }
    }
}

/// An immutable weather observation keyed by its `dateTime` timestamp.
///
/// Construction validates that `dateTime` exists and is an integer, so a
/// `Record` in hand always has a usable [`timestamp`](Record::timestamp).
/// Field order is preserved as given by serde_json's object map.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Map<String, Value>,
    timestamp: Timestamp,
}

impl Record {
    /// Builds a record from raw JSON object fields, validating `dateTime`.
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self, RecordError> {
        let value = fields.get("dateTime").ok_or(RecordError::MissingDateTime)?;
        let secs = value
            .as_i64()
            .ok_or_else(|| RecordError::InvalidDateTime(value.to_string()))?;
        Ok(Record {
            fields,
            timestamp: Timestamp(secs),
        })
    }

    /// The record's `dateTime`, unique within its stream.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// All fields, including `dateTime`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Looks up a single field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = Map::deserialize(deserializer)?;
        Record::from_fields(fields).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields_of(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn record_requires_date_time() {
        let result = Record::from_fields(fields_of(json!({"outTemp": 21.4})));
        assert_eq!(result.unwrap_err(), RecordError::MissingDateTime);
    }

    #[test]
    fn record_rejects_non_integer_date_time() {
        let result = Record::from_fields(fields_of(json!({"dateTime": "soon"})));
        assert!(matches!(result, Err(RecordError::InvalidDateTime(_))));
    }

    #[test]
    fn record_exposes_timestamp_and_fields() {
        let record = Record::from_fields(fields_of(json!({
            "dateTime": 1700000000,
            "outTemp": 21.4,
            "windDir": null,
        })))
        .unwrap();

        assert_eq!(record.timestamp(), Timestamp(1700000000));
        assert_eq!(record.get("outTemp"), Some(&json!(21.4)));
        assert_eq!(record.get("windDir"), Some(&Value::Null));
    }

    #[test]
    fn record_serializes_as_plain_object() {
        let record = Record::from_fields(fields_of(json!({
            "dateTime": 50,
            "barometer": 1013.2,
        })))
        .unwrap();

        let rendered = serde_json::to_value(&record).unwrap();
        assert_eq!(rendered, json!({"dateTime": 50, "barometer": 1013.2}));
    }

    #[test]
    fn record_round_trips_through_deserialize() {
        let record: Record = serde_json::from_value(json!({
            "dateTime": 60,
            "outHumidity": 40,
        }))
        .unwrap();
        assert_eq!(record.timestamp(), Timestamp(60));

        let bad: Result<Record, _> = serde_json::from_value(json!({"outHumidity": 40}));
        assert!(bad.is_err());
    }
}
