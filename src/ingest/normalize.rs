//! Converts raw uplinks into [`PartialReading`]s.

use crate::ingest::{IngestError, TopicKind};
use crate::state::{Channel, PartialReading};
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

pub const TIME_KEY_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Deserialize)]
struct Uplink {
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    object: HashMap<String, Value>,
}

fn channels_for(kind: TopicKind) -> &'static [Channel] {
    match kind {
        TopicKind::Climate => &[Channel::Temperature, Channel::Humidity, Channel::Co2],
        TopicKind::Tvoc => &[Channel::Tvoc],
        TopicKind::Ambient => &[Channel::AmbientTemp],
    }
}

/// Builds the partial reading carried by one uplink.
///
/// A payload that is not valid JSON or carries an unparseable timestamp is
/// rejected as a whole. Individual non-numeric fields are dropped and logged.
pub fn normalize(kind: TopicKind, payload: &[u8], tz: Tz) -> Result<PartialReading, IngestError> {
    let uplink: Uplink = serde_json::from_slice(payload)?;

    let time = match uplink.time.as_deref() {
        Some(raw) => Some(time_key(raw, tz)?),
        None => None,
    };

    let mut partial = PartialReading {
        time,
        ..PartialReading::default()
    };

    for channel in channels_for(kind) {
        let Some(value) = uplink.object.get(channel.as_str()) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        match value.as_f64() {
            Some(number) => partial.set(*channel, Some(round2(number))),
            None => {
                warn!(
                    channel = channel.as_str(),
                    value = %value,
                    "Dropping non-numeric sensor field"
                );
            }
        }
    }

    Ok(partial)
}

/// Converts a UTC source timestamp into the minute key in `tz`.
pub fn time_key(raw: &str, tz: Tz) -> Result<String, IngestError> {
    let utc = parse_utc(raw).ok_or_else(|| IngestError::Timestamp {
        raw: raw.to_string(),
        reason: "expected an ISO 8601 timestamp".to_string(),
    })?;
    Ok(utc.with_timezone(&tz).format(TIME_KEY_FORMAT).to_string())
}

fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Gateways occasionally drop the offset; the source clock is UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn parse_time_key(key: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(key, TIME_KEY_FORMAT).ok()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Berlin;

    #[test]
    fn climate_uplink_converts_time_and_rounds_values() -> Result<(), IngestError> {
        let payload = br#"{
            "time": "2024-05-06T08:15:42.918273+00:00",
            "object": {"temperature": 21.456, "humidity": 44.999, "co2": 812.0}
        }"#;

        let partial = normalize(TopicKind::Climate, payload, Berlin)?;

        assert_eq!(partial.time.as_deref(), Some("2024-05-06 10:15"));
        assert_eq!(partial.temperature, Some(21.46));
        assert_eq!(partial.humidity, Some(45.0));
        assert_eq!(partial.co2, Some(812.0));
        assert_eq!(partial.tvoc, None);
        Ok(())
    }

    #[test]
    fn winter_time_uses_standard_offset() -> Result<(), IngestError> {
        assert_eq!(time_key("2024-01-15T23:30:00.5Z", Berlin)?, "2024-01-16 00:30");
        Ok(())
    }

    #[test]
    fn naive_timestamp_is_treated_as_utc() -> Result<(), IngestError> {
        assert_eq!(time_key("2024-05-06T08:15:42.123", Berlin)?, "2024-05-06 10:15");
        Ok(())
    }

    #[test]
    fn tvoc_uplink_ignores_foreign_channels() -> Result<(), IngestError> {
        let payload = br#"{"object": {"tvoc": 123.456, "temperature": 30.0}}"#;

        let partial = normalize(TopicKind::Tvoc, payload, Berlin)?;

        assert_eq!(partial.time, None);
        assert_eq!(partial.tvoc, Some(123.46));
        assert_eq!(partial.temperature, None);
        Ok(())
    }

    #[test]
    fn non_numeric_field_is_dropped() -> Result<(), IngestError> {
        let payload = br#"{"object": {"ambient_temp": "warm"}}"#;

        let partial = normalize(TopicKind::Ambient, payload, Berlin)?;

        assert!(!partial.has_values());
        Ok(())
    }

    #[test]
    fn malformed_timestamp_rejects_event() {
        let payload = br#"{"time": "yesterday", "object": {"co2": 600.0}}"#;

        let result = normalize(TopicKind::Climate, payload, Berlin);

        assert!(matches!(result, Err(IngestError::Timestamp { .. })));
    }

    #[test]
    fn malformed_json_rejects_event() {
        let result = normalize(TopicKind::Climate, b"{not json", Berlin);

        assert!(matches!(result, Err(IngestError::Payload(_))));
    }

    #[test]
    fn time_key_round_trips_through_parser() -> Result<(), IngestError> {
        let key = time_key("2024-05-06T08:15:42Z", Berlin)?;
        let parsed = parse_time_key(&key).map(|t| t.format(TIME_KEY_FORMAT).to_string());
        assert_eq!(parsed, Some(key));
        Ok(())
    }
}
