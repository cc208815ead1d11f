//! Raw device events as handed to a collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{CustodyError, Result};

/// Event payload. Keys are kept sorted so construction order never matters.
pub type EventPayload = BTreeMap<String, Value>;

/// An event emitted by a device. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEvent {
    pub device_id: String,
    pub device_type: String,
    pub event_type: String,
    pub payload: EventPayload,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub generated_at: DateTime<Utc>,
}

impl RawEvent {
    pub fn new(
        device_id: impl Into<String>,
        device_type: impl Into<String>,
        event_type: impl Into<String>,
        payload: EventPayload,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_type: device_type.into(),
            event_type: event_type.into(),
            payload,
            generated_at,
        }
    }

    /// Build an event from raw byte fields, as read off a device link.
    pub fn from_utf8(
        device_id: &[u8],
        device_type: &[u8],
        event_type: &[u8],
        payload: EventPayload,
        generated_at: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self::new(
            utf8_field("device_id", device_id)?,
            utf8_field("device_type", device_type)?,
            utf8_field("event_type", event_type)?,
            payload,
            generated_at,
        ))
    }

    /// Field checks applied at canonicalization time.
    pub fn validate(&self) -> Result<()> {
        non_empty("device_id", &self.device_id)?;
        non_empty("device_type", &self.device_type)?;
        non_empty("event_type", &self.event_type)?;

        if self.generated_at.timestamp_micros() < 0 {
            return Err(CustodyError::validation(format!(
                "generated_at must not precede the Unix epoch: {}",
                self.generated_at
            )));
        }

        for key in self.payload.keys() {
            non_empty("payload key", key)?;
        }

        Ok(())
    }
}

fn utf8_field(name: &str, bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| CustodyError::validation(format!("{} is not valid UTF-8: {}", name, e)))
}

pub(crate) fn non_empty(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CustodyError::validation(format!("{} must not be empty", name)));
    }
    if value.chars().any(char::is_control) {
        return Err(CustodyError::validation(format!(
            "{} contains control characters",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_event() -> RawEvent {
        let mut payload = EventPayload::new();
        payload.insert("lane".to_string(), Value::from(2));
        RawEvent::new(
            "dev-001",
            "traffic",
            "vehicle_count",
            payload,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_valid_event_passes() {
        assert!(sample_event().validate().is_ok());
    }

    #[test]
    fn test_non_utf8_device_id_is_rejected() {
        let err = RawEvent::from_utf8(
            &[0xff, 0xfe, 0x41],
            b"cctv",
            b"motion_detected",
            EventPayload::new(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, CustodyError::ValidationError(_)));
    }

    #[test]
    fn test_negative_timestamp_is_rejected() {
        let mut event = sample_event();
        event.generated_at = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 59).unwrap();
        assert!(matches!(
            event.validate(),
            Err(CustodyError::ValidationError(_))
        ));
    }

    #[test]
    fn test_empty_fields_are_rejected() {
        let mut event = sample_event();
        event.event_type = "  ".to_string();
        assert!(event.validate().is_err());

        let mut event = sample_event();
        event.device_id = "dev\u{0}01".to_string();
        assert!(event.validate().is_err());
    }
}
