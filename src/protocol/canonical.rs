//! Deterministic byte encoding of evidence.
//!
//! Objects are written with keys in byte-lexicographic order, no insignificant
//! whitespace, integers in plain decimal and timestamps as integer
//! microseconds. Logically equal inputs always produce identical bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::RawEvent;
use super::metadata::EvidenceMetadata;
use crate::error::{CustodyError, Result};

/// Schema tag embedded in every canonical record.
pub const CANONICAL_SCHEMA: &str = "custody-chain/v1";

/// Transient pairing of an event with its custody fields. Only its digest
/// and its sealed form are ever persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanonicalRecord {
    pub schema: String,
    pub event: RawEvent,
    pub custody: EvidenceMetadata,
}

/// Canonical bytes of `event` under `metadata`.
pub fn canonicalize(event: &RawEvent, metadata: &EvidenceMetadata) -> Result<Vec<u8>> {
    event.validate()?;
    metadata.validate()?;

    let record = CanonicalRecord {
        schema: CANONICAL_SCHEMA.to_string(),
        event: event.clone(),
        custody: metadata.clone(),
    };
    let value = serde_json::to_value(&record)
        .map_err(|e| CustodyError::validation(format!("event is not encodable: {}", e)))?;

    canonical_json(&value)
}

/// Parse canonical bytes back into a record, refusing anything that would
/// not re-encode to exactly the same bytes.
pub fn decode_canonical(bytes: &[u8]) -> Result<CanonicalRecord> {
    let record: CanonicalRecord = serde_json::from_slice(bytes)
        .map_err(|e| CustodyError::validation(format!("canonical record is not decodable: {}", e)))?;

    if record.schema != CANONICAL_SCHEMA {
        return Err(CustodyError::validation(format!(
            "unknown canonical schema: {}",
            record.schema
        )));
    }

    if canonicalize(&record.event, &record.custody)? != bytes {
        return Err(CustodyError::validation("record is not in canonical form"));
    }

    Ok(record)
}

/// Serialize a JSON value with sorted object keys and no whitespace.
pub fn canonical_json(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(&Value::String(key.clone()), out)?;
                out.push(b':');
                write_value(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        scalar => write_scalar(scalar, out)?,
    }
    Ok(())
}

fn write_scalar(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    serde_json::to_writer(&mut *out, value)
        .map_err(|e| CustodyError::validation(format!("value is not encodable: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::event::EventPayload;
    use crate::protocol::metadata::build_metadata;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn metadata() -> EvidenceMetadata {
        build_metadata(
            "collector-01",
            1,
            None,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 5).unwrap(),
        )
        .unwrap()
    }

    fn event_with(payload: EventPayload) -> RawEvent {
        RawEvent::new(
            "dev-003",
            "pollution",
            "pm2_5_reading",
            payload,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_construction_order_does_not_matter() {
        let mut first = EventPayload::new();
        first.insert("pm2_5".to_string(), json!(88.12));
        first.insert("co".to_string(), json!(4.5));
        first.insert("probe".to_string(), json!({"z": 1, "a": [3, 2, 1]}));

        let mut second = EventPayload::new();
        second.insert("probe".to_string(), json!({"a": [3, 2, 1], "z": 1}));
        second.insert("co".to_string(), json!(4.5));
        second.insert("pm2_5".to_string(), json!(88.12));

        let a = canonicalize(&event_with(first), &metadata()).unwrap();
        let b = canonicalize(&event_with(second), &metadata()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_nested_keys_are_sorted() {
        let bytes = canonical_json(&json!({"b": {"y": 1, "x": 2}, "a": null})).unwrap();
        assert_eq!(bytes, br#"{"a":null,"b":{"x":2,"y":1}}"#.to_vec());
    }

    #[test]
    fn test_strings_are_escaped() {
        let bytes = canonical_json(&json!({"k": "quote\" and \\ slash"})).unwrap();
        assert_eq!(bytes, br#"{"k":"quote\" and \\ slash"}"#.to_vec());
    }

    #[test]
    fn test_payload_changes_change_bytes() {
        let mut payload = EventPayload::new();
        payload.insert("co".to_string(), json!(4.5));
        let a = canonicalize(&event_with(payload.clone()), &metadata()).unwrap();

        payload.insert("co".to_string(), json!(4.6));
        let b = canonicalize(&event_with(payload), &metadata()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decode_round_trips_record() {
        let mut payload = EventPayload::new();
        payload.insert("status".to_string(), json!("ok"));
        let event = event_with(payload);
        let bytes = canonicalize(&event, &metadata()).unwrap();

        let record = decode_canonical(&bytes).unwrap();
        assert_eq!(record.event, event);
        assert_eq!(record.custody, metadata());
        assert_eq!(record.schema, CANONICAL_SCHEMA);
    }

    #[test]
    fn test_invalid_event_fails_canonicalization() {
        let mut event = event_with(EventPayload::new());
        event.device_id.clear();
        assert!(matches!(
            canonicalize(&event, &metadata()),
            Err(CustodyError::ValidationError(_))
        ));
    }

    #[test]
    fn test_invalid_metadata_fails_canonicalization() {
        let mut payload = EventPayload::new();
        payload.insert("status".to_string(), json!("ok"));
        let custody = EvidenceMetadata {
            sequence_number: 0,
            collection_timestamp: Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap(),
            ..metadata()
        };
        assert!(matches!(
            canonicalize(&event_with(payload), &custody),
            Err(CustodyError::ValidationError(_))
        ));
    }
}
