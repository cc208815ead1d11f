//! Chain-of-custody metadata.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::canonical::canonical_json;
use super::digest::{RecordDigest, DIGEST_LEN};
use super::event::non_empty;
use crate::error::{CustodyError, Result};

/// Custody fields bound to every evidence record.
///
/// `previous_record_digest` links record N to the digest of record N-1 from
/// the same collector; the first record carries [`RecordDigest::GENESIS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvidenceMetadata {
    pub sequence_number: u64,
    pub collector_id: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub collection_timestamp: DateTime<Utc>,
    pub previous_record_digest: RecordDigest,
}

/// Position of a record inside its collector's chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainPosition {
    pub collector_id: String,
    pub sequence_number: u64,
}

/// Validated constructor for [`EvidenceMetadata`].
///
/// Sequence numbers start at 1. The initial record takes no previous digest
/// (or the genesis sentinel); every later record must supply a full-width one.
pub fn build_metadata(
    collector_id: &str,
    sequence_number: i64,
    previous_digest: Option<&[u8]>,
    timestamp: DateTime<Utc>,
) -> Result<EvidenceMetadata> {
    non_empty("collector_id", collector_id)?;

    if sequence_number <= 0 {
        return Err(CustodyError::validation(format!(
            "sequence_number must be positive, got {}",
            sequence_number
        )));
    }

    if timestamp.timestamp_micros() < 0 {
        return Err(CustodyError::validation(format!(
            "collection_timestamp must not precede the Unix epoch: {}",
            timestamp
        )));
    }

    let previous_record_digest = match (sequence_number, previous_digest) {
        (1, None) => RecordDigest::GENESIS,
        (1, Some(bytes)) => match RecordDigest::from_slice(bytes) {
            Some(d) if d.is_genesis() => d,
            _ => {
                return Err(CustodyError::validation(
                    "initial record must link to the genesis sentinel",
                ))
            }
        },
        (_, None) => {
            return Err(CustodyError::validation(format!(
                "record {} requires a previous digest",
                sequence_number
            )))
        }
        (_, Some(bytes)) => RecordDigest::from_slice(bytes).ok_or_else(|| {
            CustodyError::validation(format!(
                "previous digest must be {} bytes, got {}",
                DIGEST_LEN,
                bytes.len()
            ))
        })?,
    };

    Ok(EvidenceMetadata {
        sequence_number: sequence_number as u64,
        collector_id: collector_id.to_string(),
        collection_timestamp: timestamp.trunc_subsecs(6),
        previous_record_digest,
    })
}

impl EvidenceMetadata {
    /// Canonical bytes; also the associated data of the sealed record.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let value = serde_json::to_value(self)
            .map_err(|e| CustodyError::validation(format!("metadata encoding failed: {}", e)))?;
        canonical_json(&value)
    }

    /// Check that these fields are exactly what `build_metadata` would
    /// produce for them. Hand-assembled metadata is refused, never coerced.
    pub fn validate(&self) -> Result<()> {
        let sequence_number = i64::try_from(self.sequence_number).map_err(|_| {
            CustodyError::validation(format!(
                "sequence_number out of range: {}",
                self.sequence_number
            ))
        })?;
        let rebuilt = build_metadata(
            &self.collector_id,
            sequence_number,
            Some(self.previous_record_digest.as_bytes()),
            self.collection_timestamp,
        )?;

        if rebuilt.collection_timestamp != self.collection_timestamp {
            return Err(CustodyError::validation(format!(
                "collection_timestamp has sub-microsecond precision: {}",
                self.collection_timestamp
            )));
        }
        Ok(())
    }

    /// Strict inverse of [`EvidenceMetadata::encode`].
    ///
    /// Bytes that parse but are not in canonical form are rejected, as are
    /// values that `build_metadata` would refuse.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let parsed: EvidenceMetadata = serde_json::from_slice(bytes)
            .map_err(|e| CustodyError::validation(format!("metadata is not decodable: {}", e)))?;
        parsed.validate()?;

        if parsed.encode()? != bytes {
            return Err(CustodyError::validation("metadata is not in canonical form"));
        }

        Ok(parsed)
    }

    pub fn position(&self) -> ChainPosition {
        ChainPosition {
            collector_id: self.collector_id.clone(),
            sequence_number: self.sequence_number,
        }
    }

    pub fn is_initial(&self) -> bool {
        self.sequence_number == 1
    }
}
