//! Per-record verification outcomes and their aggregate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerificationStatus {
    Ok,
    Fail,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Ok => "OK",
            VerificationStatus::Fail => "FAIL",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tamper classification of a failed record.
///
/// These are expected outputs of a sweep, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Nonce, tag, ciphertext or bound metadata no longer authenticate.
    DecryptionFailed,
    /// Decrypted plaintext does not hash to the stored digest.
    HashMismatch,
    /// No key for the stored collector, or the stored key id is not its key.
    KeyMissing,
    MalformedMetadata,
    ChainBroken,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::DecryptionFailed => "decryption_failed",
            FailureReason::HashMismatch => "hash_mismatch",
            FailureReason::KeyMissing => "key_missing",
            FailureReason::MalformedMetadata => "malformed_metadata",
            FailureReason::ChainBroken => "chain_broken",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub record_id: i64,
    pub status: VerificationStatus,
    pub reason: Option<FailureReason>,
}

impl VerificationResult {
    pub fn ok(record_id: i64) -> Self {
        Self {
            record_id,
            status: VerificationStatus::Ok,
            reason: None,
        }
    }

    pub fn fail(record_id: i64, reason: FailureReason) -> Self {
        Self {
            record_id,
            status: VerificationStatus::Fail,
            reason: Some(reason),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == VerificationStatus::Ok
    }

    /// Reason label, empty for verified records.
    pub fn reason_label(&self) -> &'static str {
        self.reason.map(|r| r.as_str()).unwrap_or("")
    }
}

/// Aggregate counts over one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub ok_count: usize,
    pub fail_count: usize,
    pub fail_by_reason: BTreeMap<FailureReason, usize>,
}

impl VerificationSummary {
    pub fn total(&self) -> usize {
        self.ok_count + self.fail_count
    }

    pub fn tamper_found(&self) -> bool {
        self.fail_count > 0
    }

    pub fn count(&self, reason: FailureReason) -> usize {
        self.fail_by_reason.get(&reason).copied().unwrap_or(0)
    }
}

pub fn summarize(results: &[VerificationResult]) -> VerificationSummary {
    let mut summary = VerificationSummary::default();
    for result in results {
        match result.reason {
            None => summary.ok_count += 1,
            Some(reason) => {
                summary.fail_count += 1;
                *summary.fail_by_reason.entry(reason).or_insert(0) += 1;
            }
        }
    }
    summary
}
