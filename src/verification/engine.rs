//! Verification Engine
//!
//! Re-derives integrity proofs for stored evidence and classifies every
//! record. Each record moves through
//! `key lookup -> decrypt -> digest check -> metadata check -> chain check`
//! and stops at the first failing step.
//!
//! The per-record steps only read immutable stored state and a snapshot of the
//! key table, so a sweep runs them on blocking workers and merges by
//! `record_id`. The chain check needs the whole sweep and runs afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::chain::ChainIndex;
use super::result::{summarize, FailureReason, VerificationResult, VerificationSummary};
use crate::crypto::{EncryptionKey, KeyManager};
use crate::error::{CustodyError, Result};
use crate::protocol::{decode_canonical, digest, ChainPosition, EvidenceMetadata, RecordDigest};
use crate::storage::{unseal, EvidenceRecord, Storage};

type KeySnapshot = HashMap<String, Arc<EncryptionKey>>;

/// Outcome of the per-record steps.
#[derive(Debug, Clone)]
enum Outcome {
    /// Every per-record check passed; the chain link is still pending.
    Verified {
        metadata: EvidenceMetadata,
        digest: RecordDigest,
    },
    /// Decrypted, then failed a later check.
    Rejected {
        reason: FailureReason,
        position: Option<ChainPosition>,
        digest: RecordDigest,
    },
    /// Could not be authenticated at all.
    Unauthenticated {
        reason: FailureReason,
        claim: Option<ChainPosition>,
    },
}

#[derive(Debug, Clone)]
struct Inspection {
    record_id: i64,
    outcome: Outcome,
}

impl Inspection {
    fn classify(&self, index: &ChainIndex) -> VerificationResult {
        let reason = match &self.outcome {
            Outcome::Verified { metadata, .. } => index.check(self.record_id, metadata),
            Outcome::Rejected { reason, .. } | Outcome::Unauthenticated { reason, .. } => {
                Some(*reason)
            }
        };

        match reason {
            None => VerificationResult::ok(self.record_id),
            Some(reason) => {
                debug!("Record {} failed verification: {}", self.record_id, reason);
                VerificationResult::fail(self.record_id, reason)
            }
        }
    }
}

fn build_index<'a>(inspections: impl IntoIterator<Item = &'a Inspection>) -> ChainIndex {
    let mut index = ChainIndex::new();
    for inspection in inspections {
        match &inspection.outcome {
            Outcome::Verified { metadata, digest } => {
                index.insert_link(metadata.position(), inspection.record_id, *digest)
            }
            Outcome::Rejected {
                position: Some(position),
                digest,
                ..
            } => index.insert_link(position.clone(), inspection.record_id, *digest),
            Outcome::Unauthenticated {
                claim: Some(position),
                ..
            } => index.insert_claim(position.clone()),
            _ => {}
        }
    }
    index
}

/// Position a record claims, read without any validation.
fn claimed_position(metadata_bytes: &[u8]) -> Option<ChainPosition> {
    serde_json::from_slice::<EvidenceMetadata>(metadata_bytes)
        .ok()
        .map(|m| m.position())
}

fn inspect(record: &EvidenceRecord, keys: &KeySnapshot) -> Inspection {
    let record_id = record.record_id;
    let unauthenticated = |reason| Inspection {
        record_id,
        outcome: Outcome::Unauthenticated {
            reason,
            claim: claimed_position(&record.metadata_bytes),
        },
    };

    let key = match keys.get(&record.collector_id) {
        Some(key) if key.key_id() == record.key_id => key,
        _ => return unauthenticated(FailureReason::KeyMissing),
    };

    let plaintext = match unseal(
        key,
        &record.nonce,
        &record.ciphertext,
        &record.auth_tag,
        &record.metadata_bytes,
    ) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            debug!("Record {} did not unseal: {}", record_id, e);
            return unauthenticated(FailureReason::DecryptionFailed);
        }
    };

    let computed = digest(&plaintext);
    let rejected = |reason| Inspection {
        record_id,
        outcome: Outcome::Rejected {
            reason,
            position: claimed_position(&record.metadata_bytes),
            digest: computed,
        },
    };

    // Compared against the independently stored field, never the ciphertext.
    match RecordDigest::from_slice(&record.plaintext_digest) {
        Some(stored) if stored == computed => {}
        _ => return rejected(FailureReason::HashMismatch),
    }

    match check_metadata(record, &plaintext) {
        Some(metadata) => Inspection {
            record_id,
            outcome: Outcome::Verified {
                metadata,
                digest: computed,
            },
        },
        None => rejected(FailureReason::MalformedMetadata),
    }
}

fn check_metadata(record: &EvidenceRecord, plaintext: &[u8]) -> Option<EvidenceMetadata> {
    let metadata = EvidenceMetadata::decode(&record.metadata_bytes).ok()?;
    if metadata.collector_id != record.collector_id {
        return None;
    }

    let canonical = decode_canonical(plaintext).ok()?;
    if canonical.custody != metadata {
        return None;
    }

    Some(metadata)
}

pub struct VerificationEngine {
    storage: Arc<Storage>,
    key_manager: Arc<KeyManager>,
    workers: usize,
}

impl VerificationEngine {
    pub fn new(storage: Arc<Storage>, key_manager: Arc<KeyManager>) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            storage,
            key_manager,
            workers,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Verify a single record, including its link to its predecessor.
    ///
    /// Fails with `NotFound` if the record does not exist.
    pub async fn verify(&self, record_id: i64) -> Result<VerificationResult> {
        let record = self.storage.fetch(record_id).await?;
        let keys = self.key_manager.snapshot().await;

        let target = inspect(&record, &keys);
        let position = match &target.outcome {
            Outcome::Verified { metadata, .. } => metadata.position(),
            _ => return Ok(target.classify(&ChainIndex::new())),
        };
        let predecessor = ChainPosition {
            collector_id: position.collector_id.clone(),
            sequence_number: position.sequence_number.saturating_sub(1),
        };

        // Only records claiming this position or the one before matter, so
        // nothing else is decrypted.
        let neighbours: Vec<Inspection> = self
            .storage
            .fetch_all()
            .await?
            .iter()
            .filter(|r| r.record_id != record_id)
            .filter(|r| {
                claimed_position(&r.metadata_bytes)
                    .is_some_and(|claim| claim == position || claim == predecessor)
            })
            .map(|r| inspect(r, &keys))
            .collect();

        let index = build_index(neighbours.iter().chain(std::iter::once(&target)));
        Ok(target.classify(&index))
    }

    /// Verify every stored record, ordered by `record_id`.
    ///
    /// A failing record never stops the sweep; only storage faults and
    /// worker panics abort it.
    pub async fn verify_all(&self) -> Result<Vec<VerificationResult>> {
        let records = self.storage.fetch_all().await?;
        let total = records.len();
        let keys = Arc::new(self.key_manager.snapshot().await);
        let chunk_size = total.div_ceil(self.workers).max(1);

        let mut join_set = JoinSet::new();
        let mut pending = records.into_iter().peekable();
        while pending.peek().is_some() {
            let chunk: Vec<EvidenceRecord> = pending.by_ref().take(chunk_size).collect();
            let keys = keys.clone();
            join_set.spawn_blocking(move || {
                chunk
                    .iter()
                    .map(|record| inspect(record, &keys))
                    .collect::<Vec<_>>()
            });
        }

        let mut inspections = Vec::with_capacity(total);
        while let Some(joined) = join_set.join_next().await {
            let batch = joined.map_err(|e| CustodyError::WorkerError(e.to_string()))?;
            inspections.extend(batch);
        }
        inspections.sort_by_key(|i| i.record_id);

        let index = build_index(&inspections);
        let results: Vec<VerificationResult> =
            inspections.iter().map(|i| i.classify(&index)).collect();

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        if failed > 0 {
            warn!("Verification found {} of {} records failing", failed, total);
        } else {
            info!("Verified {} records, all intact", total);
        }
        Ok(results)
    }

    pub fn summarize(results: &[VerificationResult]) -> VerificationSummary {
        summarize(results)
    }
}
