//! Custody Chain Index
//!
//! Index-addressed view of every collector's chain, keyed by
//! `(collector_id, sequence_number)`. Built from the first verification phase
//! and consulted to check each record's link to its predecessor.

use std::collections::{HashMap, HashSet};

use super::result::FailureReason;
use crate::protocol::{ChainPosition, EvidenceMetadata, RecordDigest};

/// A record whose payload authenticated, with the digest of its decrypted
/// plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AuthenticatedLink {
    record_id: i64,
    digest: RecordDigest,
}

#[derive(Debug, Default)]
pub struct ChainIndex {
    links: HashMap<ChainPosition, AuthenticatedLink>,
    unverified: HashSet<ChainPosition>,
}

impl ChainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated record. When two records claim the same
    /// position the lowest `record_id` keeps it.
    pub fn insert_link(&mut self, position: ChainPosition, record_id: i64, digest: RecordDigest) {
        let link = AuthenticatedLink { record_id, digest };
        self.links
            .entry(position)
            .and_modify(|existing| {
                if record_id < existing.record_id {
                    *existing = link;
                }
            })
            .or_insert(link);
    }

    /// Register a position claimed by a record that could not be authenticated.
    pub fn insert_claim(&mut self, position: ChainPosition) {
        self.unverified.insert(position);
    }

    /// Check the chain link of an authenticated record.
    pub fn check(&self, record_id: i64, metadata: &EvidenceMetadata) -> Option<FailureReason> {
        let position = metadata.position();

        if let Some(owner) = self.links.get(&position) {
            if owner.record_id != record_id {
                return Some(FailureReason::ChainBroken);
            }
        }

        if metadata.is_initial() {
            return if metadata.previous_record_digest.is_genesis() {
                None
            } else {
                Some(FailureReason::ChainBroken)
            };
        }

        let predecessor = ChainPosition {
            collector_id: position.collector_id,
            sequence_number: position.sequence_number - 1,
        };

        match self.links.get(&predecessor) {
            Some(link) if link.digest == metadata.previous_record_digest => None,
            Some(_) => Some(FailureReason::ChainBroken),
            // The predecessor exists but cannot vouch for its digest; its own
            // result already reports the tampering.
            None if self.unverified.contains(&predecessor) => None,
            None => Some(FailureReason::ChainBroken),
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
