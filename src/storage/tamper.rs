//! Tamper Injection
//!
//! Simulates an attacker with write access to the evidence database but no
//! access to key material. Used by the `tamper` run and by tests.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use super::Storage;
use crate::error::{CustodyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TamperMode {
    /// Flip the low bit of the first ciphertext byte.
    FlipCiphertext,
    FlipAuthTag,
    FlipNonce,
    /// Shift the collection timestamp inside the stored metadata.
    AlterMetadata,
    /// Replace the stored plaintext digest with random bytes.
    OverwriteDigest,
    /// Point the record at a collector that never had a key.
    ForgeCollector,
    DeleteRecord,
}

impl TamperMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TamperMode::FlipCiphertext => "flip_ciphertext",
            TamperMode::FlipAuthTag => "flip_auth_tag",
            TamperMode::FlipNonce => "flip_nonce",
            TamperMode::AlterMetadata => "alter_metadata",
            TamperMode::OverwriteDigest => "overwrite_digest",
            TamperMode::ForgeCollector => "forge_collector",
            TamperMode::DeleteRecord => "delete_record",
        }
    }
}

impl std::str::FromStr for TamperMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flip_ciphertext" => Ok(TamperMode::FlipCiphertext),
            "flip_auth_tag" => Ok(TamperMode::FlipAuthTag),
            "flip_nonce" => Ok(TamperMode::FlipNonce),
            "alter_metadata" => Ok(TamperMode::AlterMetadata),
            "overwrite_digest" => Ok(TamperMode::OverwriteDigest),
            "forge_collector" => Ok(TamperMode::ForgeCollector),
            "delete_record" => Ok(TamperMode::DeleteRecord),
            _ => Err(format!("Unknown tamper mode: {}", s)),
        }
    }
}

impl fmt::Display for TamperMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct TamperInjector<'a> {
    storage: &'a Storage,
}

impl<'a> TamperInjector<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Corrupt one stored record in place.
    pub async fn apply(&self, record_id: i64, mode: TamperMode) -> Result<()> {
        let record = self.storage.fetch(record_id).await?;
        let pool = self.storage.pool();

        match mode {
            TamperMode::FlipCiphertext => {
                let mut ciphertext = record.ciphertext;
                flip_first(&mut ciphertext, record_id, "ciphertext")?;
                sqlx::query("UPDATE evidence_records SET ciphertext = ? WHERE record_id = ?")
                    .bind(ciphertext)
                    .bind(record_id)
                    .execute(pool)
                    .await?;
            }
            TamperMode::FlipAuthTag => {
                let mut tag = record.auth_tag;
                flip_first(&mut tag, record_id, "auth_tag")?;
                sqlx::query("UPDATE evidence_records SET auth_tag = ? WHERE record_id = ?")
                    .bind(tag)
                    .bind(record_id)
                    .execute(pool)
                    .await?;
            }
            TamperMode::FlipNonce => {
                let mut nonce = record.nonce;
                flip_first(&mut nonce, record_id, "nonce")?;
                sqlx::query("UPDATE evidence_records SET nonce = ? WHERE record_id = ?")
                    .bind(nonce)
                    .bind(record_id)
                    .execute(pool)
                    .await?;
            }
            TamperMode::AlterMetadata => {
                let metadata = alter_timestamp(&record.metadata_bytes, record_id)?;
                sqlx::query("UPDATE evidence_records SET metadata_bytes = ? WHERE record_id = ?")
                    .bind(metadata)
                    .bind(record_id)
                    .execute(pool)
                    .await?;
            }
            TamperMode::OverwriteDigest => {
                let mut forged = vec![0u8; record.plaintext_digest.len().max(1)];
                loop {
                    rand::thread_rng().fill_bytes(&mut forged);
                    if forged != record.plaintext_digest {
                        break;
                    }
                }
                sqlx::query("UPDATE evidence_records SET plaintext_digest = ? WHERE record_id = ?")
                    .bind(forged)
                    .bind(record_id)
                    .execute(pool)
                    .await?;
            }
            TamperMode::ForgeCollector => {
                let forged = format!("forged-{}", record.collector_id);
                sqlx::query("UPDATE evidence_records SET collector_id = ? WHERE record_id = ?")
                    .bind(forged)
                    .bind(record_id)
                    .execute(pool)
                    .await?;
            }
            TamperMode::DeleteRecord => {
                sqlx::query("DELETE FROM evidence_records WHERE record_id = ?")
                    .bind(record_id)
                    .execute(pool)
                    .await?;
            }
        }

        info!("Tampered record {} ({})", record_id, mode);
        Ok(())
    }

    /// Apply each mode to its own set of records, drawn without overlap.
    ///
    /// Returns `(record_id, mode)` pairs in application order.
    pub async fn apply_disjoint(
        &self,
        plan: &[(TamperMode, usize)],
        seed: u64,
    ) -> Result<Vec<(i64, TamperMode)>> {
        let ids = self.storage.record_ids().await?;
        let wanted: usize = plan.iter().map(|(_, count)| count).sum();
        let targets = pick_disjoint(&ids, wanted, seed)?;

        let mut applied = Vec::with_capacity(wanted);
        let mut cursor = targets.into_iter();
        for (mode, count) in plan {
            for record_id in cursor.by_ref().take(*count) {
                self.apply(record_id, *mode).await?;
                applied.push((record_id, *mode));
            }
        }
        Ok(applied)
    }
}

/// Choose `count` distinct record ids with a seeded RNG.
pub fn pick_disjoint(ids: &[i64], count: usize, seed: u64) -> Result<Vec<i64>> {
    if count > ids.len() {
        return Err(CustodyError::validation(format!(
            "cannot tamper {} records, only {} stored",
            count,
            ids.len()
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(ids.choose_multiple(&mut rng, count).copied().collect())
}

fn flip_first(bytes: &mut [u8], record_id: i64, field: &str) -> Result<()> {
    match bytes.first_mut() {
        Some(b) => {
            *b ^= 0x01;
            Ok(())
        }
        None => Err(CustodyError::validation(format!(
            "record {} has an empty {}",
            record_id, field
        ))),
    }
}

// The edited metadata stays well-formed and keeps its chain position, so only
// the AEAD binding can expose it.
fn alter_timestamp(metadata_bytes: &[u8], record_id: i64) -> Result<Vec<u8>> {
    let mut value: serde_json::Value = serde_json::from_slice(metadata_bytes)
        .map_err(|e| CustodyError::validation(format!("record {} metadata: {}", record_id, e)))?;
    let micros = value
        .get("collection_timestamp")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| {
            CustodyError::validation(format!("record {} has no collection timestamp", record_id))
        })?;
    value["collection_timestamp"] = serde_json::Value::from(micros + 1_000_000);
    crate::protocol::canonical::canonical_json(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_disjoint_is_seeded_and_unique() {
        let ids: Vec<i64> = (1..=50).collect();
        let a = pick_disjoint(&ids, 20, 7).unwrap();
        let b = pick_disjoint(&ids, 20, 7).unwrap();
        assert_eq!(a, b);

        let mut unique = a.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn test_pick_disjoint_rejects_overdraw() {
        assert!(pick_disjoint(&[1, 2, 3], 4, 0).is_err());
    }

    #[test]
    fn test_mode_names_round_trip() {
        for mode in [
            TamperMode::FlipCiphertext,
            TamperMode::FlipAuthTag,
            TamperMode::FlipNonce,
            TamperMode::AlterMetadata,
            TamperMode::OverwriteDigest,
            TamperMode::ForgeCollector,
            TamperMode::DeleteRecord,
        ] {
            assert_eq!(mode.as_str().parse::<TamperMode>().unwrap(), mode);
        }
    }
}
