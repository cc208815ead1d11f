//! Collector Key Management
//!
//! Issues and looks up the symmetric AES-256-GCM key of each collector.
//! Exactly one key is active per collector for the lifetime of a run.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::RwLock;
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::error::{CustodyError, Result};
use crate::protocol::event::non_empty;

pub const KEY_LEN: usize = 32;

/// Seals allowed under one key with random 96-bit nonces (NIST SP 800-38D).
///
/// The chance of any nonce collision after n seals is about n^2 / 2^97, i.e.
/// roughly 2^-33 at this cap and about 3e-25 for a 200-record run.
pub const MAX_SEALS_PER_KEY: u64 = 1 << 32;

/// Symmetric key owned by the key manager. The key bytes are wiped on drop
/// and never appear in `Debug` output.
pub struct EncryptionKey {
    collector_id: String,
    key_id: String,
    key_bytes: [u8; KEY_LEN],
    created_at: DateTime<Utc>,
    seals: AtomicU64,
}

impl EncryptionKey {
    fn generate(collector_id: &str) -> Result<Self> {
        let mut key_bytes = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut key_bytes)
            .map_err(|e| CustodyError::EncryptionError(format!("Key generation failed: {}", e)))?;

        Ok(Self {
            collector_id: collector_id.to_string(),
            key_id: generate_key_id(collector_id)?,
            key_bytes,
            created_at: Utc::now(),
            seals: AtomicU64::new(0),
        })
    }

    pub fn collector_id(&self) -> &str {
        &self.collector_id
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn key_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key_bytes
    }

    /// Number of seals performed under this key so far.
    pub fn seal_count(&self) -> u64 {
        self.seals.load(Ordering::Relaxed)
    }

    /// Account for one more encryption, failing once the nonce budget is spent.
    pub(crate) fn reserve_seal(&self) -> Result<()> {
        let previous = self.seals.fetch_add(1, Ordering::AcqRel);
        if previous >= MAX_SEALS_PER_KEY {
            self.seals.fetch_sub(1, Ordering::AcqRel);
            return Err(CustodyError::EncryptionError(format!(
                "Key {} exhausted its nonce budget of {} seals",
                self.key_id, MAX_SEALS_PER_KEY
            )));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn with_bytes(collector_id: &str, key_id: &str, key_bytes: [u8; KEY_LEN]) -> Self {
        Self {
            collector_id: collector_id.to_string(),
            key_id: key_id.to_string(),
            key_bytes,
            created_at: Utc::now(),
            seals: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_seal_count(&self, count: u64) {
        self.seals.store(count, Ordering::Relaxed);
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.key_bytes.zeroize();
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("collector_id", &self.collector_id)
            .field("key_id", &self.key_id)
            .field("key_bytes", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Generate unique key ID
fn generate_key_id(collector_id: &str) -> Result<String> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| CustodyError::EncryptionError(format!("Time error: {}", e)))?
        .as_secs();

    let random_part = rand::random::<u32>();
    Ok(format!(
        "aes256gcm_{}_{}_{:08x}",
        collector_id, timestamp, random_part
    ))
}

/// In-memory key authority shared by collectors and the verification engine.
#[derive(Default)]
pub struct KeyManager {
    keys: Arc<RwLock<HashMap<String, Arc<EncryptionKey>>>>,
}

impl KeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the collector's key, generating it on first use.
    ///
    /// Issuing twice returns the same key; keys are never rotated.
    pub async fn issue_key(&self, collector_id: &str) -> Result<Arc<EncryptionKey>> {
        non_empty("collector_id", collector_id)?;

        {
            let keys = self.keys.read().await;
            if let Some(key) = keys.get(collector_id) {
                return Ok(key.clone());
            }
        }

        let mut keys = self.keys.write().await;
        // Another task may have issued while we waited for the write lock.
        if let Some(key) = keys.get(collector_id) {
            return Ok(key.clone());
        }

        let key = Arc::new(EncryptionKey::generate(collector_id)?);
        keys.insert(collector_id.to_string(), key.clone());

        info!("Issued key {} for collector {}", key.key_id(), collector_id);
        Ok(key)
    }

    /// Look up the active key of a collector.
    pub async fn lookup(&self, collector_id: &str) -> Result<Arc<EncryptionKey>> {
        let keys = self.keys.read().await;
        keys.get(collector_id)
            .cloned()
            .ok_or_else(|| CustodyError::KeyNotFound(collector_id.to_string()))
    }

    /// Look up a collector's key and require it to carry `key_id`.
    pub async fn lookup_key(&self, collector_id: &str, key_id: &str) -> Result<Arc<EncryptionKey>> {
        let key = self.lookup(collector_id).await?;
        if key.key_id() != key_id {
            debug!(
                "Key id {} does not match active key of collector {}",
                key_id, collector_id
            );
            return Err(CustodyError::KeyNotFound(format!(
                "{} (key id {})",
                collector_id, key_id
            )));
        }
        Ok(key)
    }

    /// Read-only copy of the key table for lock-free parallel lookups.
    pub async fn snapshot(&self) -> HashMap<String, Arc<EncryptionKey>> {
        self.keys.read().await.clone()
    }

    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }
}
