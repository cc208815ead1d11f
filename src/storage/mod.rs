//! Evidence Storage
//!
//! Authenticated encryption at rest plus durable SQLite persistence of
//! sealed evidence records.

pub mod models;
pub mod schema;
pub mod sealing;
pub mod tamper;

use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::crypto::EncryptionKey;
use crate::error::{CustodyError, Result};
use crate::protocol::{digest, EvidenceMetadata};

pub use models::EvidenceRecord;
pub use sealing::{seal, unseal, SealedPayload, UnsealError, NONCE_LEN, TAG_LEN};
pub use tamper::{TamperInjector, TamperMode};

use schema::{EVIDENCE_COLUMNS, EVIDENCE_SCHEMA};

pub struct Storage {
    pool: SqlitePool,
    // Held for the whole seal-and-insert so ids are handed out in commit order.
    next_record_id: Mutex<i64>,
}

impl Storage {
    /// Open (or create) a file-backed evidence store.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        info!("Evidence store opened at {}", path.display());
        Self::from_pool(pool).await
    }

    /// In-memory store for tests and dry runs. A single connection keeps
    /// every query on the same database.
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let storage = Self {
            pool,
            next_record_id: Mutex::new(1),
        };
        storage.run_migrations().await?;

        let max_id: Option<i64> =
            sqlx::query_scalar("SELECT MAX(record_id) FROM evidence_records")
                .fetch_one(&storage.pool)
                .await?;
        *storage.next_record_id.lock().await = max_id.unwrap_or(0) + 1;

        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(EVIDENCE_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Encrypt, digest and persist one canonical record.
    ///
    /// The metadata encoding is the AEAD associated data. Nothing is written
    /// unless the whole row commits, and the id counter only advances on commit.
    pub async fn seal_and_store(
        &self,
        canonical_bytes: &[u8],
        metadata: &EvidenceMetadata,
        key: &EncryptionKey,
    ) -> Result<EvidenceRecord> {
        metadata.validate()?;
        if metadata.collector_id != key.collector_id() {
            return Err(CustodyError::validation(format!(
                "metadata collector {} does not own key {}",
                metadata.collector_id,
                key.key_id()
            )));
        }

        let metadata_bytes = metadata.encode()?;
        let sealed = seal(key, canonical_bytes, &metadata_bytes)?;
        let plaintext_digest = digest(canonical_bytes);

        let mut next_id = self.next_record_id.lock().await;
        let record = EvidenceRecord {
            record_id: *next_id,
            collector_id: metadata.collector_id.clone(),
            key_id: key.key_id().to_string(),
            nonce: sealed.nonce.to_vec(),
            ciphertext: sealed.ciphertext,
            auth_tag: sealed.auth_tag.to_vec(),
            plaintext_digest: plaintext_digest.as_bytes().to_vec(),
            metadata_bytes,
            stored_at: Some(Utc::now()),
        };

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO evidence_records
            (record_id, collector_id, key_id, nonce, ciphertext, auth_tag, plaintext_digest, metadata_bytes, stored_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.record_id)
        .bind(&record.collector_id)
        .bind(&record.key_id)
        .bind(&record.nonce)
        .bind(&record.ciphertext)
        .bind(&record.auth_tag)
        .bind(&record.plaintext_digest)
        .bind(&record.metadata_bytes)
        .bind(record.stored_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            let is_duplicate = matches!(
                &e,
                sqlx::Error::Database(db)
                    if db.is_unique_violation() || db.message().contains("UNIQUE constraint failed")
            );
            if is_duplicate {
                return Err(CustodyError::DuplicateRecordId(record.record_id));
            }
            return Err(e.into());
        }
        tx.commit().await?;
        *next_id += 1;

        debug!(
            "Stored record {} for collector {} (sequence {}, digest {})",
            record.record_id, record.collector_id, metadata.sequence_number, plaintext_digest
        );
        Ok(record)
    }

    /// Fetch one record exactly as stored.
    pub async fn fetch(&self, record_id: i64) -> Result<EvidenceRecord> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM evidence_records WHERE record_id = ?",
            EVIDENCE_COLUMNS
        ))
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(EvidenceRecord::from_row(&row)?),
            None => Err(CustodyError::NotFound(record_id)),
        }
    }

    /// All records ordered by `record_id` ascending.
    pub async fn fetch_all(&self) -> Result<Vec<EvidenceRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM evidence_records ORDER BY record_id ASC",
            EVIDENCE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .iter()
            .map(EvidenceRecord::from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(records)
    }

    /// Records whose stored `collector_id` matches, ordered by `record_id`.
    pub async fn fetch_by_collector(&self, collector_id: &str) -> Result<Vec<EvidenceRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM evidence_records WHERE collector_id = ? ORDER BY record_id ASC",
            EVIDENCE_COLUMNS
        ))
        .bind(collector_id)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .iter()
            .map(EvidenceRecord::from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(records)
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM evidence_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn record_ids(&self) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar("SELECT record_id FROM evidence_records ORDER BY record_id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyManager;
    use crate::protocol::build_metadata;

    #[tokio::test]
    async fn test_record_ids_are_strictly_increasing() {
        let storage = Storage::new_in_memory().await.unwrap();
        let keys = KeyManager::new();
        let key = keys.issue_key("collector-01").await.unwrap();

        let first = build_metadata("collector-01", 1, None, Utc::now()).unwrap();
        let a = storage.seal_and_store(b"one", &first, &key).await.unwrap();

        let prev = digest(b"one");
        let second = build_metadata("collector-01", 2, Some(prev.as_bytes()), Utc::now()).unwrap();
        let b = storage.seal_and_store(b"two", &second, &key).await.unwrap();

        assert_eq!(a.record_id, 1);
        assert_eq!(b.record_id, 2);
        assert_eq!(storage.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stored_digest_is_of_plaintext() {
        let storage = Storage::new_in_memory().await.unwrap();
        let keys = KeyManager::new();
        let key = keys.issue_key("collector-01").await.unwrap();
        let meta = build_metadata("collector-01", 1, None, Utc::now()).unwrap();

        let record = storage.seal_and_store(b"payload", &meta, &key).await.unwrap();
        assert_eq!(record.plaintext_digest, digest(b"payload").as_bytes().to_vec());
        assert_eq!(record.nonce.len(), NONCE_LEN);
        assert_eq!(record.auth_tag.len(), TAG_LEN);
        assert_eq!(record.metadata_bytes, meta.encode().unwrap());
    }

    #[tokio::test]
    async fn test_foreign_key_is_rejected_before_writing() {
        let storage = Storage::new_in_memory().await.unwrap();
        let keys = KeyManager::new();
        let key = keys.issue_key("collector-02").await.unwrap();
        let meta = build_metadata("collector-01", 1, None, Utc::now()).unwrap();

        assert!(storage.seal_and_store(b"x", &meta, &key).await.is_err());
        assert_eq!(storage.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_metadata_is_never_sealed() {
        let storage = Storage::new_in_memory().await.unwrap();
        let keys = KeyManager::new();
        let key = keys.issue_key("collector-01").await.unwrap();
        let meta = EvidenceMetadata {
            sequence_number: 0,
            ..build_metadata("collector-01", 1, None, Utc::now()).unwrap()
        };

        let err = storage.seal_and_store(b"x", &meta, &key).await.unwrap_err();
        assert!(matches!(err, CustodyError::ValidationError(_)));
        assert_eq!(storage.count().await.unwrap(), 0);
    }
}
