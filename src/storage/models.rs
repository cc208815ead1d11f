use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// The unit of persistence. Fields are returned exactly as stored, so a
/// tampered row may carry nonces, tags or digests of the wrong width.
///
/// Columns whose stored value no longer decodes as its declared type are read
/// as empty, leaving the verdict to verification. `stored_at` is `None` when
/// it is not a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub record_id: i64,
    pub collector_id: String,
    pub key_id: String,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub plaintext_digest: Vec<u8>,
    pub metadata_bytes: Vec<u8>,
    pub stored_at: Option<DateTime<Utc>>,
}

impl EvidenceRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            record_id: row.try_get::<i64, _>("record_id")?,
            collector_id: text_column(row, "collector_id")?,
            key_id: text_column(row, "key_id")?,
            nonce: bytes_column(row, "nonce")?,
            ciphertext: bytes_column(row, "ciphertext")?,
            auth_tag: bytes_column(row, "auth_tag")?,
            plaintext_digest: bytes_column(row, "plaintext_digest")?,
            metadata_bytes: bytes_column(row, "metadata_bytes")?,
            stored_at: decoded(row.try_get::<DateTime<Utc>, _>("stored_at"))?,
        })
    }
}

/// `None` for a value that does not decode; other errors still propagate.
fn decoded<T>(result: Result<T, sqlx::Error>) -> Result<Option<T>, sqlx::Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(sqlx::Error::ColumnDecode { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

fn bytes_column(row: &SqliteRow, column: &str) -> Result<Vec<u8>, sqlx::Error> {
    if let Some(bytes) = decoded(row.try_get::<Vec<u8>, _>(column))? {
        return Ok(bytes);
    }
    Ok(decoded(row.try_get::<String, _>(column))?
        .map(String::into_bytes)
        .unwrap_or_default())
}

fn text_column(row: &SqliteRow, column: &str) -> Result<String, sqlx::Error> {
    if let Some(text) = decoded(row.try_get::<String, _>(column))? {
        return Ok(text);
    }
    Ok(decoded(row.try_get::<Vec<u8>, _>(column))?
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default())
}
