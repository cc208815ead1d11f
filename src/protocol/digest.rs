//! SHA-256 record digests.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

pub const DIGEST_LEN: usize = 32;

/// Fixed-length SHA-256 digest of a canonical record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordDigest([u8; DIGEST_LEN]);

impl RecordDigest {
    /// Sentinel carried as the previous digest of a collector's first record.
    pub const GENESIS: RecordDigest = RecordDigest([0u8; DIGEST_LEN]);

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns `None` unless `bytes` is exactly [`DIGEST_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; DIGEST_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn from_hex(value: &str) -> Option<Self> {
        let bytes = hex::decode(value).ok()?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::GENESIS
    }
}

/// Hash canonical bytes.
pub fn digest(bytes: &[u8]) -> RecordDigest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    RecordDigest(hasher.finalize().into())
}

impl fmt::Display for RecordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.to_hex())
    }
}

impl fmt::Debug for RecordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordDigest({})", self)
    }
}

// Plain lowercase hex keeps the canonical encoding free of prefixes.
impl Serialize for RecordDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RecordDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text.len() != DIGEST_LEN * 2 || text.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(serde::de::Error::custom(format!(
                "digest must be {} lowercase hex characters",
                DIGEST_LEN * 2
            )));
        }
        RecordDigest::from_hex(&text)
            .ok_or_else(|| serde::de::Error::custom("digest is not valid hex"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_sha256() {
        let d = digest(b"abc");
        assert_eq!(
            d.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(d.to_string().len(), 71); // "sha256:" + 64 hex chars
    }

    #[test]
    fn test_from_slice_rejects_wrong_width() {
        assert!(RecordDigest::from_slice(&[0u8; 31]).is_none());
        assert!(RecordDigest::from_slice(&[0u8; 33]).is_none());
        assert_eq!(
            RecordDigest::from_slice(&[0u8; 32]),
            Some(RecordDigest::GENESIS)
        );
    }

    #[test]
    fn test_serde_uses_lowercase_hex() {
        let d = digest(b"evidence");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", d.to_hex()));

        let back: RecordDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);

        let upper = format!("\"{}\"", d.to_hex().to_uppercase());
        assert!(serde_json::from_str::<RecordDigest>(&upper).is_err());
    }
}
