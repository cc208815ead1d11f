//! AES-256-GCM sealing of canonical records.
//!
//! The tag is kept detached from the ciphertext so each can be stored (and
//! tampered with) independently. The associated data is the canonical
//! metadata encoding, which binds custody fields to the ciphertext.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::crypto::EncryptionKey;
use crate::error::{CustodyError, Result};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Output of one encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub auth_tag: [u8; TAG_LEN],
}

/// Why a stored payload could not be opened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnsealError {
    #[error("nonce must be {NONCE_LEN} bytes, found {0}")]
    NonceLength(usize),

    #[error("auth tag must be {TAG_LEN} bytes, found {0}")]
    TagLength(usize),

    #[error("authentication failed")]
    Authentication,
}

fn cipher_for(key: &EncryptionKey) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.key_bytes())
        .map_err(|e| CustodyError::EncryptionError(format!("Invalid key material: {}", e)))
}

/// Encrypt `plaintext` under a fresh random nonce.
pub fn seal(key: &EncryptionKey, plaintext: &[u8], associated_data: &[u8]) -> Result<SealedPayload> {
    key.reserve_seal()?;
    let cipher = cipher_for(key)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| CustodyError::EncryptionError(format!("Nonce generation failed: {}", e)))?;

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), associated_data, &mut buffer)
        .map_err(|_| CustodyError::EncryptionError("AES-GCM encryption failed".to_string()))?;

    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(tag.as_slice());

    Ok(SealedPayload {
        nonce,
        ciphertext: buffer,
        auth_tag,
    })
}

/// Decrypt and authenticate a stored payload.
pub fn unseal(
    key: &EncryptionKey,
    nonce: &[u8],
    ciphertext: &[u8],
    auth_tag: &[u8],
    associated_data: &[u8],
) -> std::result::Result<Vec<u8>, UnsealError> {
    if nonce.len() != NONCE_LEN {
        return Err(UnsealError::NonceLength(nonce.len()));
    }
    if auth_tag.len() != TAG_LEN {
        return Err(UnsealError::TagLength(auth_tag.len()));
    }

    let cipher = cipher_for(key).map_err(|_| UnsealError::Authentication)?;
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            associated_data,
            &mut buffer,
            Tag::from_slice(auth_tag),
        )
        .map_err(|_| UnsealError::Authentication)?;

    Ok(buffer)
}
