// Database schema definitions and migrations
// This module contains the SQL schema for the evidence store

pub const EVIDENCE_SCHEMA: &str = include_str!("../../migrations/001_evidence_schema.sql");

pub const EVIDENCE_COLUMNS: &str = "record_id, collector_id, key_id, nonce, ciphertext, auth_tag, \
     plaintext_digest, metadata_bytes, stored_at";
