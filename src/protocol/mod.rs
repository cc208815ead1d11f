//! Evidence Protocol
//!
//! Canonical encoding, digests and chain-of-custody metadata shared by the
//! collector, the storage layer and the verification engine.

pub mod canonical;
pub mod digest;
pub mod event;
pub mod metadata;

pub use canonical::{canonicalize, decode_canonical, CanonicalRecord, CANONICAL_SCHEMA};
pub use digest::{digest, RecordDigest, DIGEST_LEN};
pub use event::{EventPayload, RawEvent};
pub use metadata::{build_metadata, ChainPosition, EvidenceMetadata};
