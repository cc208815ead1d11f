//! Audit Log
//!
//! Append-only text sink receiving one line per verification run.

pub mod entry;
pub mod logger;

pub use entry::RunEntry;
pub use logger::AuditLogger;
