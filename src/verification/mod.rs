//! Evidence Verification
//!
//! Tamper detection over stored evidence records.

pub mod chain;
pub mod engine;
pub mod result;

pub use chain::ChainIndex;
pub use engine::VerificationEngine;
pub use result::{
    summarize, FailureReason, VerificationResult, VerificationStatus, VerificationSummary,
};
