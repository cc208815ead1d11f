pub mod audit;
pub mod collector;
pub mod config;
pub mod crypto;
pub mod device;
pub mod error;
pub mod protocol;
pub mod report;
pub mod storage;
pub mod verification;

pub use collector::Collector;
pub use crypto::KeyManager;
pub use error::CustodyError;
pub use storage::Storage;
pub use verification::VerificationEngine;
