pub mod key_management;

pub use key_management::{EncryptionKey, KeyManager, KEY_LEN, MAX_SEALS_PER_KEY};
