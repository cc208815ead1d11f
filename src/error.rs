use thiserror::Error;

impl From<sqlx::Error> for CustodyError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageError(format!("Database error: {}", err))
    }
}

impl From<std::io::Error> for CustodyError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(format!("I/O error: {}", err))
    }
}

impl From<csv::Error> for CustodyError {
    fn from(err: csv::Error) -> Self {
        Self::StorageError(format!("CSV error: {}", err))
    }
}

impl From<config::ConfigError> for CustodyError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

/// Faults raised while collecting, storing or sweeping evidence.
///
/// Tamper outcomes are not represented here; they are reported as
/// [`crate::verification::FailureReason`] values.
#[derive(Error, Debug)]
pub enum CustodyError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("No key issued for collector: {0}")]
    KeyNotFound(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Duplicate record id: {0}")]
    DuplicateRecordId(i64),

    #[error("Record not found: {0}")]
    NotFound(i64),

    #[error("Verification worker failed: {0}")]
    WorkerError(String),
}

pub type Result<T, E = CustodyError> = std::result::Result<T, E>;

impl CustodyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Storage faults end the run; everything else only aborts one operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StorageError(_))
    }

    /// Process exit status for a run aborted by this error.
    ///
    /// `1` is reserved for a completed run that found tampered records.
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            2
        } else {
            3
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_faults_are_fatal() {
        let err = CustodyError::StorageError("disk full".to_string());
        assert!(err.is_fatal());
        assert_eq!(err.exit_code(), 2);

        let err = CustodyError::KeyNotFound("collector-07".to_string());
        assert!(!err.is_fatal());
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: CustodyError = io.into();
        assert!(matches!(err, CustodyError::StorageError(_)));
        assert!(err.to_string().contains("read-only"));
    }
}
