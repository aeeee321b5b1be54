use std::io;
use thiserror::Error;

/// Unified error type for the synchronization subsystem.
///
/// The variants mirror the failure taxonomy of the sync pipeline:
/// validation and conflict errors surface to the caller immediately,
/// synthesis errors block apply, and apply errors trigger rollback to
/// the last known-good configuration.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Bad input on create/update: missing field, port out of range,
    /// unknown protocol.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Port or subscription token collision.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A consistent configuration document cannot be produced from the
    /// current state. The previously applied document stays active.
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// Writing or activating the document failed; the applier has rolled
    /// back to the last known-good backup.
    #[error("Apply error: {0}")]
    Apply(String),

    /// Storage collaborator failure. Aborts the current operation without
    /// touching on-disk or in-memory state.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error (CLI arguments or settings file).
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for the subsystem.
pub type Result<T> = std::result::Result<T, SyncError>;

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Storage(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(format!("TOML parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = SyncError::Validation("port out of range".to_string());
        let display = format!("{}", err);
        assert!(display.contains("Validation error"));
        assert!(display.contains("port out of range"));
    }

    #[test]
    fn test_conflict_error_display() {
        let err = SyncError::Conflict("port 443 already in use".to_string());
        let display = format!("{}", err);
        assert!(display.contains("Conflict"));
        assert!(display.contains("443"));
    }

    #[test]
    fn test_synthesis_error_display() {
        let err = SyncError::Synthesis("TLS requested but unusable".to_string());
        let display = format!("{}", err);
        assert!(display.contains("Synthesis error"));
        assert!(display.contains("TLS requested"));
    }

    #[test]
    fn test_apply_error_display() {
        let err = SyncError::Apply("restart failed".to_string());
        let display = format!("{}", err);
        assert!(display.contains("Apply error"));
        assert!(display.contains("restart failed"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: SyncError = io_err.into();
        let display = format!("{}", err);
        assert!(display.contains("IO error"));
        assert!(display.contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SyncError = json_err.into();
        assert!(matches!(err, SyncError::Storage(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn test_fn() -> Result<u16> {
            Ok(443)
        }
        assert_eq!(test_fn().unwrap(), 443);
    }
}
