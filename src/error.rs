//! Error types for vigil-audit

use thiserror::Error;

/// Errors that can occur in the audit subsystem
#[derive(Debug, Error)]
pub enum AuditError {
    /// Malformed event, export, or import request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Signature mismatch detected during verification
    #[error("Integrity violation on record '{record_id}': {reason}")]
    IntegrityViolation { record_id: String, reason: String },

    /// Write attempt against a protected field on an already-signed record
    #[error("Tamper attempt on record '{record_id}': field '{field}' is protected")]
    TamperAttempt { record_id: String, field: String },

    /// Backup artifact missing, truncated, or checksum mismatch
    #[error("Backup corruption in '{path}': {reason}")]
    BackupCorruption { path: String, reason: String },

    /// Backup or restore pipeline aborted at a specific stage
    #[error("Backup job failed at stage '{stage}': {reason}")]
    BackupFailed { stage: String, reason: String },

    /// Key or cipher failure during backup encryption/decryption
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O failure (backup artifacts)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Long-running operation exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;
