/*!
Error types for the Keepsake core engine.
*/

use crate::results::ResultStatus;
use thiserror::Error;

/// Result type used throughout the Keepsake core.
pub type Result<T> = std::result::Result<T, KeepsakeError>;

/// Errors that can occur during save, load and delete operations.
#[derive(Error, Debug)]
pub enum KeepsakeError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression/decompression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Encryption failures that are not authentication failures
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// AEAD tag did not verify (tampering, wrong key or wrong associated data)
    #[error("Authentication failed: ciphertext or header was modified, or the key is wrong")]
    AuthenticationFailed,

    /// The requested cipher cannot run with the supplied key material or platform
    #[error("Encryption not supported: {0}")]
    CryptoUnsupported(String),

    /// Integrity check failures
    #[error("Integrity check failed: expected hash {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    /// Invalid save file format
    #[error("Invalid save format: {0}")]
    InvalidFormat(String),

    /// The header names a transform that is not bound to this manager
    #[error("Missing transform: {0}")]
    MissingTransform(String),

    /// A participant field cannot be represented by the serializer
    #[error("Unsupported type for field '{field}' ({type_name}): {reason}")]
    UnsupportedType {
        field: String,
        type_name: String,
        reason: String,
    },

    /// Two participants resolved to the same stable key
    #[error("Duplicate save key: {0}")]
    DuplicateKey(String),

    /// The operation was cancelled before commit
    #[error("Operation cancelled")]
    Cancelled,

    /// Storage adapter errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl KeepsakeError {
    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new encryption error
    pub fn encryption<S: Into<String>>(msg: S) -> Self {
        Self::Encryption(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new invalid format error
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Create a new unsupported type error
    pub fn unsupported_type<F, T, R>(field: F, type_name: T, reason: R) -> Self
    where
        F: Into<String>,
        T: Into<String>,
        R: Into<String>,
    {
        Self::UnsupportedType {
            field: field.into(),
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Classify the error into the status reported at the orchestrator boundary.
    pub fn status(&self) -> ResultStatus {
        match self {
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ResultStatus::NotFound,
                std::io::ErrorKind::PermissionDenied => ResultStatus::Unauthorized,
                _ => ResultStatus::Error,
            },
            Self::Json(_)
            | Self::Compression(_)
            | Self::AuthenticationFailed
            | Self::IntegrityCheckFailed { .. }
            | Self::InvalidFormat(_) => ResultStatus::Corrupt,
            Self::Encryption(_)
            | Self::CryptoUnsupported(_)
            | Self::MissingTransform(_)
            | Self::UnsupportedType { .. }
            | Self::DuplicateKey(_)
            | Self::Cancelled
            | Self::Storage(_)
            | Self::Validation(_) => ResultStatus::Error,
        }
    }
}
