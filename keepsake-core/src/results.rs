/*!
Outcome types returned by the save manager.

Every save, load and delete resolves to one of these values; internal errors
never cross the manager boundary. Messages are safe to show to end users, the
raw error is only logged.
*/

use crate::KeepsakeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Coarse outcome category of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultStatus {
    Ok,
    NotFound,
    Corrupt,
    Unauthorized,
    Error,
}

impl ResultStatus {
    /// Generic user-facing message for the status.
    pub fn friendly(&self) -> &'static str {
        match self {
            Self::Ok => "Success.",
            Self::NotFound => "Save not found.",
            Self::Corrupt => "Save data appears to be corrupted.",
            Self::Unauthorized => "Permission denied writing/reading save data.",
            Self::Error => "An error occurred.",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Translate an internal error into a message suitable for end users.
///
/// Translation is keyed on the error category; the error's own text is never
/// included.
pub fn friendly_message(error: &KeepsakeError) -> String {
    let msg = match error {
        KeepsakeError::Io(e) => match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                "Access denied. The application cannot access the save folder."
            }
            std::io::ErrorKind::NotFound => "Save not found.",
            std::io::ErrorKind::WouldBlock => "The save file is locked by another process.",
            _ => "An unexpected error occurred while accessing save data. Try again.",
        },
        KeepsakeError::AuthenticationFailed => {
            "Decryption failed. The save may be corrupted or the key is invalid."
        }
        KeepsakeError::Encryption(_) => "Encryption failed. Try again.",
        KeepsakeError::CryptoUnsupported(_) => {
            "This platform does not support the selected encryption method."
        }
        KeepsakeError::IntegrityCheckFailed { .. }
        | KeepsakeError::InvalidFormat(_)
        | KeepsakeError::Json(_) => "Save data appears to be corrupted.",
        KeepsakeError::Compression(_) => "Save data could not be decompressed.",
        KeepsakeError::MissingTransform(_) => {
            "This save requires a compression or encryption method that is not available."
        }
        KeepsakeError::UnsupportedType { .. } => "Some game state could not be saved or restored.",
        KeepsakeError::DuplicateKey(_) => "Two saved objects share the same identity.",
        KeepsakeError::Cancelled => "Operation canceled.",
        KeepsakeError::Storage(_) => "The save folder could not be accessed.",
        KeepsakeError::Validation(_) => "Invalid save request.",
    };
    msg.to_string()
}

/// Profiling snapshot for one save or load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SaveDiagnostics {
    pub duration_ms: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub compression_ratio: f64,
    /// One of `plain`, `gzip`, `aes-gcm`, `gzip+aes-gcm` (or the bound algorithm names)
    pub pipeline: String,
    pub recovered_from_backup: bool,
}

/// Label describing which transforms produced a body.
pub fn pipeline_label(compress: Option<&str>, encrypt: Option<&str>) -> String {
    match (compress, encrypt) {
        (Some(c), Some(e)) => format!("{c}+{e}"),
        (None, Some(e)) => e.to_string(),
        (Some(c), None) => c.to_string(),
        (None, None) => "plain".to_string(),
    }
}

/// Final body bytes over plain bytes, rounded to four decimals.
pub fn compression_ratio(body_bytes: u64, plain_bytes: u64) -> f64 {
    if plain_bytes == 0 {
        return 1.0;
    }
    let ratio = body_bytes as f64 / plain_bytes as f64;
    (ratio * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveResult {
    pub status: ResultStatus,
    pub message: String,
    pub path: PathBuf,
    pub duration_ms: u64,
    /// Size of the final on-disk body
    pub bytes_written: u64,
    pub compression_ratio: f64,
    pub pipeline: String,
}

impl SaveResult {
    pub(crate) fn failed(error: &KeepsakeError, path: PathBuf, duration_ms: u64) -> Self {
        let status = match error.status() {
            ResultStatus::Unauthorized => ResultStatus::Unauthorized,
            _ => ResultStatus::Error,
        };
        Self {
            status,
            message: friendly_message(error),
            path,
            duration_ms,
            bytes_written: 0,
            compression_ratio: 1.0,
            pipeline: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    pub status: ResultStatus,
    pub message: String,
    pub path: PathBuf,
    pub duration_ms: u64,
    /// Size of the stored body as read from disk
    pub bytes_read: u64,
    /// Final body bytes over decoded plain bytes (1.0 when unknown)
    pub compression_ratio: f64,
    pub recovered_from_backup: bool,
}

impl LoadResult {
    pub(crate) fn not_found(path: PathBuf) -> Self {
        Self {
            status: ResultStatus::NotFound,
            message: ResultStatus::NotFound.friendly().to_string(),
            path,
            duration_ms: 0,
            bytes_read: 0,
            compression_ratio: 1.0,
            recovered_from_backup: false,
        }
    }

    pub(crate) fn failed(error: &KeepsakeError, path: PathBuf, duration_ms: u64) -> Self {
        Self {
            status: error.status(),
            message: friendly_message(error),
            path,
            duration_ms,
            bytes_read: 0,
            compression_ratio: 1.0,
            recovered_from_backup: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    pub status: ResultStatus,
    pub message: String,
    pub path: PathBuf,
}
