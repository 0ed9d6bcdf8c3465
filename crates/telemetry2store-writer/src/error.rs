//! Error types for the feature store writer

use std::path::PathBuf;
use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E001: Row store could not be opened or initialised
    E001RowStoreUnavailable,
    /// E002: Archive directory could not be prepared
    E002ArchiveUnavailable,
    /// E003: Batch could not be encoded as Parquet
    E003EncodeFailure,
    /// E004: Write operation failed
    E004WriteFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E001RowStoreUnavailable => "E001",
            Self::E002ArchiveUnavailable => "E002",
            Self::E003EncodeFailure => "E003",
            Self::E004WriteFailure => "E004",
        }
    }
}

/// Errors that can occur while persisting a batch
#[derive(Debug, Error)]
pub enum WriterError {
    /// Row store could not be opened
    #[error("[{code}] Row store at '{}' is unavailable: {reason}", path.display())]
    RowStoreUnavailable {
        code: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// Archive directory could not be created or opened
    #[error("[{code}] Archive directory '{}' is unavailable: {reason}", path.display())]
    ArchiveUnavailable {
        code: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// Arrow/Parquet encoding failed
    #[error("[{code}] Failed to encode archive batch: {message}")]
    Encode { code: &'static str, message: String },

    /// Write operation failed
    #[error("[{code}] Write operation failed: {message}")]
    WriteFailure { code: &'static str, message: String },
}

impl WriterError {
    pub fn row_store_unavailable(path: impl Into<PathBuf>, reason: String) -> Self {
        Self::RowStoreUnavailable {
            code: ErrorCode::E001RowStoreUnavailable.as_str(),
            path: path.into(),
            reason,
        }
    }

    pub fn archive_unavailable(path: impl Into<PathBuf>, reason: String) -> Self {
        Self::ArchiveUnavailable {
            code: ErrorCode::E002ArchiveUnavailable.as_str(),
            path: path.into(),
            reason,
        }
    }

    pub fn encode(message: String) -> Self {
        Self::Encode {
            code: ErrorCode::E003EncodeFailure.as_str(),
            message,
        }
    }

    /// Create a write failure error with error code
    pub fn write_failure(message: String) -> Self {
        Self::WriteFailure {
            code: ErrorCode::E004WriteFailure.as_str(),
            message,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::RowStoreUnavailable { code, .. }
            | Self::ArchiveUnavailable { code, .. }
            | Self::Encode { code, .. }
            | Self::WriteFailure { code, .. } => *code,
        }
    }
}

/// Result type alias for WriterError
pub type Result<T> = std::result::Result<T, WriterError>;
