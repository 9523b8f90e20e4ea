//! Common error types for the PnP pipeline

use std::fmt;
use thiserror::Error;

/// Common result type for PnP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of validation failures the storage gateway may return.
///
/// A record that fails validation will fail identically on every redelivery,
/// so these are permanent and the retry controller never retries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    NoService,
    NoCname,
    BadClassification,
    BadCrnFormat,
    BadState,
    NoCrn,
    NoCrnVersion,
    NoCtype,
    NoLocation,
    NoSource,
    NoSourceId,
}

impl ValidationError {
    /// Stable name used in logs and observability tags
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationError::NoService => "NoService",
            ValidationError::NoCname => "NoCname",
            ValidationError::BadClassification => "BadClassification",
            ValidationError::BadCrnFormat => "BadCrnFormat",
            ValidationError::BadState => "BadState",
            ValidationError::NoCrn => "NoCrn",
            ValidationError::NoCrnVersion => "NoCrnVersion",
            ValidationError::NoCtype => "NoCtype",
            ValidationError::NoLocation => "NoLocation",
            ValidationError::NoSource => "NoSource",
            ValidationError::NoSourceId => "NoSourceId",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common error types across the PnP pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Permanently unprocessable message: failed decryption, unparseable
    /// document, or a missing required field
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Storage rejected the record with a member of the closed validation set
    #[error("Validation error: {0}")]
    Validation(ValidationError),

    /// Operation deadline exceeded
    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error should re-enter the retry loop.
    ///
    /// Connectivity, contention, and deadline errors are transient; the
    /// message stays on the bus and a later attempt may succeed. Everything
    /// else is permanent: malformed input and validation rejections fail the
    /// same way on every redelivery.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Io(_) | Error::Timeout(_)
        )
    }
}
