//! Pipeline error classification and the observability error taxonomy

use pnp_common::Error;
use thiserror::Error;

/// Closed taxonomy tag attached to the per-message span on failure.
/// Surfaced for alerting; the set is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTag {
    DecryptionError,
    ParseError,
    ValidationError,
    DbFailure,
}

impl ErrorTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::DecryptionError => "DecryptionError",
            ErrorTag::ParseError => "ParseError",
            ErrorTag::ValidationError => "ValidationError",
            ErrorTag::DbFailure => "DBFailure",
        }
    }
}

/// Outcome classification for one pipeline attempt.
///
/// Transient failures re-enter the retry loop; the message stays on the bus.
/// Permanent failures are acknowledged and dropped with an error log.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("permanent failure ({}): {message}", tag.as_str())]
    Permanent { tag: ErrorTag, message: String },

    #[error("transient failure: {message}")]
    Transient { message: String },
}

impl PipelineError {
    pub fn malformed(message: impl Into<String>) -> Self {
        PipelineError::Permanent {
            tag: ErrorTag::ParseError,
            message: message.into(),
        }
    }

    pub fn decryption(message: impl Into<String>) -> Self {
        PipelineError::Permanent {
            tag: ErrorTag::DecryptionError,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        PipelineError::Transient {
            message: message.into(),
        }
    }

    pub fn tag(&self) -> ErrorTag {
        match self {
            PipelineError::Permanent { tag, .. } => *tag,
            PipelineError::Transient { .. } => ErrorTag::DbFailure,
        }
    }
}

impl From<crate::catalog::CatalogError> for PipelineError {
    fn from(err: crate::catalog::CatalogError) -> Self {
        PipelineError::Transient {
            message: err.to_string(),
        }
    }
}

impl From<Error> for PipelineError {
    fn from(err: Error) -> Self {
        match err {
            Error::Malformed(msg) => PipelineError::Permanent {
                tag: ErrorTag::ParseError,
                message: msg,
            },
            Error::Validation(v) => PipelineError::Permanent {
                tag: ErrorTag::ValidationError,
                message: v.to_string(),
            },
            other if other.is_transient() => PipelineError::Transient {
                message: other.to_string(),
            },
            other => PipelineError::Permanent {
                tag: ErrorTag::ParseError,
                message: other.to_string(),
            },
        }
    }
}
