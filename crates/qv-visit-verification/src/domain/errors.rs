//! # Errors
//!
//! Error types for the visit-verification pipeline.
//!
//! Local scan failures (format, expiry, digest, replay) are not errors at the
//! API boundary: they surface as [`RejectReason`](super::RejectReason). The
//! enums here cover codec parsing and the storage/persistence layer.

use thiserror::Error;

use super::entities::{VisitId, VisitStatus};

/// Malformed QR payload. Local and never retryable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormatError {
    /// Payload does not split into exactly four fields.
    #[error("Expected 4 fields, found {found}")]
    FieldCount { found: usize },

    /// A field is empty.
    #[error("Field `{field}` is empty")]
    EmptyField { field: &'static str },

    /// A field contains the `|` separator (encode side).
    #[error("Field `{field}` contains the separator")]
    EmbeddedSeparator { field: &'static str },

    /// Timestamp is not a decimal unsigned integer.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Digest is not valid hex.
    #[error("Invalid digest hex: {0}")]
    InvalidDigest(String),

    /// Payload contains non-ASCII characters.
    #[error("Payload is not ASCII")]
    NonAscii,
}

/// Key-value store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KVStoreError {
    /// I/O error during read/write.
    #[error("KV store I/O error: {message}")]
    IOError { message: String },

    /// Stored bytes could not be decoded.
    #[error("KV store corruption: {message}")]
    CorruptionError { message: String },
}

/// Replay ledger errors (persistence only; replay outcomes are results).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger storage failure: {0}")]
    Storage(#[from] KVStoreError),

    #[error("Token encoding failed: {0}")]
    Format(#[from] FormatError),

    #[error("Ledger record serialization failed: {0}")]
    Serialization(String),

    /// Staging of the companion visit record failed.
    #[error("Staging companion write failed: {0}")]
    Staging(String),
}

/// Visit record store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VisitStoreError {
    #[error("Visit storage failure: {0}")]
    Storage(#[from] KVStoreError),

    #[error("Visit record serialization failed: {0}")]
    Serialization(String),

    #[error("Visit not found: {0}")]
    NotFound(VisitId),

    /// Compare-and-set lost: the record is not in the expected status.
    #[error("Visit {visit_id} is {actual}, expected {expected}")]
    StatusConflict {
        visit_id: VisitId,
        expected: VisitStatus,
        actual: VisitStatus,
    },

    #[error("Illegal visit transition {from} -> {to}")]
    IllegalTransition { from: VisitStatus, to: VisitStatus },

    /// The blocking task running the store call panicked or was cancelled.
    #[error("Visit store task failed: {0}")]
    TaskFailed(String),
}

/// Caller-facing error of the service API.
///
/// Persistence failures are logged where they happen and downgraded to
/// `Internal`; details never leak past the component boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Input would not produce a well-formed token.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Visit not found: {0}")]
    NotFound(VisitId),

    #[error("Internal error")]
    Internal,
}

impl ServiceError {
    /// Stable reason code for UI display.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidInput(_) => "invalid-input",
            ServiceError::NotFound(_) => "not-found",
            ServiceError::Internal => "internal-error",
        }
    }
}
