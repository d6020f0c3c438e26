// src/error.rs

//! Error taxonomy for the release engine
//!
//! Library code returns [`Result`]; the command layer wraps these in
//! `anyhow` for reporting. Integrity and validation failures are never
//! downgraded: a release that cannot be proven correct must not be published.

use thiserror::Error;

/// Errors produced by the release engine
#[derive(Error, Debug)]
pub enum Error {
    /// Schema or version mismatch in a loaded catalog, manifest or request
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Missing file, channel, release or feed object
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock busy or concurrent mutation detected
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A recomputed hash does not match the recorded one
    #[error("Checksum mismatch for {subject}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        subject: String,
        expected: String,
        actual: String,
    },

    /// Bookkeeping or round-trip failure (diff/patch, demote count, rebuild)
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Unsupported OS or runtime identifier
    #[error("Unsupported platform: {0}")]
    Platform(String),

    /// Retryable feed or lock-service failure
    #[error("Transient network failure: {0}")]
    TransientNetwork(String),

    /// Binary diff or patch failed
    #[error("Delta error: {0}")]
    DeltaError(String),

    /// Lock used out of order (acquire twice, use after dispose)
    #[error("Lock usage error: {0}")]
    LockUsage(String),

    /// The lease backing a held lock no longer exists
    #[error("Lease lost: {0}")]
    LeaseLost(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the retry policies may try the operation again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::TransientNetwork(_))
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;
