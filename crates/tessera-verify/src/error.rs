//! Error types for the verification subsystem.

use tessera_craft::error::{AttestationError, PredicateError};

/// Errors from verifying and extracting attestations.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// No signature verified against the supplied key.
    #[error("signature verification failed: {0}")]
    InvalidSignature(String),

    /// The envelope cannot be decoded.
    #[error("corrupt envelope: {0}")]
    Envelope(#[from] AttestationError),

    /// The predicate cannot be normalized.
    #[error("predicate extraction failed: {0}")]
    Extraction(#[from] PredicateError),

    /// Digest mismatch.
    #[error("digest mismatch for `{artifact}`: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The artifact whose digest was checked.
        artifact: String,
        /// Expected hex digest.
        expected: String,
        /// Actual hex digest.
        actual: String,
    },

    /// An output material has no matching statement subject.
    #[error("output material `{0}` is not among the statement subjects")]
    MissingSubject(String),

    /// An output file name would resolve outside the base directory.
    #[error("output file name `{0}` is not a plain file name")]
    UnsafeFileName(String),

    /// I/O error during verification.
    #[error("verification I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
