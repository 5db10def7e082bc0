//! Error types for ingestion.
//!
//! Everything except [`IngestError::Persistence`] is a per-item failure: the
//! offending input is rejected and the rest of the batch continues.
//! Persistence errors abort the job and are retried on its next run.

use thiserror::Error;
use unlwatch_core::CoreError;

/// Ingestion error type.
#[derive(Error, Debug)]
pub enum IngestError {
    /// A public key did not decode.
    #[error("Malformed key: {0}")]
    MalformedKey(String),

    /// A manifest blob or field set is structurally invalid.
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    /// A signature failed to verify.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// The publisher's manifest does not chain to the pinned master key.
    #[error("Invalid publisher: {0}")]
    InvalidPublisher(String),

    /// A validator list whose sequence does not advance past the last accepted one.
    #[error("Stale sequence: candidate {candidate} is not newer than {current}")]
    StaleSequence {
        /// Sequence offered.
        candidate: u64,
        /// Sequence already accepted.
        current: u64,
    },

    /// The master key is revoked; no manifest will ever be accepted for it.
    #[error("Master key {0} is revoked")]
    Revoked(String),

    /// The validator list expired.
    #[error("Validator list expired at {expiration} (now {now})")]
    Expired {
        /// Expiration (Unix seconds).
        expiration: i64,
        /// Time of the check (Unix seconds).
        now: i64,
    },

    /// Transport failure or timeout talking to a remote source.
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// The ledger node reported no manifest for the requested key.
    #[error("No manifest found for {0}")]
    NotFound(String),

    /// A validator list document could not be decoded.
    #[error("Malformed UNL document: {0}")]
    MalformedUnlDocument(String),

    /// A domain's `xrp-ledger.toml` could not be parsed.
    #[error("Invalid xrp-ledger.toml: {0}")]
    InvalidDomainToml(String),

    /// Storage failure.
    #[error("Persistence error: {0:#}")]
    Persistence(anyhow::Error),
}

impl IngestError {
    /// Whether this error should abort the whole job rather than one item.
    pub fn is_persistence(&self) -> bool {
        matches!(self, IngestError::Persistence(_))
    }
}

impl From<anyhow::Error> for IngestError {
    fn from(err: anyhow::Error) -> Self {
        IngestError::Persistence(err)
    }
}

impl From<CoreError> for IngestError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MalformedKey(msg) => IngestError::MalformedKey(msg),
            CoreError::InvalidSignature(msg) => IngestError::InvalidSignature(msg),
            CoreError::MalformedManifest(msg) => IngestError::MalformedManifest(msg),
            CoreError::InvalidHex | CoreError::InvalidBase64 => {
                IngestError::MalformedManifest(err.to_string())
            }
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        IngestError::NetworkFailure(err.to_string())
    }
}

/// Result type alias for IngestError.
pub type Result<T> = std::result::Result<T, IngestError>;
