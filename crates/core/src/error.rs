//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A public key did not decode to a recognised key encoding.
    #[error("Malformed public key: {0}")]
    MalformedKey(String),

    /// A manifest blob could not be decoded.
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    /// A signature failed to verify against its claimed key.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Invalid hex encoding.
    #[error("Invalid hex encoding")]
    InvalidHex,

    /// Invalid base64 encoding.
    #[error("Invalid base64 encoding")]
    InvalidBase64,
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
