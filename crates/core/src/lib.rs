//! # unlwatch core
//!
//! Protocol primitives for observing the XRP Ledger validator network.
//!
//! This crate has no I/O. It provides the pieces every ingestion path needs
//! before anything is allowed near storage:
//!
//! - **Keys**: Ed25519 and secp256k1 node public keys, their base58
//!   (`n…`) and raw hex encodings, and signature verification
//! - **Manifests**: the binary manifest codec, canonical signing data and
//!   the two-signature delegation check
//! - **Hashing**: SHA-512Half and the base58check checksum
//! - **Constants**: revocation sentinel, encoding versions, epoch offsets

#![warn(missing_docs)]

pub mod constants;
pub mod encoding;
pub mod error;
pub mod hashing;
pub mod keys;
pub mod manifest;

pub use constants::*;
pub use error::{CoreError, Result};
pub use keys::PublicKey;
pub use manifest::{Manifest, ManifestFields};
