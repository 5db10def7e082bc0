//! Node public keys.
//!
//! Validators identify themselves with 33-byte public keys. A leading `0xED`
//! marks an Ed25519 key; `0x02`/`0x03` mark a compressed secp256k1 key.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::Verifier;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{ED25519_KEY_PREFIX, NODE_PUBLIC_VERSION, PUBLIC_KEY_LEN};
use crate::encoding::{decode_base58check, decode_hex, encode_base58check, encode_hex_upper};
use crate::error::{CoreError, Result};
use crate::hashing::sha512_half;

/// Signature algorithm of a [`PublicKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Ed25519; signs the raw message.
    Ed25519,
    /// secp256k1 ECDSA; signs SHA-512Half of the message, DER-encoded.
    Secp256k1,
}

/// A validated 33-byte node public key.
///
/// Construction checks that the bytes parse as a point of the indicated
/// curve, so a `PublicKey` can always be used for verification.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Parse raw key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            CoreError::MalformedKey(format!(
                "expected {PUBLIC_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;

        let key = PublicKey(raw);
        match key.key_type() {
            Some(KeyType::Ed25519) => {
                ed25519_dalek::VerifyingKey::from_bytes(key.ed25519_bytes())
                    .map_err(|e| CoreError::MalformedKey(format!("invalid ed25519 point: {e}")))?;
            }
            Some(KeyType::Secp256k1) => {
                k256::ecdsa::VerifyingKey::from_sec1_bytes(&raw)
                    .map_err(|e| CoreError::MalformedKey(format!("invalid secp256k1 point: {e}")))?;
            }
            None => {
                return Err(CoreError::MalformedKey(format!(
                    "unknown key type prefix 0x{:02X}",
                    raw[0]
                )))
            }
        }

        Ok(key)
    }

    /// Parse the base58 `n…` node public encoding.
    ///
    /// # Example
    ///
    /// ```
    /// use unlwatch_core::keys::{KeyType, PublicKey};
    ///
    /// let key = PublicKey::from_node_public("nHUpcmNsxAw47yt2ADDoNoQrzLyTJPgnyq16u6Qx2kRPA17oUNHz")?;
    /// assert_eq!(key.key_type(), Some(KeyType::Ed25519));
    /// # Ok::<(), unlwatch_core::CoreError>(())
    /// ```
    pub fn from_node_public(encoded: &str) -> Result<Self> {
        let payload = decode_base58check(NODE_PUBLIC_VERSION, encoded)?;
        Self::from_bytes(&payload)
    }

    /// Parse the 66-character hex form used inside UNL blobs.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = decode_hex(encoded)
            .map_err(|_| CoreError::MalformedKey(format!("invalid hex key: {encoded}")))?;
        Self::from_bytes(&bytes)
    }

    /// Encode as base58 node public (`n…`), the identity persisted in storage.
    pub fn to_node_public(&self) -> String {
        encode_base58check(NODE_PUBLIC_VERSION, &self.0)
    }

    /// Encode as upper-case hex.
    pub fn to_hex(&self) -> String {
        encode_hex_upper(&self.0)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Signature algorithm indicated by the leading byte.
    pub fn key_type(&self) -> Option<KeyType> {
        match self.0[0] {
            ED25519_KEY_PREFIX => Some(KeyType::Ed25519),
            0x02 | 0x03 => Some(KeyType::Secp256k1),
            _ => None,
        }
    }

    fn ed25519_bytes(&self) -> &[u8; 32] {
        self.0[1..]
            .try_into()
            .unwrap_or_else(|_| unreachable!("33-byte key always has a 32-byte tail"))
    }

    /// Verify `signature` over `message`.
    ///
    /// Ed25519 keys verify the raw message. secp256k1 keys verify a DER
    /// signature over `SHA512Half(message)`; high-S signatures are rejected.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        match self.key_type() {
            Some(KeyType::Ed25519) => {
                let key = ed25519_dalek::VerifyingKey::from_bytes(self.ed25519_bytes())
                    .map_err(|e| CoreError::MalformedKey(e.to_string()))?;
                let sig = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|e| CoreError::InvalidSignature(format!("bad ed25519 signature: {e}")))?;
                key.verify(message, &sig)
                    .map_err(|_| CoreError::InvalidSignature(format!("ed25519 verify failed for {self}")))
            }
            Some(KeyType::Secp256k1) => {
                let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(&self.0)
                    .map_err(|e| CoreError::MalformedKey(e.to_string()))?;
                let sig = k256::ecdsa::Signature::from_der(signature)
                    .map_err(|e| CoreError::InvalidSignature(format!("bad DER signature: {e}")))?;
                let digest = sha512_half(message);
                key.verify_prehash(&digest, &sig).map_err(|_| {
                    CoreError::InvalidSignature(format!("secp256k1 verify failed for {self}"))
                })
            }
            None => Err(CoreError::MalformedKey(format!(
                "unknown key type prefix 0x{:02X}",
                self.0[0]
            ))),
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_node_public())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_node_public())
    }
}

/// Accepts either the `n…` base58 form or raw hex.
impl FromStr for PublicKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.len() == PUBLIC_KEY_LEN * 2 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            Self::from_hex(trimmed)
        } else {
            Self::from_node_public(trimmed)
        }
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_node_public())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
