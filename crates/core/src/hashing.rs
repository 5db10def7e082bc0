//! Hashing utilities.
//!
//! The ledger signs secp256k1 messages over SHA-512Half and checksums its
//! base58 encodings with double SHA-256.

use sha2::{Digest, Sha256, Sha512};

/// Compute SHA-512Half: the first 32 bytes of SHA-512 over `data`.
///
/// # Example
///
/// ```
/// use unlwatch_core::hashing::sha512_half;
///
/// let digest = sha512_half(b"hello");
/// assert_eq!(digest.len(), 32);
/// ```
pub fn sha512_half(data: &[u8]) -> [u8; 32] {
    let full = Sha512::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&full[..32]);
    out
}

/// Compute the 4-byte base58check checksum: `SHA256(SHA256(data))[..4]`.
pub fn double_sha256_checksum(data: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[..4]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha512_half_empty() {
        // SHA-512("") truncated to 32 bytes.
        assert_eq!(
            hex::encode(sha512_half(b"")),
            "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce"
        );
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let a = double_sha256_checksum(b"unl");
        let b = double_sha256_checksum(b"unl");
        assert_eq!(a, b);
        assert_ne!(a, double_sha256_checksum(b"unL"));
    }
}
