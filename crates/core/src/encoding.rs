//! Textual encodings used by the ledger: ripple-alphabet base58check, hex and base64.
//!
//! The ledger's base58 differs from Bitcoin's only in alphabet order, so
//! encoding goes through the Bitcoin codec and translates digit by digit.

use base58::{FromBase58, ToBase58};
use base64::Engine;

use crate::error::{CoreError, Result};
use crate::hashing::double_sha256_checksum;

const BITCOIN_ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const RIPPLE_ALPHABET: &[u8; 58] = b"rpshnaf39wBUDNEGHJKLM4PQRST7VWXYZ2bcdeCg65jkm8oFqi1tuvAxyz";

fn translate(input: &str, from: &[u8; 58], to: &[u8; 58]) -> Option<String> {
    input
        .bytes()
        .map(|b| from.iter().position(|&c| c == b).map(|i| to[i] as char))
        .collect()
}

/// Encode `payload` prefixed with `version` as ripple-alphabet base58check.
pub fn encode_base58check(version: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + payload.len() + 4);
    data.push(version);
    data.extend_from_slice(payload);
    let checksum = double_sha256_checksum(&data);
    data.extend_from_slice(&checksum);

    // Every character of the Bitcoin encoding is in the alphabet by construction.
    translate(&data.to_base58(), BITCOIN_ALPHABET, RIPPLE_ALPHABET).unwrap_or_default()
}

/// Decode ripple-alphabet base58check, checking the checksum and version byte.
///
/// Returns the payload with version and checksum stripped.
pub fn decode_base58check(version: u8, input: &str) -> Result<Vec<u8>> {
    let bitcoin = translate(input.trim(), RIPPLE_ALPHABET, BITCOIN_ALPHABET)
        .ok_or_else(|| CoreError::MalformedKey(format!("invalid base58 character in {input}")))?;

    let data = bitcoin
        .from_base58()
        .map_err(|e| CoreError::MalformedKey(format!("invalid base58 ({e:?}): {input}")))?;

    if data.len() < 5 {
        return Err(CoreError::MalformedKey(format!("base58 too short: {input}")));
    }

    let (body, checksum) = data.split_at(data.len() - 4);
    if double_sha256_checksum(body) != checksum {
        return Err(CoreError::MalformedKey(format!("bad checksum: {input}")));
    }
    if body[0] != version {
        return Err(CoreError::MalformedKey(format!(
            "unexpected version byte 0x{:02X} (expected 0x{version:02X})",
            body[0]
        )));
    }

    Ok(body[1..].to_vec())
}

/// Decode hex, accepting either case and an optional `0x` prefix.
pub fn decode_hex(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(trimmed).map_err(|_| CoreError::InvalidHex)
}

/// Encode bytes as upper-case hex, the convention used by ledger APIs.
pub fn encode_hex_upper(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Decode standard base64 (with padding).
pub fn decode_base64(input: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(input.trim())
        .map_err(|_| CoreError::InvalidBase64)
}

/// Encode bytes as standard base64.
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NODE_PUBLIC_VERSION;

    const MASTER: &str = "nHUpcmNsxAw47yt2ADDoNoQrzLyTJPgnyq16u6Qx2kRPA17oUNHz";

    #[test]
    fn test_decode_known_node_public() {
        let payload = decode_base58check(NODE_PUBLIC_VERSION, MASTER).unwrap();
        assert_eq!(
            encode_hex_upper(&payload),
            "ED58F6770DB5DD77E59D28CB650EC3816E2FC95021BB56E720C9A12DA79C58A3AB"
        );
        assert_eq!(encode_base58check(NODE_PUBLIC_VERSION, &payload), MASTER);
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        // Flip the final character.
        let mut tampered = MASTER.to_string();
        tampered.pop();
        tampered.push('r');
        assert!(matches!(
            decode_base58check(NODE_PUBLIC_VERSION, &tampered),
            Err(CoreError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_version() {
        assert!(decode_base58check(0x00, MASTER).is_err());
    }

    #[test]
    fn test_decode_rejects_foreign_alphabet() {
        // '0' and 'l' are not in the ripple alphabet.
        assert!(decode_base58check(NODE_PUBLIC_VERSION, "n0l").is_err());
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(decode_hex("0xED01").unwrap(), vec![0xED, 0x01]);
        assert_eq!(decode_hex("ed01").unwrap(), vec![0xED, 0x01]);
        assert_eq!(decode_hex("zz"), Err(CoreError::InvalidHex));
        assert_eq!(encode_hex_upper(&[0xab, 0x01]), "AB01");
    }
}
