//! Protocol constants.
//!
//! These values are fixed by the XRP Ledger wire formats and must not change.

/// Manifest sequence that permanently revokes a master key.
pub const REVOKED_SEQUENCE: u32 = u32::MAX;

/// Base58 version byte for node public keys (`n…` addresses).
pub const NODE_PUBLIC_VERSION: u8 = 0x1C;

/// Hash prefix prepended to manifest signing data (`"MAN\0"`).
pub const MANIFEST_PREFIX: [u8; 4] = *b"MAN\0";

/// Length of a serialized public key (type byte + 32 bytes, or compressed SEC1).
pub const PUBLIC_KEY_LEN: usize = 33;

/// First byte of a serialized Ed25519 public key.
pub const ED25519_KEY_PREFIX: u8 = 0xED;

/// Seconds between the Unix epoch and the Ripple epoch (2000-01-01T00:00:00Z).
pub const RIPPLE_EPOCH_OFFSET: i64 = 946_684_800;

/// Convert a Ripple-epoch timestamp (as used by UNL `expiration`) to Unix seconds.
///
/// Ledger times are 32-bit, so the sum cannot overflow.
pub const fn ripple_to_unix(ripple_secs: u32) -> i64 {
    ripple_secs as i64 + RIPPLE_EPOCH_OFFSET
}
