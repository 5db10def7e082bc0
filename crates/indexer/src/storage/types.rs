//! Database types for the indexer storage layer.

use serde::{Deserialize, Serialize};
use unlwatch_core::encoding::encode_hex_upper;
use unlwatch_core::Manifest;

/// A manifest row.
///
/// Keys are stored in their base58 node-public form, signatures as
/// upper-case hex, matching what the read API serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// Master key (primary key).
    pub master_key: String,

    /// Current signing key; absent only for revocations that omit it.
    pub signing_key: Option<String>,

    /// Highest accepted sequence.
    pub seq: u32,

    /// Delegate signature (hex).
    pub signature: Option<String>,

    /// Master signature (hex).
    pub master_signature: String,

    /// Operator-claimed domain.
    pub domain: Option<String>,

    /// Whether `domain` has been independently verified.
    pub domain_verified: bool,

    /// True iff `seq` is the revocation sentinel.
    pub revoked: bool,

    /// Canonical base64 manifest blob.
    pub raw_blob: Option<String>,

    /// Unix seconds of the last accepted write.
    pub updated_at: i64,
}

impl ManifestRecord {
    /// Build the row for a verified manifest.
    ///
    /// `domain_verified` starts false; the storage upsert preserves any prior
    /// verification while the domain is unchanged.
    pub fn from_manifest(manifest: &Manifest, updated_at: i64) -> Self {
        Self {
            master_key: manifest.master_key.to_node_public(),
            signing_key: manifest.signing_key.map(|k| k.to_node_public()),
            seq: manifest.seq,
            signature: manifest.signature.as_deref().map(encode_hex_upper),
            master_signature: encode_hex_upper(&manifest.master_signature),
            domain: manifest.domain.clone(),
            domain_verified: false,
            revoked: manifest.revoked(),
            raw_blob: Some(manifest.to_base64()),
            updated_at,
        }
    }
}

/// A validator row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    /// Signing key observed on the wire (unique).
    pub signing_key: String,

    /// Master key, once resolved through a manifest.
    pub master_key: Option<String>,

    /// Identifier of the UNL publisher currently listing this validator.
    pub unl: Option<String>,

    /// Unix seconds of the last change.
    pub updated_at: i64,
}

impl ValidatorRecord {
    /// Key to ask a ledger node about: the master key when known.
    pub fn lookup_key(&self) -> &str {
        self.master_key.as_deref().unwrap_or(&self.signing_key)
    }
}

/// Last accepted validator list for one publisher endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlSourceRecord {
    /// Endpoint URL (primary key).
    pub url: String,

    /// Identifier written into `validators.unl` (the endpoint host).
    pub source_id: String,

    /// Network this list serves.
    pub network: String,

    /// Pinned publisher master key.
    pub publisher_key: String,

    /// Sequence of the last accepted list.
    pub sequence: u64,

    /// Expiration of the last accepted list (Unix seconds).
    pub expiration: i64,

    /// Number of validators on the last accepted list.
    pub member_count: u64,

    /// Unix seconds of acceptance.
    pub updated_at: i64,
}

/// Effect of an accepted manifest on the validators table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorLink {
    /// A row known only by signing key gained its master key.
    Backfilled,
    /// Nothing to change.
    Unchanged,
    /// The row or the master key is already bound to a different identity.
    Conflict,
}
