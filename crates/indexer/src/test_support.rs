//! Fixtures shared by unit tests: signing identities, validator-list
//! documents and throwaway databases.

use ed25519_dalek::Signer;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use serde_json::json;
use tempfile::NamedTempFile;
use unlwatch_core::encoding::{encode_base64, encode_hex_upper};
use unlwatch_core::hashing::sha512_half;
use unlwatch_core::{Manifest, PublicKey, ED25519_KEY_PREFIX, RIPPLE_EPOCH_OFFSET};

use crate::storage::Storage;
use crate::unl::UnlSource;

/// A validator (or publisher) identity: Ed25519 master key, secp256k1
/// ephemeral keys derived per sequence.
pub(crate) struct TestIdentity {
    master: ed25519_dalek::SigningKey,
    seed: u8,
}

impl TestIdentity {
    pub(crate) fn new(seed: u8) -> Self {
        Self {
            master: ed25519_dalek::SigningKey::from_bytes(&[seed; 32]),
            seed,
        }
    }

    pub(crate) fn master_key(&self) -> PublicKey {
        let mut raw = vec![ED25519_KEY_PREFIX];
        raw.extend_from_slice(self.master.verifying_key().as_bytes());
        PublicKey::from_bytes(&raw).unwrap()
    }

    pub(crate) fn master_node_public(&self) -> String {
        self.master_key().to_node_public()
    }

    fn ephemeral(&self, seq: u32) -> k256::ecdsa::SigningKey {
        let mut secret = [self.seed; 32];
        secret[..4].copy_from_slice(&seq.to_be_bytes());
        secret[4] = 0x5A;
        k256::ecdsa::SigningKey::from_slice(&secret).unwrap()
    }

    /// Signing key delegated by the manifest with sequence `seq`.
    pub(crate) fn signing_key(&self, seq: u32) -> PublicKey {
        let point = self.ephemeral(seq).verifying_key().to_encoded_point(true);
        PublicKey::from_bytes(point.as_bytes()).unwrap()
    }

    pub(crate) fn manifest(&self, seq: u32) -> Manifest {
        self.manifest_with_domain(seq, None)
    }

    pub(crate) fn manifest_with_domain(&self, seq: u32, domain: Option<&str>) -> Manifest {
        let mut manifest = Manifest {
            master_key: self.master_key(),
            signing_key: Some(self.signing_key(seq)),
            seq,
            domain: domain.map(str::to_string),
            master_signature: Vec::new(),
            signature: None,
        };
        let data = manifest.signing_data();
        manifest.master_signature = self.master.sign(&data).to_bytes().to_vec();
        manifest.signature = Some(self.sign_with(seq, &data));
        manifest
    }

    pub(crate) fn revocation(&self) -> Manifest {
        let mut manifest = Manifest {
            master_key: self.master_key(),
            signing_key: None,
            seq: unlwatch_core::REVOKED_SEQUENCE,
            domain: None,
            master_signature: Vec::new(),
            signature: None,
        };
        manifest.master_signature = self.master.sign(&manifest.signing_data()).to_bytes().to_vec();
        manifest
    }

    /// DER signature by the ephemeral key of manifest `seq`.
    pub(crate) fn sign_with(&self, seq: u32, message: &[u8]) -> Vec<u8> {
        let signature: k256::ecdsa::Signature = self
            .ephemeral(seq)
            .sign_prehash(&sha512_half(message))
            .unwrap();
        signature.to_der().as_bytes().to_vec()
    }
}

/// Seconds since the Ripple epoch for a Unix timestamp.
pub(crate) fn ripple_time(unix: i64) -> u32 {
    u32::try_from(unix - RIPPLE_EPOCH_OFFSET).unwrap()
}

/// Base64 payload listing `members` (with their manifests when given).
pub(crate) fn unl_blob(sequence: u64, expiration_unix: i64, members: &[(&TestIdentity, Option<u32>)]) -> String {
    let validators: Vec<_> = members
        .iter()
        .map(|(identity, manifest_seq)| {
            let mut entry = json!({ "validation_public_key": identity.master_key().to_hex() });
            if let Some(seq) = manifest_seq {
                entry["manifest"] = json!(identity.manifest(*seq).to_base64());
            }
            entry
        })
        .collect();

    let payload = json!({
        "sequence": sequence,
        "expiration": ripple_time(expiration_unix),
        "validators": validators,
    });
    encode_base64(payload.to_string().as_bytes())
}

/// Version 1 document signed by `publisher`'s manifest `publisher_seq`.
pub(crate) fn unl_document(publisher: &TestIdentity, publisher_seq: u32, blob: &str) -> serde_json::Value {
    let blob_bytes = unlwatch_core::encoding::decode_base64(blob).unwrap();
    json!({
        "public_key": publisher.master_key().to_hex(),
        "manifest": publisher.manifest(publisher_seq).to_base64(),
        "blob": blob,
        "signature": encode_hex_upper(&publisher.sign_with(publisher_seq, &blob_bytes)),
        "version": 1,
    })
}

pub(crate) fn unl_source(url: &str, publisher: &TestIdentity) -> UnlSource {
    UnlSource::new(url, "main", publisher.master_key())
}

pub(crate) async fn temp_storage() -> (Storage, NamedTempFile) {
    let temp_db = NamedTempFile::new().unwrap();
    let storage = Storage::new_with_path(temp_db.path(), None, None)
        .await
        .unwrap();
    storage.run_migrations().await.unwrap();
    (storage, temp_db)
}
