//! Validator manifests.
//!
//! A manifest binds a long-lived master key to a short-lived signing key.
//! It is a serialized ledger object carrying these fields, in canonical order:
//!
//! | Field             | Type   | Header      |
//! |-------------------|--------|-------------|
//! | `sfSequence`      | UInt32 | `0x24`      |
//! | `sfPublicKey`     | VL     | `0x71`      |
//! | `sfSigningPubKey` | VL     | `0x73`      |
//! | `sfSignature`     | VL     | `0x76`      |
//! | `sfDomain`        | VL     | `0x77`      |
//! | `sfMasterSignature` | VL   | `0x70 0x12` |
//!
//! Both signatures cover `"MAN\0" || fields-without-signatures`.

use serde::{Deserialize, Serialize};

use crate::constants::{MANIFEST_PREFIX, REVOKED_SEQUENCE};
use crate::encoding::{decode_base64, decode_hex, encode_base64, encode_hex_upper};
use crate::error::{CoreError, Result};
use crate::keys::PublicKey;

const TYPE_UINT32: u8 = 2;
const TYPE_VL: u8 = 7;

const FIELD_SEQUENCE: (u8, u8) = (TYPE_UINT32, 4);
const FIELD_PUBLIC_KEY: (u8, u8) = (TYPE_VL, 1);
const FIELD_SIGNING_PUB_KEY: (u8, u8) = (TYPE_VL, 3);
const FIELD_SIGNATURE: (u8, u8) = (TYPE_VL, 6);
const FIELD_DOMAIN: (u8, u8) = (TYPE_VL, 7);
const FIELD_MASTER_SIGNATURE: (u8, u8) = (TYPE_VL, 18);

/// Upper bound accepted for any single variable-length field.
const MAX_VL_LEN: usize = 1024;

/// A decoded (not yet verified) validator manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Long-term master public key (primary identity).
    pub master_key: PublicKey,
    /// Delegated signing key. Absent only on revocation manifests.
    pub signing_key: Option<PublicKey>,
    /// Sequence number; [`REVOKED_SEQUENCE`] revokes the master key.
    pub seq: u32,
    /// Operator-claimed domain.
    pub domain: Option<String>,
    /// Signature by `master_key` over the signing data.
    pub master_signature: Vec<u8>,
    /// Signature by `signing_key` over the signing data.
    pub signature: Option<Vec<u8>>,
}

impl Manifest {
    /// Whether this manifest revokes its master key.
    pub fn revoked(&self) -> bool {
        self.seq == REVOKED_SEQUENCE
    }

    /// Decode a manifest from its base64 blob.
    pub fn from_base64(blob: &str) -> Result<Self> {
        let bytes = decode_base64(blob)
            .map_err(|_| CoreError::MalformedManifest("manifest is not valid base64".into()))?;
        Self::from_bytes(&bytes)
    }

    /// Decode a manifest from its binary serialization.
    ///
    /// Rejects truncated input, unknown or repeated fields, and manifests that
    /// lack the fields their sequence requires. Keys are fully validated;
    /// signatures are not checked until [`Manifest::verify`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        let mut seq = None;
        let mut master_key = None;
        let mut signing_key = None;
        let mut signature = None;
        let mut domain = None;
        let mut master_signature = None;

        while !reader.is_empty() {
            let field = reader.field_header()?;
            match field {
                FIELD_SEQUENCE => set_once(&mut seq, reader.u32()?, "sfSequence")?,
                FIELD_PUBLIC_KEY => {
                    let key = PublicKey::from_bytes(reader.vl()?)?;
                    set_once(&mut master_key, key, "sfPublicKey")?;
                }
                FIELD_SIGNING_PUB_KEY => {
                    let key = PublicKey::from_bytes(reader.vl()?)?;
                    set_once(&mut signing_key, key, "sfSigningPubKey")?;
                }
                FIELD_SIGNATURE => set_once(&mut signature, reader.vl()?.to_vec(), "sfSignature")?,
                FIELD_DOMAIN => {
                    let raw = reader.vl()?;
                    let text = std::str::from_utf8(raw)
                        .map_err(|_| CoreError::MalformedManifest("domain is not UTF-8".into()))?;
                    set_once(&mut domain, text.to_owned(), "sfDomain")?;
                }
                FIELD_MASTER_SIGNATURE => {
                    set_once(&mut master_signature, reader.vl()?.to_vec(), "sfMasterSignature")?
                }
                (type_code, field_code) => {
                    return Err(CoreError::MalformedManifest(format!(
                        "unexpected field (type {type_code}, field {field_code})"
                    )))
                }
            }
        }

        let manifest = Manifest {
            master_key: master_key
                .ok_or_else(|| CoreError::MalformedManifest("missing sfPublicKey".into()))?,
            signing_key,
            seq: seq.ok_or_else(|| CoreError::MalformedManifest("missing sfSequence".into()))?,
            domain: domain.filter(|d: &String| !d.is_empty()),
            master_signature: master_signature
                .ok_or_else(|| CoreError::MalformedManifest("missing sfMasterSignature".into()))?,
            signature,
        };
        manifest.check_shape()?;
        Ok(manifest)
    }

    /// Field presence rules that depend on revocation.
    fn check_shape(&self) -> Result<()> {
        if self.revoked() {
            // A revocation may carry a delegate, but never half of one.
            if self.signing_key.is_some() != self.signature.is_some() {
                return Err(CoreError::MalformedManifest(
                    "revocation carries only one of sfSigningPubKey and sfSignature".into(),
                ));
            }
            return Ok(());
        }

        let signing_key = self.signing_key.ok_or_else(|| {
            CoreError::MalformedManifest("missing sfSigningPubKey on unrevoked manifest".into())
        })?;
        if self.signature.is_none() {
            return Err(CoreError::MalformedManifest(
                "missing sfSignature on unrevoked manifest".into(),
            ));
        }
        if signing_key == self.master_key {
            return Err(CoreError::MalformedManifest(
                "signing key must differ from master key".into(),
            ));
        }
        Ok(())
    }

    /// Canonical serialization of every field except the two signatures,
    /// prefixed with `"MAN\0"`.
    pub fn signing_data(&self) -> Vec<u8> {
        let mut out = MANIFEST_PREFIX.to_vec();
        self.write_fields(&mut out, false);
        out
    }

    /// Fields in canonical order; signatures only when `with_signatures`.
    fn write_fields(&self, out: &mut Vec<u8>, with_signatures: bool) {
        write_header(out, FIELD_SEQUENCE);
        out.extend_from_slice(&self.seq.to_be_bytes());
        write_header(out, FIELD_PUBLIC_KEY);
        write_vl(out, self.master_key.as_bytes());
        if let Some(signing_key) = &self.signing_key {
            write_header(out, FIELD_SIGNING_PUB_KEY);
            write_vl(out, signing_key.as_bytes());
        }
        if with_signatures {
            if let Some(signature) = &self.signature {
                write_header(out, FIELD_SIGNATURE);
                write_vl(out, signature);
            }
        }
        if let Some(domain) = &self.domain {
            write_header(out, FIELD_DOMAIN);
            write_vl(out, domain.as_bytes());
        }
        if with_signatures {
            write_header(out, FIELD_MASTER_SIGNATURE);
            write_vl(out, &self.master_signature);
        }
    }

    /// Full canonical serialization, signatures included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        self.write_fields(&mut out, true);
        out
    }

    /// Base64 of [`Manifest::to_bytes`].
    pub fn to_base64(&self) -> String {
        encode_base64(&self.to_bytes())
    }

    /// Verify the delegation chain.
    ///
    /// The master signature must verify under `master_key`. The delegate
    /// signature must verify under `signing_key`, proving the delegate
    /// accepted the delegation; a revocation may omit both.
    pub fn verify(&self) -> Result<()> {
        let data = self.signing_data();

        self.master_key
            .verify(&data, &self.master_signature)
            .map_err(|e| match e {
                CoreError::InvalidSignature(msg) => {
                    CoreError::InvalidSignature(format!("master signature: {msg}"))
                }
                other => other,
            })?;

        match (&self.signing_key, &self.signature) {
            (None, None) if self.revoked() => Ok(()),
            (Some(signing_key), Some(signature)) => {
                signing_key.verify(&data, signature).map_err(|e| match e {
                    CoreError::InvalidSignature(msg) => {
                        CoreError::InvalidSignature(format!("delegate signature: {msg}"))
                    }
                    other => other,
                })
            }
            _ => Err(CoreError::MalformedManifest(
                "manifest carries only one of signing key and signature".into(),
            )),
        }
    }

    /// Textual representation as exposed by ledger APIs.
    pub fn to_fields(&self) -> ManifestFields {
        ManifestFields {
            master_key: self.master_key.to_node_public(),
            signing_key: self.signing_key.map(|k| k.to_node_public()),
            seq: u64::from(self.seq),
            master_signature: encode_hex_upper(&self.master_signature),
            signature: self.signature.as_deref().map(encode_hex_upper),
            domain: self.domain.clone(),
        }
    }
}

/// Manifest in the textual form used by JSON APIs: base58 keys, hex signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFields {
    /// Master key (`nH…`).
    pub master_key: String,
    /// Signing key (`n9…`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
    /// Sequence; must fit in 32 bits.
    pub seq: u64,
    /// Hex master signature.
    pub master_signature: String,
    /// Hex delegate signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Claimed domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl TryFrom<&ManifestFields> for Manifest {
    type Error = CoreError;

    fn try_from(fields: &ManifestFields) -> Result<Self> {
        let master_key = PublicKey::from_node_public(&fields.master_key)?;
        let signing_key = fields
            .signing_key
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(PublicKey::from_node_public)
            .transpose()?;

        let seq = u32::try_from(fields.seq).map_err(|_| {
            CoreError::MalformedManifest(format!("sequence {} exceeds 32 bits", fields.seq))
        })?;

        let master_signature = decode_hex(&fields.master_signature)?;
        let signature = fields
            .signature
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(decode_hex)
            .transpose()?;

        let manifest = Manifest {
            master_key,
            signing_key,
            seq,
            domain: fields.domain.clone().filter(|d| !d.is_empty()),
            master_signature,
            signature,
        };
        manifest.check_shape()?;
        Ok(manifest)
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, name: &str) -> Result<()> {
    if slot.is_some() {
        return Err(CoreError::MalformedManifest(format!("duplicate field {name}")));
    }
    *slot = Some(value);
    Ok(())
}

fn write_header(out: &mut Vec<u8>, (type_code, field_code): (u8, u8)) {
    match (type_code < 16, field_code < 16) {
        (true, true) => out.push((type_code << 4) | field_code),
        (true, false) => out.extend_from_slice(&[type_code << 4, field_code]),
        (false, true) => out.extend_from_slice(&[field_code, type_code]),
        (false, false) => out.extend_from_slice(&[0, type_code, field_code]),
    }
}

fn write_vl(out: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len <= 192 {
        out.push(len as u8);
    } else if len <= 12_480 {
        let n = len - 193;
        out.extend_from_slice(&[193 + (n >> 8) as u8, (n & 0xFF) as u8]);
    } else {
        let n = len - 12_481;
        out.extend_from_slice(&[
            241 + (n >> 16) as u8,
            ((n >> 8) & 0xFF) as u8,
            (n & 0xFF) as u8,
        ]);
    }
    out.extend_from_slice(data);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                CoreError::MalformedManifest(format!("truncated at byte {}", self.pos))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn field_header(&mut self) -> Result<(u8, u8)> {
        let first = self.byte()?;
        let mut type_code = first >> 4;
        let mut field_code = first & 0x0F;
        if type_code == 0 {
            type_code = self.byte()?;
        }
        if field_code == 0 {
            field_code = self.byte()?;
        }
        Ok((type_code, field_code))
    }

    fn u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn vl(&mut self) -> Result<&'a [u8]> {
        let b1 = self.byte()? as usize;
        let len = match b1 {
            0..=192 => b1,
            193..=240 => {
                let b2 = self.byte()? as usize;
                193 + (b1 - 193) * 256 + b2
            }
            241..=254 => {
                let b2 = self.byte()? as usize;
                let b3 = self.byte()? as usize;
                12_481 + (b1 - 241) * 65_536 + b2 * 256 + b3
            }
            _ => {
                return Err(CoreError::MalformedManifest(format!(
                    "invalid length prefix {b1}"
                )))
            }
        };
        if len > MAX_VL_LEN {
            return Err(CoreError::MalformedManifest(format!(
                "field length {len} exceeds {MAX_VL_LEN}"
            )));
        }
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ED25519_KEY_PREFIX;
    use ed25519_dalek::{Signer, SigningKey};

    /// Manifest returned by a mainnet node's `manifest` RPC (seq 8).
    const MAINNET_BLOB: &str = "JAAAAAhxIe1Y9ncNtd135Z0oy2UOw4FuL8lQIbtW5yDJoS2nnFijq3MhAsU/G2z13j7v0bqWr861QB8DL5KBKgfHj0/DLIbIWIEadkYwRAIgCj9uzQIYwk2UzxKJL2v0G/0bflh5PQXbQaGidnKQjBECIGIhAU5/qY1b5DIDwA2ZRonwfCOzRVGKMpe9mscOoAyEcBJAQTp5imRSxnUamaA5esXZh8dMX8aaiA3SObS7C5ORWIoK3HUqIpqU8/wFqTd/iumFvVScYF31+H6pvnNKRHvDDg==";

    fn ed25519_key(signer: &SigningKey) -> PublicKey {
        let mut raw = vec![ED25519_KEY_PREFIX];
        raw.extend_from_slice(signer.verifying_key().as_bytes());
        PublicKey::from_bytes(&raw).unwrap()
    }

    fn signed(master: &SigningKey, ephemeral: Option<&SigningKey>, seq: u32) -> Manifest {
        let mut manifest = Manifest {
            master_key: ed25519_key(master),
            signing_key: ephemeral.map(ed25519_key),
            seq,
            domain: None,
            master_signature: Vec::new(),
            signature: None,
        };
        let data = manifest.signing_data();
        manifest.master_signature = master.sign(&data).to_bytes().to_vec();
        manifest.signature = ephemeral.map(|k| k.sign(&data).to_bytes().to_vec());
        manifest
    }

    #[test]
    fn test_decode_mainnet_manifest() {
        let manifest = Manifest::from_base64(MAINNET_BLOB).unwrap();
        assert_eq!(manifest.seq, 8);
        assert!(!manifest.revoked());
        assert_eq!(
            manifest.master_key.to_node_public(),
            "nHUpcmNsxAw47yt2ADDoNoQrzLyTJPgnyq16u6Qx2kRPA17oUNHz"
        );
        assert_eq!(
            manifest.signing_key.unwrap().to_node_public(),
            "n9Ls4GcrofTvLvymKh1wCqxw1aLzXUumyBBD9fAtbkk9WtdQ4TUH"
        );
        assert_eq!(manifest.domain, None);

        let fields = manifest.to_fields();
        assert_eq!(
            fields.master_signature,
            "413A798A6452C6751A99A0397AC5D987C74C5FC69A880DD239B4BB0B9391588A0ADC752A229A94F3FC05A9377F8AE985BD549C605DF5F87EA9BE734A447BC30E"
        );
        assert_eq!(
            fields.signature.as_deref(),
            Some("304402200A3F6ECD0218C24D94CF12892F6BF41BFD1B7E58793D05DB41A1A27672908C1102206221014E7FA98D5BE43203C00D994689F07C23B345518A3297BD9AC70EA00C84")
        );

        manifest.verify().unwrap();
        assert_eq!(manifest.to_base64(), MAINNET_BLOB);
    }

    #[test]
    fn test_fields_form_verifies() {
        let fields = ManifestFields {
            master_key: "nHDaeKJcfRzzmx3gGKnrFTQazYi95tdGrdoiCYLinoU9EkJsp4Ho".into(),
            master_signature: "7CA31C480E2ED7DBD1C2A0CA950545C73C7EB9838D5A5C5D16D61DFDB47EBC23DAF2BD25B9AA4FE5B8E39D30C575501BC7EE4042E068D935D6D97391B3B46706".into(),
            seq: 1,
            signature: Some("30440220711EC38538E10E01198086D85D4728E81993ADD0746E6D3CEF2E12DC3C3A3A92022046F698FD1B1B3222498049D6006E95EC1422C4E0CB2BFD0D210A4709BAF17A08".into()),
            signing_key: Some("n9KhXam7XB436XHhzo3aTzEW5NxkKwVDkuy9DwdDC1ja8j8mv3ot".into()),
            domain: None,
        };
        let manifest = Manifest::try_from(&fields).unwrap();
        manifest.verify().unwrap();
        assert_eq!(manifest.to_fields(), fields);
    }

    #[test]
    fn test_tampered_sequence_fails_verification() {
        let mut manifest = Manifest::from_base64(MAINNET_BLOB).unwrap();
        manifest.seq = 9;
        assert!(matches!(
            manifest.verify(),
            Err(CoreError::InvalidSignature(msg)) if msg.starts_with("master signature")
        ));
    }

    #[test]
    fn test_swapped_delegate_signature_fails() {
        let master = SigningKey::from_bytes(&[1u8; 32]);
        let ephemeral = SigningKey::from_bytes(&[2u8; 32]);
        let intruder = SigningKey::from_bytes(&[3u8; 32]);

        let mut manifest = signed(&master, Some(&ephemeral), 4);
        manifest.verify().unwrap();

        manifest.signature = Some(intruder.sign(&manifest.signing_data()).to_bytes().to_vec());
        assert!(matches!(
            manifest.verify(),
            Err(CoreError::InvalidSignature(msg)) if msg.starts_with("delegate signature")
        ));
    }

    #[test]
    fn test_revocation_needs_only_master_signature() {
        let master = SigningKey::from_bytes(&[9u8; 32]);
        let manifest = signed(&master, None, REVOKED_SEQUENCE);
        assert!(manifest.revoked());
        manifest.verify().unwrap();

        let decoded = Manifest::from_bytes(&manifest.to_bytes()).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn test_revocation_with_half_a_delegate_is_rejected() {
        let master = SigningKey::from_bytes(&[10u8; 32]);
        let ephemeral = SigningKey::from_bytes(&[11u8; 32]);

        let mut key_only = signed(&master, None, REVOKED_SEQUENCE);
        key_only.signing_key = Some(ed25519_key(&ephemeral));
        key_only.master_signature = master.sign(&key_only.signing_data()).to_bytes().to_vec();
        assert!(matches!(
            Manifest::from_bytes(&key_only.to_bytes()),
            Err(CoreError::MalformedManifest(_))
        ));
        assert!(matches!(key_only.verify(), Err(CoreError::MalformedManifest(_))));

        let mut signature_only = signed(&master, None, REVOKED_SEQUENCE);
        signature_only.signature = Some(vec![0xAB; 64]);
        assert!(matches!(
            Manifest::from_bytes(&signature_only.to_bytes()),
            Err(CoreError::MalformedManifest(_))
        ));
    }

    #[test]
    fn test_revocation_delegate_signature_is_checked() {
        let master = SigningKey::from_bytes(&[12u8; 32]);
        let ephemeral = SigningKey::from_bytes(&[13u8; 32]);
        let intruder = SigningKey::from_bytes(&[14u8; 32]);

        let mut manifest = signed(&master, Some(&ephemeral), REVOKED_SEQUENCE);
        assert!(manifest.revoked());
        Manifest::from_bytes(&manifest.to_bytes()).unwrap().verify().unwrap();

        manifest.signature = Some(intruder.sign(&manifest.signing_data()).to_bytes().to_vec());
        let decoded = Manifest::from_bytes(&manifest.to_bytes()).unwrap();
        assert!(matches!(
            decoded.verify(),
            Err(CoreError::InvalidSignature(msg)) if msg.starts_with("delegate signature")
        ));
    }

    #[test]
    fn test_unrevoked_manifest_requires_signing_key() {
        let master = SigningKey::from_bytes(&[9u8; 32]);
        let manifest = signed(&master, None, 3);
        assert!(matches!(
            Manifest::from_bytes(&manifest.to_bytes()),
            Err(CoreError::MalformedManifest(_))
        ));
    }

    #[test]
    fn test_domain_case_survives_roundtrip() {
        let master = SigningKey::from_bytes(&[4u8; 32]);
        let ephemeral = SigningKey::from_bytes(&[5u8; 32]);
        let mut manifest = signed(&master, Some(&ephemeral), 2);
        manifest.domain = Some("Example.COM".into());
        let data = manifest.signing_data();
        manifest.master_signature = master.sign(&data).to_bytes().to_vec();
        manifest.signature = Some(ephemeral.sign(&data).to_bytes().to_vec());

        let decoded = Manifest::from_base64(&manifest.to_base64()).unwrap();
        assert_eq!(decoded.domain.as_deref(), Some("Example.COM"));
        decoded.verify().unwrap();

        let from_fields = Manifest::try_from(&decoded.to_fields()).unwrap();
        assert_eq!(from_fields, decoded);
        from_fields.verify().unwrap();
    }

    #[test]
    fn test_domain_is_covered_by_signatures() {
        let master = SigningKey::from_bytes(&[6u8; 32]);
        let ephemeral = SigningKey::from_bytes(&[7u8; 32]);
        let mut manifest = signed(&master, Some(&ephemeral), 2);
        manifest.domain = Some("example.com".into());
        assert!(manifest.verify().is_err());

        let data = manifest.signing_data();
        manifest.master_signature = master.sign(&data).to_bytes().to_vec();
        manifest.signature = Some(ephemeral.sign(&data).to_bytes().to_vec());
        manifest.verify().unwrap();

        manifest.domain = Some("attacker.example".into());
        assert!(manifest.verify().is_err());
    }

    #[test]
    fn test_rejects_truncated_and_unknown_fields() {
        let bytes = Manifest::from_base64(MAINNET_BLOB).unwrap().to_bytes();
        assert!(matches!(
            Manifest::from_bytes(&bytes[..bytes.len() - 3]),
            Err(CoreError::MalformedManifest(_))
        ));

        // sfFlags (UInt32, field 2) is not part of a manifest.
        let mut with_flags = vec![0x22, 0, 0, 0, 0];
        with_flags.extend_from_slice(&bytes);
        assert!(matches!(
            Manifest::from_bytes(&with_flags),
            Err(CoreError::MalformedManifest(_))
        ));

        let mut duplicated = bytes.clone();
        duplicated.extend_from_slice(&[0x24, 0, 0, 0, 1]);
        assert!(Manifest::from_bytes(&duplicated).is_err());
    }

    #[test]
    fn test_fields_reject_bad_key_and_wide_sequence() {
        let mut fields = Manifest::from_base64(MAINNET_BLOB).unwrap().to_fields();
        fields.seq = u64::from(u32::MAX) + 1;
        assert!(matches!(
            Manifest::try_from(&fields),
            Err(CoreError::MalformedManifest(_))
        ));

        fields.seq = 8;
        fields.master_key = "nHnotakey".into();
        assert!(matches!(
            Manifest::try_from(&fields),
            Err(CoreError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_vl_length_encoding() {
        for len in [0usize, 192, 193, 500, 12_480, 12_481, 20_000] {
            let data = vec![0xAB; len];
            let mut out = Vec::new();
            write_vl(&mut out, &data);
            let mut reader = Reader::new(&out);
            if len > MAX_VL_LEN {
                assert!(reader.vl().is_err());
            } else {
                assert_eq!(reader.vl().unwrap().len(), len);
                assert!(reader.is_empty());
            }
        }
    }
}
