//! Validator list (UNL) fetching and verification.
//!
//! A publisher serves a JSON document wrapping a base64 payload:
//!
//! ```text
//! v1: { public_key, manifest, blob, signature, version: 1 }
//! v2: { public_key, manifest, blobs_v2: [{ blob, signature, manifest? }], version: 2 }
//! payload: { sequence, expiration, effective?, validators: [{ validation_public_key, manifest? }] }
//! ```
//!
//! The payload is only trusted once the publisher's manifest chains to the
//! master key pinned in configuration, the blob signature verifies under the
//! publisher's current signing key, the list is unexpired, and its sequence
//! is newer than the last one accepted from the same endpoint.

use std::collections::BTreeSet;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use unlwatch_core::encoding::{decode_base64, decode_hex};
use unlwatch_core::{ripple_to_unix, Manifest, PublicKey};

use crate::error::{IngestError, Result};
use crate::http::read_capped;
use crate::manifests::ManifestProcessor;
use crate::storage::{now_unix, Storage};

/// A configured publisher endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlSource {
    /// Endpoint URL.
    pub url: String,
    /// Identifier written into `validators.unl`: the endpoint host.
    pub id: String,
    /// Network this list serves.
    pub network: String,
    /// Pinned publisher master key.
    pub publisher_key: PublicKey,
}

impl UnlSource {
    /// Build a source, deriving its identifier from the URL host.
    pub fn new(url: &str, network: &str, publisher_key: PublicKey) -> Self {
        let id = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| {
                u.host_str().map(|host| match u.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                })
            })
            .unwrap_or_else(|| url.to_string());

        Self {
            url: url.to_string(),
            id,
            network: network.to_string(),
            publisher_key,
        }
    }
}

/// Publisher document as served.
#[derive(Debug, Clone, Deserialize)]
pub struct UnlDocument {
    /// Format version (1 or 2).
    #[serde(default = "default_version")]
    pub version: u32,
    /// Publisher master key, hex.
    #[serde(default)]
    pub public_key: Option<String>,
    /// Publisher manifest, base64.
    #[serde(default)]
    pub manifest: Option<String>,
    /// v1 payload, base64.
    #[serde(default)]
    pub blob: Option<String>,
    /// v1 signature over the decoded blob, hex.
    #[serde(default)]
    pub signature: Option<String>,
    /// v2 payloads.
    #[serde(default)]
    pub blobs_v2: Vec<UnlBlobV2>,
}

fn default_version() -> u32 {
    1
}

/// One signed payload of a v2 document.
#[derive(Debug, Clone, Deserialize)]
pub struct UnlBlobV2 {
    /// Payload, base64.
    pub blob: String,
    /// Signature over the decoded blob, hex.
    pub signature: String,
    /// Publisher manifest overriding the top-level one.
    #[serde(default)]
    pub manifest: Option<String>,
}

/// Decoded payload.
#[derive(Debug, Clone, Deserialize)]
pub struct UnlPayload {
    /// List sequence.
    pub sequence: u64,
    /// Expiration, seconds since the Ripple epoch.
    pub expiration: u32,
    /// Start of validity, seconds since the Ripple epoch.
    #[serde(default)]
    pub effective: Option<u32>,
    /// Listed validators.
    pub validators: Vec<UnlMember>,
}

/// One listed validator.
#[derive(Debug, Clone, Deserialize)]
pub struct UnlMember {
    /// Master key, hex.
    pub validation_public_key: String,
    /// The validator's manifest, base64.
    #[serde(default)]
    pub manifest: Option<String>,
}

/// A verified validator list, ready for reconciliation.
#[derive(Debug, Clone)]
pub struct FetchedUnl {
    /// Where it came from.
    pub source: UnlSource,
    /// List sequence.
    pub sequence: u64,
    /// Expiration (Unix seconds).
    pub expiration: i64,
    /// Listed master keys, node-public form.
    pub members: BTreeSet<String>,
    /// Manifests embedded for listed validators (decoded, not yet verified).
    pub member_manifests: Vec<Manifest>,
}

/// A signed payload picked out of a document, with its decoded contents.
struct Candidate<'a> {
    blob: Vec<u8>,
    signature: &'a str,
    manifest: Option<&'a str>,
    payload: UnlPayload,
}

/// Fetches and verifies validator lists.
#[derive(Debug, Clone)]
pub struct UnlFetcher {
    client: Client,
    processor: ManifestProcessor,
    max_response_bytes: usize,
}

impl UnlFetcher {
    /// Create a fetcher. `client` carries the request timeout.
    pub fn new(client: Client, processor: ManifestProcessor, max_response_bytes: usize) -> Self {
        Self {
            client,
            processor,
            max_response_bytes,
        }
    }

    fn storage(&self) -> &Storage {
        self.processor.storage()
    }

    /// Fetch, decode and verify the current list from `source`.
    pub async fn fetch(&self, source: &UnlSource) -> Result<FetchedUnl> {
        debug!(url = %source.url, "Fetching validator list");

        let response = self.client.get(&source.url).send().await?;
        let body = read_capped(response, self.max_response_bytes, IngestError::MalformedUnlDocument)
            .await?;

        let document: UnlDocument = serde_json::from_slice(&body)
            .map_err(|e| IngestError::MalformedUnlDocument(format!("invalid JSON: {e}")))?;

        self.verify_document(source, &document, now_unix()).await
    }

    /// Verify an already-fetched document at time `now` (Unix seconds).
    pub async fn verify_document(
        &self,
        source: &UnlSource,
        document: &UnlDocument,
        now: i64,
    ) -> Result<FetchedUnl> {
        let candidate = select_candidate(document, now)?;
        let sequence = candidate.payload.sequence;
        if i64::try_from(sequence).is_err() {
            return Err(IngestError::MalformedUnlDocument(format!(
                "sequence {sequence} out of range"
            )));
        }
        let members = decode_members(&candidate.payload)?;

        let signing_key = self
            .publisher_signing_key(source, document, candidate.manifest)
            .await?;

        let signature = decode_hex(candidate.signature)
            .map_err(|_| IngestError::MalformedUnlDocument("signature is not hex".into()))?;
        signing_key
            .verify(&candidate.blob, &signature)
            .map_err(|e| IngestError::InvalidSignature(format!("validator list blob: {e}")))?;

        let expiration = ripple_to_unix(candidate.payload.expiration);
        if expiration <= now {
            return Err(IngestError::Expired { expiration, now });
        }

        if let Some(accepted) = self.storage().get_unl_source(&source.url).await? {
            if sequence <= accepted.sequence {
                return Err(IngestError::StaleSequence {
                    candidate: sequence,
                    current: accepted.sequence,
                });
            }
        }

        let (members, member_manifests) = members;
        debug!(
            url = %source.url,
            sequence,
            members = members.len(),
            "Verified validator list"
        );

        Ok(FetchedUnl {
            source: source.clone(),
            sequence,
            expiration,
            members,
            member_manifests,
        })
    }

    /// Resolve the publisher's current signing key through its manifest.
    ///
    /// The manifest goes through the regular acceptance path, so a
    /// publisher that has since rotated keys is checked against the newest
    /// signing key on record, and a revoked publisher is refused.
    async fn publisher_signing_key(
        &self,
        source: &UnlSource,
        document: &UnlDocument,
        manifest_override: Option<&str>,
    ) -> Result<PublicKey> {
        let blob = manifest_override
            .or(document.manifest.as_deref())
            .ok_or_else(|| IngestError::MalformedUnlDocument("missing publisher manifest".into()))?;

        let manifest = Manifest::from_base64(blob)
            .map_err(|e| IngestError::InvalidPublisher(format!("publisher manifest: {e}")))?;

        if manifest.master_key != source.publisher_key {
            return Err(IngestError::InvalidPublisher(format!(
                "manifest master key {} is not the pinned key {}",
                manifest.master_key, source.publisher_key
            )));
        }

        if let Some(public_key) = document.public_key.as_deref() {
            let declared = PublicKey::from_hex(public_key)
                .map_err(|e| IngestError::InvalidPublisher(format!("public_key: {e}")))?;
            if declared != manifest.master_key {
                return Err(IngestError::InvalidPublisher(format!(
                    "public_key {declared} does not match manifest master key {}",
                    manifest.master_key
                )));
            }
        }

        match self.processor.handle_manifest(&manifest).await {
            Ok(_) => {}
            Err(e) if e.is_persistence() => return Err(e),
            Err(e) => return Err(IngestError::InvalidPublisher(e.to_string())),
        }

        let master_key = manifest.master_key.to_node_public();
        let stored = self
            .storage()
            .get_manifest(&master_key)
            .await?
            .ok_or_else(|| IngestError::InvalidPublisher(format!("no manifest stored for {master_key}")))?;

        if stored.revoked {
            return Err(IngestError::InvalidPublisher(format!(
                "publisher key {master_key} is revoked"
            )));
        }

        let signing_key = stored.signing_key.ok_or_else(|| {
            IngestError::InvalidPublisher(format!("publisher {master_key} has no signing key"))
        })?;
        PublicKey::from_node_public(&signing_key)
            .map_err(|e| IngestError::InvalidPublisher(format!("stored signing key: {e}")))
    }
}

/// Pick the payload to use from a document.
///
/// v2 documents may carry several payloads; those not yet effective are
/// ignored and the highest unexpired sequence wins. If every effective
/// payload has expired the newest is returned so the caller reports it.
fn select_candidate(document: &UnlDocument, now: i64) -> Result<Candidate<'_>> {
    match document.version {
        1 => {
            let blob = document
                .blob
                .as_deref()
                .ok_or_else(|| IngestError::MalformedUnlDocument("missing blob".into()))?;
            let signature = document
                .signature
                .as_deref()
                .ok_or_else(|| IngestError::MalformedUnlDocument("missing signature".into()))?;
            decode_candidate(blob, signature, None)
        }
        2 => {
            if document.blobs_v2.is_empty() {
                return Err(IngestError::MalformedUnlDocument("empty blobs_v2".into()));
            }

            let mut effective = Vec::with_capacity(document.blobs_v2.len());
            for entry in &document.blobs_v2 {
                let candidate =
                    decode_candidate(&entry.blob, &entry.signature, entry.manifest.as_deref())?;
                let starts = candidate.payload.effective.map(ripple_to_unix).unwrap_or(i64::MIN);
                if starts <= now {
                    effective.push(candidate);
                }
            }

            let (live, expired): (Vec<_>, Vec<_>) = effective
                .into_iter()
                .partition(|c| ripple_to_unix(c.payload.expiration) > now);

            live.into_iter()
                .max_by_key(|c| c.payload.sequence)
                .or_else(|| expired.into_iter().max_by_key(|c| c.payload.sequence))
                .ok_or_else(|| {
                    IngestError::MalformedUnlDocument("no blob is effective yet".into())
                })
        }
        other => Err(IngestError::MalformedUnlDocument(format!(
            "unsupported version {other}"
        ))),
    }
}

fn decode_candidate<'a>(
    blob: &str,
    signature: &'a str,
    manifest: Option<&'a str>,
) -> Result<Candidate<'a>> {
    let bytes = decode_base64(blob)
        .map_err(|_| IngestError::MalformedUnlDocument("blob is not base64".into()))?;
    let payload: UnlPayload = serde_json::from_slice(&bytes)
        .map_err(|e| IngestError::MalformedUnlDocument(format!("invalid payload: {e}")))?;

    Ok(Candidate {
        blob: bytes,
        signature,
        manifest,
        payload,
    })
}

/// Listed master keys plus the embedded manifests that belong to them.
///
/// A member key that does not decode fails the whole list; an embedded
/// manifest that does not decode or names another master key is dropped.
fn decode_members(payload: &UnlPayload) -> Result<(BTreeSet<String>, Vec<Manifest>)> {
    let mut members = BTreeSet::new();
    let mut manifests = Vec::new();

    for member in &payload.validators {
        let key = PublicKey::from_hex(&member.validation_public_key).map_err(|e| {
            IngestError::MalformedUnlDocument(format!(
                "validation_public_key {}: {e}",
                member.validation_public_key
            ))
        })?;
        members.insert(key.to_node_public());

        let Some(blob) = member.manifest.as_deref() else {
            continue;
        };
        match Manifest::from_base64(blob) {
            Ok(manifest) if manifest.master_key == key => manifests.push(manifest),
            Ok(manifest) => {
                warn!(member = %key, manifest_master = %manifest.master_key, "Embedded manifest names another master key");
            }
            Err(e) => warn!(member = %key, error = %e, "Dropping undecodable embedded manifest"),
        }
    }

    Ok((members, manifests))
}
