//! Manifest lookups against a ledger node's JSON-RPC `manifest` method.
//!
//! Request:
//!
//! ```json
//! { "method": "manifest", "params": [{ "public_key": "n9…" }] }
//! ```
//!
//! A node that knows the key answers with the current manifest blob plus
//! its decoded details; one that does not answers `status: "success"` with
//! no `manifest` field.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use unlwatch_core::Manifest;

use crate::error::{IngestError, Result};
use crate::http::read_capped;
use crate::manifests::{ManifestOutcome, ManifestProcessor};
use crate::storage::{ValidatorLink, ValidatorRecord};

/// `result` object of a `manifest` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestRpcResult {
    /// `"success"` or `"error"`.
    #[serde(default)]
    pub status: Option<String>,
    /// Current manifest, base64.
    #[serde(default)]
    pub manifest: Option<String>,
    /// Key the node was asked about.
    #[serde(default)]
    pub requested: Option<String>,
    /// Decoded manifest fields.
    #[serde(default)]
    pub details: Option<ManifestRpcDetails>,
    /// Error token on failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Human-readable error on failure.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Decoded manifest fields reported by the node.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestRpcDetails {
    /// Master key (`nH…`).
    pub master_key: String,
    /// Current signing key.
    #[serde(default)]
    pub ephemeral_key: Option<String>,
    /// Manifest sequence.
    pub seq: u64,
    /// Claimed domain (empty when none).
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: ManifestRpcResult,
}

/// Result of resolving one validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// What the manifest processor did with the node's answer.
    pub outcome: ManifestOutcome,
    /// Whether the validator row asked about gained its master key.
    pub link: ValidatorLink,
}

/// Client for a ledger node's `manifest` RPC.
#[derive(Debug, Clone)]
pub struct RippledManifestClient {
    client: Client,
    rpc_url: String,
    processor: ManifestProcessor,
    max_response_bytes: usize,
}

impl RippledManifestClient {
    /// Create a client for `rpc_url`. `client` carries the request timeout.
    pub fn new(
        client: Client,
        rpc_url: impl Into<String>,
        processor: ManifestProcessor,
        max_response_bytes: usize,
    ) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            processor,
            max_response_bytes,
        }
    }

    /// Ask the node for the current manifest of `public_key`.
    pub async fn request_manifest(&self, public_key: &str) -> Result<ManifestRpcResult> {
        let body = json!({
            "method": "manifest",
            "params": [{ "public_key": public_key }],
        });

        let response = self.client.post(&self.rpc_url).json(&body).send().await?;
        let bytes = read_capped(response, self.max_response_bytes, IngestError::NetworkFailure).await?;

        let envelope: RpcEnvelope = serde_json::from_slice(&bytes).map_err(|e| {
            IngestError::MalformedManifest(format!("unexpected manifest RPC response: {e}"))
        })?;
        let result = envelope.result;

        if result.status.as_deref() != Some("success") {
            return Err(IngestError::NetworkFailure(format!(
                "manifest RPC for {public_key} failed: {}",
                result
                    .error_message
                    .as_deref()
                    .or(result.error.as_deref())
                    .unwrap_or("unknown error")
            )));
        }

        Ok(result)
    }

    /// Refresh the manifest behind `validator` and feed it to acceptance.
    ///
    /// The node is asked about the master key when known, else the signing
    /// key. When the row had no master key, the identity the node reports
    /// is bound to it.
    pub async fn resolve(&self, validator: &ValidatorRecord) -> Result<Resolution> {
        let requested = validator.lookup_key();
        let result = self.request_manifest(requested).await?;

        let blob = result
            .manifest
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| IngestError::NotFound(requested.to_string()))?;
        let manifest = Manifest::from_base64(blob)?;
        let master_key = manifest.master_key.to_node_public();

        if let Some(known) = validator.master_key.as_deref() {
            if known != master_key {
                return Err(IngestError::MalformedManifest(format!(
                    "node returned manifest for {master_key} when asked about {known}"
                )));
            }
        }

        if let Some(details) = &result.details {
            check_details(details, &manifest, &master_key)?;
        }

        let outcome = self.processor.handle_manifest(&manifest).await?;

        let link = if validator.master_key.is_none() {
            self.processor
                .storage()
                .backfill_master_key(&validator.signing_key, &master_key)
                .await?
        } else {
            ValidatorLink::Unchanged
        };

        debug!(
            requested,
            master_key = %master_key,
            seq = manifest.seq,
            ?link,
            "Resolved validator manifest"
        );

        Ok(Resolution { outcome, link })
    }
}

/// The decoded details must describe the blob they came with.
fn check_details(details: &ManifestRpcDetails, manifest: &Manifest, master_key: &str) -> Result<()> {
    if details.master_key != master_key {
        return Err(IngestError::MalformedManifest(format!(
            "details master_key {} does not match manifest {master_key}",
            details.master_key
        )));
    }
    if details.seq != u64::from(manifest.seq) {
        return Err(IngestError::MalformedManifest(format!(
            "details seq {} does not match manifest seq {}",
            details.seq, manifest.seq
        )));
    }
    if let (Some(ephemeral), Some(signing)) = (details.ephemeral_key.as_deref(), manifest.signing_key) {
        if !ephemeral.is_empty() && ephemeral != signing.to_node_public() {
            return Err(IngestError::MalformedManifest(format!(
                "details ephemeral_key {ephemeral} does not match manifest"
            )));
        }
    }
    Ok(())
}
