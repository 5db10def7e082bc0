//! Domain verification.
//!
//! A manifest's `domain` is only an operator claim. It counts as verified
//! once `https://{domain}/.well-known/xrp-ledger.toml` lists the manifest's
//! master key under `[[VALIDATORS]]`:
//!
//! ```toml
//! [[VALIDATORS]]
//! public_key = "nHUpcmNsxAw47yt2ADDoNoQrzLyTJPgnyq16u6Qx2kRPA17oUNHz"
//! ```
//!
//! Only bare hostnames are fetched; a claim such as `example.com@host` or
//! `host:port` is refused before any request is made.
//!
//! This runs on its own schedule and never gates manifest acceptance.

use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;
use unlwatch_core::PublicKey;

use crate::error::{IngestError, Result};
use crate::http::read_capped;
use crate::storage::{ManifestRecord, Storage};

const WELL_KNOWN_PATH: &str = "/.well-known/xrp-ledger.toml";

const MIN_DOMAIN_LEN: usize = 4;
const MAX_DOMAIN_LEN: usize = 128;

#[derive(Debug, Deserialize)]
struct LedgerToml {
    #[serde(rename = "VALIDATORS", default)]
    validators: Vec<LedgerTomlValidator>,
}

#[derive(Debug, Deserialize)]
struct LedgerTomlValidator {
    #[serde(default)]
    public_key: Option<String>,
}

/// Checks manifest domains against the operators' published TOML.
#[derive(Debug, Clone)]
pub struct DomainVerifier {
    client: Client,
    storage: Storage,
    max_response_bytes: usize,
    scheme: String,
    port: Option<u16>,
}

impl DomainVerifier {
    /// Create a verifier. `client` carries the request timeout.
    pub fn new(client: Client, storage: Storage, max_response_bytes: usize) -> Self {
        Self {
            client,
            storage,
            max_response_bytes,
            scheme: "https".to_string(),
            port: None,
        }
    }

    /// Use `scheme` instead of `https` to reach domains.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Reach domains on `port` instead of the scheme's default.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Verify the domain claimed by `manifest`.
    ///
    /// Returns `Ok(true)` and marks the row verified when the domain's TOML
    /// lists the master key; `Ok(false)` when it does not (or there is no
    /// domain to check). A domain that is not a bare hostname fails with
    /// [`IngestError::MalformedManifest`] without being fetched.
    pub async fn verify(&self, manifest: &ManifestRecord) -> Result<bool> {
        let Some(domain) = manifest.domain.as_deref() else {
            return Ok(false);
        };

        let master_key = PublicKey::from_node_public(&manifest.master_key)?;
        let url = self.well_known_url(domain)?;

        let response = self.client.get(url.clone()).send().await?;
        let body = read_capped(response, self.max_response_bytes, IngestError::InvalidDomainToml)
            .await?;
        let text = String::from_utf8(body)
            .map_err(|_| IngestError::InvalidDomainToml(format!("{url} is not UTF-8")))?;

        if !lists_key(&text, &master_key)? {
            debug!(domain, master_key = %manifest.master_key, "Domain does not list master key");
            return Ok(false);
        }

        let updated = self
            .storage
            .set_domain_verified(&manifest.master_key, domain, true)
            .await?;
        debug!(domain, master_key = %manifest.master_key, updated, "Domain verified");
        Ok(updated)
    }

    /// `xrp-ledger.toml` location for `domain`, whose host must be exactly
    /// `domain`.
    fn well_known_url(&self, domain: &str) -> Result<Url> {
        let improper =
            || IngestError::MalformedManifest(format!("domain {domain:?} is not a hostname"));
        if !is_proper_domain(domain) {
            return Err(improper());
        }

        let mut url = Url::parse(&format!("{}://{domain}{WELL_KNOWN_PATH}", self.scheme))
            .map_err(|_| improper())?;
        if let Some(port) = self.port {
            url.set_port(Some(port)).map_err(|_| improper())?;
        }
        if !url.host_str().is_some_and(|host| host.eq_ignore_ascii_case(domain)) {
            return Err(improper());
        }
        Ok(url)
    }
}

/// Whether `domain` is a plain DNS name: dot-separated labels of letters,
/// digits and inner hyphens, ending in an alphabetic top-level label.
fn is_proper_domain(domain: &str) -> bool {
    if !(MIN_DOMAIN_LEN..=MAX_DOMAIN_LEN).contains(&domain.len()) {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    let labels_ok = labels.iter().all(|label| {
        (1..=63).contains(&label.len())
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    });
    let tld_ok = labels
        .last()
        .is_some_and(|tld| tld.len() >= 2 && tld.bytes().all(|b| b.is_ascii_alphabetic()));

    labels_ok && tld_ok
}

/// Whether the TOML document lists `key` in either textual form.
fn lists_key(toml_text: &str, key: &PublicKey) -> Result<bool> {
    let document: LedgerToml =
        toml::from_str(toml_text).map_err(|e| IngestError::InvalidDomainToml(e.to_string()))?;

    Ok(document
        .validators
        .iter()
        .filter_map(|v| v.public_key.as_deref())
        .filter_map(|k| k.trim().parse::<PublicKey>().ok())
        .any(|k| &k == key))
}
