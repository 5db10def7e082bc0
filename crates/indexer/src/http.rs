//! Shared HTTP plumbing: client construction and size-capped body reads.

use anyhow::Context;
use reqwest::{Client, Response};
use std::time::Duration;

use crate::error::{IngestError, Result};

/// Build a client whose every request carries `timeout_secs`.
pub fn build_client(timeout_secs: u64, purpose: &str) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(format!("unlwatch-indexer/{purpose}"))
        .build()
        .with_context(|| format!("Failed to build {purpose} HTTP client"))
}

/// Read a successful response body, refusing bodies over `max_bytes`.
///
/// Non-success statuses and transport errors are network failures; an
/// oversized body is reported through `oversized`.
pub async fn read_capped(
    mut response: Response,
    max_bytes: usize,
    oversized: impl FnOnce(String) -> IngestError,
) -> Result<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        return Err(IngestError::NetworkFailure(format!(
            "{} returned HTTP {status}",
            response.url()
        )));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes as u64 {
            return Err(oversized(format!(
                "response of {len} bytes exceeds limit of {max_bytes}"
            )));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > max_bytes {
            return Err(oversized(format!(
                "response exceeds limit of {max_bytes} bytes"
            )));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}
