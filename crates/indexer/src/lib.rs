//! Manifest and validator-list reconciliation for the XRP Ledger validator
//! network.
//!
//! This crate provides:
//! - Manifest acceptance with compare-and-set sequencing and terminal revocation
//! - Validator list (UNL) fetching with publisher chain verification
//! - Trust attribution reconciliation per publisher
//! - Manifest resolution through a ledger node's `manifest` RPC
//! - Domain verification against `xrp-ledger.toml`
//! - Scheduled jobs composing the above
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  unlwatch-indexer                                    │
//! │                                                      │
//! │  UNL publishers ──► UnlFetcher ──► TrustReconciler ─┐│
//! │                        │                            ││
//! │                        ▼                            ││
//! │  ledger node ──► RippledManifestClient              ││
//! │                        │                            ││
//! │                        ▼                            ▼│
//! │                 ManifestProcessor ──────────► Storage│
//! │                                               (SQLite)
//! │  Orchestrator jobs, driven by the Scheduler          │
//! └──────────────────────────────────────────────────────┘
//!          │
//!          │ Shared DB (read-only consumers)
//!          ▼
//!     HTTP read API
//! ```
//!
//! Nothing reaches storage without passing a gate: manifests go through
//! [`manifests::ManifestProcessor`], attribution through
//! [`reconcile::TrustReconciler`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod jobs;
pub mod manifests;
pub mod reconcile;
pub mod rippled;
pub mod scheduler;
pub mod storage;
pub mod unl;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::IngestError;
pub use unlwatch_core::{Manifest, ManifestFields, PublicKey};
