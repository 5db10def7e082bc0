//! Manifest acceptance.
//!
//! [`ManifestProcessor`] is the single gate in front of the `manifests`
//! table. A candidate is verified first (both signatures), then checked
//! against the stored row (revocation is terminal, sequences only move
//! forward), and finally written with a compare-and-set that repeats the
//! sequence check inside SQLite. Concurrent callers racing on one master key
//! therefore always leave the highest valid sequence stored.

use tracing::{debug, info};
use unlwatch_core::{Manifest, ManifestFields};

use crate::error::{IngestError, Result};
use crate::storage::{now_unix, ManifestRecord, Storage, ValidatorLink};

/// Result of handing a candidate manifest to the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOutcome {
    /// The manifest was written.
    Accepted {
        /// Master key (node-public form).
        master_key: String,
        /// Accepted sequence.
        seq: u32,
        /// Whether this acceptance revoked the master key.
        revoked: bool,
        /// Effect on the validators table.
        link: ValidatorLink,
    },
    /// Nothing was written.
    Skipped {
        /// Master key (node-public form).
        master_key: String,
        /// Sequence currently stored.
        stored_seq: u32,
        /// Why the write was skipped.
        reason: SkipReason,
    },
}

/// Why a manifest was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The stored sequence is equal or higher.
    StaleSequence,
}

impl ManifestOutcome {
    /// Whether the candidate was written.
    pub fn is_accepted(&self) -> bool {
        matches!(self, ManifestOutcome::Accepted { .. })
    }
}

/// Verifies candidate manifests and persists the accepted ones.
#[derive(Debug, Clone)]
pub struct ManifestProcessor {
    storage: Storage,
}

impl ManifestProcessor {
    /// Create a processor writing through `storage`.
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Storage this processor writes to.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Decode and handle a base64 manifest blob.
    pub async fn handle_blob(&self, blob: &str) -> Result<ManifestOutcome> {
        let manifest = Manifest::from_base64(blob)?;
        self.handle_manifest(&manifest).await
    }

    /// Handle a manifest given in its textual field form.
    pub async fn handle_fields(&self, fields: &ManifestFields) -> Result<ManifestOutcome> {
        let manifest = Manifest::try_from(fields)?;
        self.handle_manifest(&manifest).await
    }

    /// Verify `manifest` and persist it if it advances the stored state.
    ///
    /// Signature failures are [`IngestError::InvalidSignature`]; a candidate
    /// for a revoked master key is [`IngestError::Revoked`] whatever its
    /// sequence. A candidate that is not newer than the stored row is an
    /// `Ok` [`ManifestOutcome::Skipped`].
    pub async fn handle_manifest(&self, manifest: &Manifest) -> Result<ManifestOutcome> {
        manifest.verify()?;

        let master_key = manifest.master_key.to_node_public();

        if let Some(stored) = self.storage.get_manifest(&master_key).await? {
            if let Some(outcome) = classify_against(&stored, manifest.seq)? {
                return Ok(outcome);
            }
        }

        let record = ManifestRecord::from_manifest(manifest, now_unix());
        match self.storage.accept_manifest(&record).await? {
            Some(link) => {
                if record.revoked {
                    info!(master_key = %master_key, "Master key revoked");
                } else {
                    debug!(master_key = %master_key, seq = record.seq, ?link, "Accepted manifest");
                }
                Ok(ManifestOutcome::Accepted {
                    master_key,
                    seq: record.seq,
                    revoked: record.revoked,
                    link,
                })
            }
            None => {
                // Lost a race to a concurrent writer; report what won.
                let stored = self.storage.get_manifest(&master_key).await?.ok_or_else(|| {
                    IngestError::Persistence(anyhow::anyhow!(
                        "manifest {master_key} vanished after a conflicting write"
                    ))
                })?;
                classify_against(&stored, manifest.seq)?.ok_or_else(|| {
                    IngestError::Persistence(anyhow::anyhow!(
                        "manifest {master_key} upsert affected no row"
                    ))
                })
            }
        }
    }
}

/// Decide a candidate sequence against the stored row, or `None` to write.
fn classify_against(stored: &ManifestRecord, seq: u32) -> Result<Option<ManifestOutcome>> {
    if stored.revoked {
        return Err(IngestError::Revoked(stored.master_key.clone()));
    }
    if seq <= stored.seq {
        debug!(
            master_key = %stored.master_key,
            candidate = seq,
            stored = stored.seq,
            "Skipping stale manifest"
        );
        return Ok(Some(ManifestOutcome::Skipped {
            master_key: stored.master_key.clone(),
            stored_seq: stored.seq,
            reason: SkipReason::StaleSequence,
        }));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{temp_storage, TestIdentity};
    use unlwatch_core::REVOKED_SEQUENCE;

    /// The seq-1 manifest from the public validator network.
    fn network_fields() -> ManifestFields {
        ManifestFields {
            master_key: "nHDaeKJcfRzzmx3gGKnrFTQazYi95tdGrdoiCYLinoU9EkJsp4Ho".into(),
            master_signature: "7CA31C480E2ED7DBD1C2A0CA950545C73C7EB9838D5A5C5D16D61DFDB47EBC23DAF2BD25B9AA4FE5B8E39D30C575501BC7EE4042E068D935D6D97391B3B46706".into(),
            seq: 1,
            signature: Some("30440220711EC38538E10E01198086D85D4728E81993ADD0746E6D3CEF2E12DC3C3A3A92022046F698FD1B1B3222498049D6006E95EC1422C4E0CB2BFD0D210A4709BAF17A08".into()),
            signing_key: Some("n9KhXam7XB436XHhzo3aTzEW5NxkKwVDkuy9DwdDC1ja8j8mv3ot".into()),
            domain: None,
        }
    }

    #[tokio::test]
    async fn test_handle_manifest_then_resubmit_is_noop() {
        let (storage, _temp_db) = temp_storage().await;
        let processor = ManifestProcessor::new(storage.clone());
        let fields = network_fields();

        let outcome = processor.handle_fields(&fields).await.unwrap();
        assert!(outcome.is_accepted());

        let stored = storage.get_manifest(&fields.master_key).await.unwrap().unwrap();
        assert_eq!(stored.seq, 1);
        assert!(!stored.revoked);
        assert!(!stored.domain_verified);
        assert_eq!(stored.domain, None);
        assert_eq!(stored.signing_key, fields.signing_key);
        assert_eq!(stored.master_signature, fields.master_signature);
        assert_eq!(stored.signature, fields.signature);

        let outcome = processor.handle_fields(&fields).await.unwrap();
        assert_eq!(
            outcome,
            ManifestOutcome::Skipped {
                master_key: fields.master_key.clone(),
                stored_seq: 1,
                reason: SkipReason::StaleSequence,
            }
        );
        assert_eq!(
            storage.get_manifest(&fields.master_key).await.unwrap().unwrap(),
            stored
        );
    }

    #[tokio::test]
    async fn test_sequences_only_move_forward() {
        let (storage, _temp_db) = temp_storage().await;
        let processor = ManifestProcessor::new(storage.clone());
        let validator = TestIdentity::new(11);
        let master = validator.master_node_public();

        processor.handle_manifest(&validator.manifest(5)).await.unwrap();
        let outcome = processor.handle_manifest(&validator.manifest(3)).await.unwrap();
        assert!(!outcome.is_accepted());
        assert_eq!(storage.get_manifest(&master).await.unwrap().unwrap().seq, 5);

        processor.handle_manifest(&validator.manifest(7)).await.unwrap();
        let stored = storage.get_manifest(&master).await.unwrap().unwrap();
        assert_eq!(stored.seq, 7);
        assert_eq!(
            stored.signing_key,
            Some(validator.signing_key(7).to_node_public())
        );
    }

    #[tokio::test]
    async fn test_revocation_is_terminal() {
        let (storage, _temp_db) = temp_storage().await;
        let processor = ManifestProcessor::new(storage.clone());
        let validator = TestIdentity::new(12);

        processor.handle_manifest(&validator.manifest(2)).await.unwrap();
        let outcome = processor.handle_manifest(&validator.revocation()).await.unwrap();
        assert!(matches!(
            outcome,
            ManifestOutcome::Accepted { revoked: true, seq: REVOKED_SEQUENCE, .. }
        ));

        for candidate in [validator.manifest(3), validator.revocation()] {
            assert!(matches!(
                processor.handle_manifest(&candidate).await,
                Err(IngestError::Revoked(_))
            ));
        }

        let stored = storage
            .get_manifest(&validator.master_node_public())
            .await
            .unwrap()
            .unwrap();
        assert!(stored.revoked);
        assert_eq!(stored.signing_key, None);
    }

    #[tokio::test]
    async fn test_bad_signature_writes_nothing() {
        let (storage, _temp_db) = temp_storage().await;
        let processor = ManifestProcessor::new(storage.clone());
        let validator = TestIdentity::new(13);

        let mut manifest = validator.manifest(4);
        manifest.seq = 5;
        assert!(matches!(
            processor.handle_manifest(&manifest).await,
            Err(IngestError::InvalidSignature(_))
        ));

        let mut fields = network_fields();
        fields.master_key = "nHbogus".into();
        assert!(matches!(
            processor.handle_fields(&fields).await,
            Err(IngestError::MalformedKey(_))
        ));

        assert!(storage.list_manifests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acceptance_backfills_observed_validator() {
        let (storage, _temp_db) = temp_storage().await;
        let processor = ManifestProcessor::new(storage.clone());
        let validator = TestIdentity::new(14);
        let signing = validator.signing_key(1).to_node_public();

        storage.upsert_validator(&signing, None).await.unwrap();
        let outcome = processor.handle_manifest(&validator.manifest(1)).await.unwrap();
        assert!(matches!(
            outcome,
            ManifestOutcome::Accepted { link: ValidatorLink::Backfilled, .. }
        ));

        let row = storage
            .get_validator_by_signing_key(&signing)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.master_key, Some(validator.master_node_public()));
    }

    #[tokio::test]
    async fn test_concurrent_writers_leave_highest_sequence() {
        let (storage, _temp_db) = temp_storage().await;
        let processor = ManifestProcessor::new(storage.clone());
        let validator = TestIdentity::new(15);

        let manifests: Vec<Manifest> = (1..=12).rev().map(|seq| validator.manifest(seq)).collect();
        let mut handles = Vec::new();
        for manifest in manifests {
            let processor = processor.clone();
            handles.push(tokio::spawn(async move {
                processor.handle_manifest(&manifest).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = storage
            .get_manifest(&validator.master_node_public())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.seq, 12);
    }
}
