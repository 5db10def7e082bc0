//! Trust attribution.
//!
//! [`TrustReconciler`] applies one verified list snapshot to the
//! `validators.unl` column. The diff for a source is computed and applied
//! inside a single transaction that also advances the source's accepted
//! sequence, so a snapshot is either fully applied or not at all, and a
//! stale snapshot can never overwrite a newer one even if two fetches of the
//! same source race.
//!
//! Attribution is single-valued: when two publishers list the same
//! validator, the last one reconciled owns `unl`.

use std::collections::BTreeSet;

use anyhow::Context;
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};
use crate::storage::manifest::get_manifest_on;
use crate::storage::unl_source::{advance_unl_sequence_on, get_unl_source_on};
use crate::storage::validator::{
    get_validator_by_master_on, get_validator_by_signing_on, insert_validator_on, set_unl_on,
    validators_attributed_to_on,
};
use crate::storage::{now_unix, Storage, UnlSourceRecord};
use crate::unl::FetchedUnl;

/// What one reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Source identifier.
    pub source: String,
    /// Sequence of the applied list.
    pub sequence: u64,
    /// Validators newly attributed to the source.
    pub added: usize,
    /// Validators whose attribution was cleared.
    pub removed: usize,
    /// Validators that stayed attributed.
    pub retained: usize,
}

/// Applies verified list snapshots to validator attribution.
#[derive(Debug, Clone)]
pub struct TrustReconciler {
    storage: Storage,
}

impl TrustReconciler {
    /// Create a reconciler writing through `storage`.
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Apply `unl` as the current membership of its source.
    ///
    /// Fails with [`IngestError::StaleSequence`] (and changes nothing) if a
    /// list with an equal or higher sequence was already applied.
    pub async fn reconcile(&self, unl: &FetchedUnl) -> Result<ReconcileReport> {
        let source = &unl.source;
        let now = now_unix();

        if i64::try_from(unl.sequence).is_err() {
            return Err(IngestError::MalformedUnlDocument(format!(
                "sequence {} out of range",
                unl.sequence
            )));
        }

        let mut tx = self
            .storage
            .pool()
            .begin()
            .await
            .context("Failed to begin reconciliation")?;

        // First statement is the write, so the transaction holds the write
        // lock before it reads any attribution.
        let record = UnlSourceRecord {
            url: source.url.clone(),
            source_id: source.id.clone(),
            network: source.network.clone(),
            publisher_key: source.publisher_key.to_node_public(),
            sequence: unl.sequence,
            expiration: unl.expiration,
            member_count: unl.members.len() as u64,
            updated_at: now,
        };
        if !advance_unl_sequence_on(&mut tx, &record).await? {
            let current = get_unl_source_on(&mut tx, &source.url)
                .await?
                .map(|r| r.sequence)
                .unwrap_or_default();
            tx.rollback().await.context("Failed to roll back reconciliation")?;
            return Err(IngestError::StaleSequence {
                candidate: unl.sequence,
                current,
            });
        }

        let mut report = ReconcileReport {
            source: source.id.clone(),
            sequence: unl.sequence,
            ..Default::default()
        };

        let mut already = BTreeSet::new();
        for row in validators_attributed_to_on(&mut tx, &source.id).await? {
            match row.master_key {
                Some(master_key) if unl.members.contains(&master_key) => {
                    already.insert(master_key);
                    report.retained += 1;
                }
                _ => {
                    set_unl_on(&mut tx, &row.signing_key, None, None, now).await?;
                    report.removed += 1;
                }
            }
        }

        for master_key in unl.members.difference(&already) {
            attribute_member(&mut tx, master_key, &source.id, now).await?;
            report.added += 1;
        }

        tx.commit().await.context("Failed to commit reconciliation")?;

        info!(
            source = %report.source,
            sequence = report.sequence,
            added = report.added,
            removed = report.removed,
            retained = report.retained,
            "Reconciled validator list"
        );

        Ok(report)
    }
}

/// Attribute `master_key` to `source`, creating its validator row if needed.
///
/// A new row is keyed by the master key's current signing key when a
/// manifest is on record, and by the master key itself otherwise.
async fn attribute_member(
    conn: &mut SqliteConnection,
    master_key: &str,
    source: &str,
    now: i64,
) -> Result<()> {
    if let Some(row) = get_validator_by_master_on(conn, master_key).await? {
        set_unl_on(conn, &row.signing_key, None, Some(source), now).await?;
        return Ok(());
    }

    let signing_key = get_manifest_on(conn, master_key)
        .await?
        .filter(|m| !m.revoked)
        .and_then(|m| m.signing_key);

    if let Some(signing_key) = signing_key.as_deref() {
        match get_validator_by_signing_on(conn, signing_key).await? {
            Some(row) if row.master_key.is_none() => {
                set_unl_on(conn, signing_key, Some(master_key), Some(source), now).await?;
                debug!(master_key, signing_key, source, "Attributed observed validator");
                return Ok(());
            }
            Some(row) => {
                warn!(
                    master_key,
                    signing_key,
                    owner = row.master_key.as_deref().unwrap_or_default(),
                    "Signing key owned by another master key; keying row by master key"
                );
            }
            None => {
                insert_validator_on(conn, signing_key, Some(master_key), Some(source), now)
                    .await?;
                debug!(master_key, signing_key, source, "Created attributed validator");
                return Ok(());
            }
        }
    }

    match get_validator_by_signing_on(conn, master_key).await? {
        Some(_) => {
            set_unl_on(conn, master_key, Some(master_key), Some(source), now).await?;
        }
        None => {
            insert_validator_on(conn, master_key, Some(master_key), Some(source), now).await?;
        }
    }
    debug!(master_key, source, "Created attributed validator keyed by master key");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifests::ManifestProcessor;
    use crate::test_support::{temp_storage, unl_source, TestIdentity};
    use crate::unl::UnlSource;

    fn snapshot(source: &UnlSource, sequence: u64, members: &[&TestIdentity]) -> FetchedUnl {
        FetchedUnl {
            source: source.clone(),
            sequence,
            expiration: 2_000_000_000,
            members: members.iter().map(|m| m.master_node_public()).collect(),
            member_manifests: Vec::new(),
        }
    }

    async fn unl_of(storage: &Storage, master_key: &str) -> Option<String> {
        storage
            .get_validator_by_master_key(master_key)
            .await
            .unwrap()
            .unwrap()
            .unl
    }

    #[tokio::test]
    async fn test_member_added_then_removed() {
        let (storage, _temp_db) = temp_storage().await;
        let reconciler = TrustReconciler::new(storage.clone());
        let publisher = TestIdentity::new(1);
        let source = unl_source("https://x.example", &publisher);
        let m = TestIdentity::new(2);
        let master = m.master_node_public();

        storage.upsert_validator("n9observed", Some(&master)).await.unwrap();
        assert_eq!(unl_of(&storage, &master).await, None);

        let report = reconciler.reconcile(&snapshot(&source, 1, &[&m])).await.unwrap();
        assert_eq!((report.added, report.removed, report.retained), (1, 0, 0));
        assert_eq!(unl_of(&storage, &master).await.as_deref(), Some("x.example"));

        let report = reconciler.reconcile(&snapshot(&source, 2, &[])).await.unwrap();
        assert_eq!((report.added, report.removed, report.retained), (0, 1, 0));
        assert_eq!(unl_of(&storage, &master).await, None);
    }

    #[tokio::test]
    async fn test_diff_leaves_other_sources_untouched() {
        let (storage, _temp_db) = temp_storage().await;
        let reconciler = TrustReconciler::new(storage.clone());
        let s = unl_source("https://s.example", &TestIdentity::new(1));
        let t = unl_source("https://t.example", &TestIdentity::new(9));
        let (a, b, c, d) = (
            TestIdentity::new(2),
            TestIdentity::new(3),
            TestIdentity::new(4),
            TestIdentity::new(5),
        );

        reconciler.reconcile(&snapshot(&t, 1, &[&d])).await.unwrap();
        reconciler.reconcile(&snapshot(&s, 1, &[&a, &b])).await.unwrap();
        let report = reconciler.reconcile(&snapshot(&s, 2, &[&b, &c])).await.unwrap();
        assert_eq!((report.added, report.removed, report.retained), (1, 1, 1));

        assert_eq!(unl_of(&storage, &a.master_node_public()).await, None);
        assert_eq!(unl_of(&storage, &b.master_node_public()).await.as_deref(), Some("s.example"));
        assert_eq!(unl_of(&storage, &c.master_node_public()).await.as_deref(), Some("s.example"));
        assert_eq!(unl_of(&storage, &d.master_node_public()).await.as_deref(), Some("t.example"));

        // Re-applying the same outcome at a newer sequence is a no-op.
        let report = reconciler.reconcile(&snapshot(&s, 3, &[&b, &c])).await.unwrap();
        assert_eq!((report.added, report.removed, report.retained), (0, 0, 2));
    }

    #[tokio::test]
    async fn test_last_writer_wins_across_sources() {
        let (storage, _temp_db) = temp_storage().await;
        let reconciler = TrustReconciler::new(storage.clone());
        let s = unl_source("https://s.example", &TestIdentity::new(1));
        let t = unl_source("https://t.example", &TestIdentity::new(9));
        let shared = TestIdentity::new(2);
        let master = shared.master_node_public();

        reconciler.reconcile(&snapshot(&s, 1, &[&shared])).await.unwrap();
        reconciler.reconcile(&snapshot(&t, 1, &[&shared])).await.unwrap();
        assert_eq!(unl_of(&storage, &master).await.as_deref(), Some("t.example"));

        // S dropping it does not clear T's attribution.
        reconciler.reconcile(&snapshot(&s, 2, &[])).await.unwrap();
        assert_eq!(unl_of(&storage, &master).await.as_deref(), Some("t.example"));
    }

    #[tokio::test]
    async fn test_stale_snapshot_changes_nothing() {
        let (storage, _temp_db) = temp_storage().await;
        let reconciler = TrustReconciler::new(storage.clone());
        let source = unl_source("https://x.example", &TestIdentity::new(1));
        let m = TestIdentity::new(2);

        reconciler.reconcile(&snapshot(&source, 5, &[&m])).await.unwrap();
        let before = storage.list_validators().await.unwrap();

        for sequence in [5, 4] {
            assert!(matches!(
                reconciler.reconcile(&snapshot(&source, sequence, &[])).await,
                Err(IngestError::StaleSequence { current: 5, .. })
            ));
        }

        assert_eq!(storage.list_validators().await.unwrap(), before);
        assert_eq!(
            storage.get_unl_source("https://x.example").await.unwrap().unwrap().sequence,
            5
        );
    }

    #[tokio::test]
    async fn test_out_of_range_sequence_is_refused() {
        let (storage, _temp_db) = temp_storage().await;
        let reconciler = TrustReconciler::new(storage.clone());
        let source = unl_source("https://x.example", &TestIdentity::new(1));
        let m = TestIdentity::new(2);

        reconciler.reconcile(&snapshot(&source, 5, &[&m])).await.unwrap();
        assert!(matches!(
            reconciler.reconcile(&snapshot(&source, u64::MAX, &[])).await,
            Err(IngestError::MalformedUnlDocument(_))
        ));

        // The list at 6 still applies, so nothing wrapped negative.
        assert_eq!(
            storage.get_unl_source("https://x.example").await.unwrap().unwrap().sequence,
            5
        );
        reconciler.reconcile(&snapshot(&source, 6, &[])).await.unwrap();
        assert_eq!(unl_of(&storage, &m.master_node_public()).await, None);
    }

    #[tokio::test]
    async fn test_new_row_uses_current_signing_key() {
        let (storage, _temp_db) = temp_storage().await;
        let reconciler = TrustReconciler::new(storage.clone());
        let source = unl_source("https://x.example", &TestIdentity::new(1));
        let known = TestIdentity::new(2);
        let unknown = TestIdentity::new(3);

        ManifestProcessor::new(storage.clone())
            .handle_manifest(&known.manifest(3))
            .await
            .unwrap();

        reconciler
            .reconcile(&snapshot(&source, 1, &[&known, &unknown]))
            .await
            .unwrap();

        let row = storage
            .get_validator_by_master_key(&known.master_node_public())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.signing_key, known.signing_key(3).to_node_public());

        let row = storage
            .get_validator_by_master_key(&unknown.master_node_public())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.signing_key, unknown.master_node_public());
        assert_eq!(row.unl.as_deref(), Some("x.example"));
    }

    #[tokio::test]
    async fn test_observed_row_is_backfilled_and_attributed() {
        let (storage, _temp_db) = temp_storage().await;
        let reconciler = TrustReconciler::new(storage.clone());
        let source = unl_source("https://x.example", &TestIdentity::new(1));
        let m = TestIdentity::new(2);
        let signing = m.signing_key(1).to_node_public();

        // Manifest arrives before the validator is ever observed on the wire,
        // then a wire observation creates the row without a master key.
        ManifestProcessor::new(storage.clone())
            .handle_manifest(&m.manifest(1))
            .await
            .unwrap();
        storage.upsert_validator(&signing, None).await.unwrap();

        reconciler.reconcile(&snapshot(&source, 1, &[&m])).await.unwrap();

        let rows = storage.list_validators().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].signing_key, signing);
        assert_eq!(rows[0].master_key, Some(m.master_node_public()));
        assert_eq!(rows[0].unl.as_deref(), Some("x.example"));
    }
}
