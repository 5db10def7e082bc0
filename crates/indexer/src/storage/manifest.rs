//! Manifest storage operations.
//!
//! The only write path is a compare-and-set on `seq`: a row is inserted when
//! absent, and replaced only when the stored row is unrevoked and the
//! candidate sequence is strictly higher. SQLite applies the check and the
//! write as one statement, so racing writers cannot regress a sequence.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use super::validator::backfill_master_key_on;
use super::{ManifestRecord, Storage, ValidatorLink};

const MANIFEST_COLUMNS: &str = r#"
    master_key, signing_key, seq, signature, master_signature,
    domain, domain_verified, revoked, raw_blob, updated_at
"#;

impl Storage {
    /// Fetch the stored manifest for a master key.
    pub async fn get_manifest(&self, master_key: &str) -> Result<Option<ManifestRecord>> {
        let mut conn = self.pool.acquire().await?;
        get_manifest_on(&mut conn, master_key).await
    }

    /// Fetch the manifest whose current signing key is `signing_key`.
    pub async fn get_manifest_by_signing_key(
        &self,
        signing_key: &str,
    ) -> Result<Option<ManifestRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {MANIFEST_COLUMNS} FROM manifests WHERE signing_key = ?"
        ))
        .bind(signing_key)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch manifest by signing key")?;

        Ok(row.map(row_to_manifest_record))
    }

    /// Atomically insert or advance a manifest.
    ///
    /// Returns `true` if the row was written, `false` if the stored row is
    /// revoked or already at an equal or higher sequence.
    pub async fn conditional_upsert_manifest(&self, record: &ManifestRecord) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        upsert_manifest_on(&mut conn, record).await
    }

    /// Accept a verified manifest: compare-and-set the manifest row and, in the
    /// same transaction, backfill the master key onto a validator row observed
    /// under the manifest's signing key.
    ///
    /// Returns `None` if the compare-and-set lost (nothing was written).
    pub async fn accept_manifest(&self, record: &ManifestRecord) -> Result<Option<ValidatorLink>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin manifest transaction")?;

        if !upsert_manifest_on(&mut tx, record).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let link = match (&record.signing_key, record.revoked) {
            (Some(signing_key), false) => {
                backfill_master_key_on(&mut tx, signing_key, &record.master_key, record.updated_at)
                    .await?
            }
            _ => ValidatorLink::Unchanged,
        };

        tx.commit()
            .await
            .context("Failed to commit manifest transaction")?;

        Ok(Some(link))
    }

    /// Mark a manifest's domain as verified (or not).
    ///
    /// Only applies while the stored domain still equals `domain`, so a
    /// verification racing a domain change cannot attach to the new domain.
    pub async fn set_domain_verified(
        &self,
        master_key: &str,
        domain: &str,
        verified: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE manifests
            SET domain_verified = ?
            WHERE master_key = ? AND domain = ?
            "#,
        )
        .bind(verified)
        .bind(master_key)
        .bind(domain)
        .execute(&self.pool)
        .await
        .context("Failed to update domain verification")?;

        Ok(result.rows_affected() > 0)
    }

    /// All stored manifests, ordered by master key.
    pub async fn list_manifests(&self) -> Result<Vec<ManifestRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {MANIFEST_COLUMNS} FROM manifests ORDER BY master_key"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list manifests")?;

        Ok(rows.into_iter().map(row_to_manifest_record).collect())
    }

    /// Unrevoked manifests that claim a domain not yet verified.
    pub async fn manifests_pending_domain_verification(&self) -> Result<Vec<ManifestRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MANIFEST_COLUMNS} FROM manifests
            WHERE domain IS NOT NULL AND domain_verified = 0 AND revoked = 0
            ORDER BY master_key
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list manifests pending domain verification")?;

        Ok(rows.into_iter().map(row_to_manifest_record).collect())
    }
}

pub(crate) async fn get_manifest_on(
    conn: &mut SqliteConnection,
    master_key: &str,
) -> Result<Option<ManifestRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {MANIFEST_COLUMNS} FROM manifests WHERE master_key = ?"
    ))
    .bind(master_key)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to fetch manifest")?;

    Ok(row.map(row_to_manifest_record))
}

pub(crate) async fn upsert_manifest_on(
    conn: &mut SqliteConnection,
    record: &ManifestRecord,
) -> Result<bool> {
    // domain_verified: a fresh verification wins; otherwise keep the prior
    // flag while the domain is unchanged and drop it when the domain moves.
    let result = sqlx::query(
        r#"
        INSERT INTO manifests (
            master_key, signing_key, seq, signature, master_signature,
            domain, domain_verified, revoked, raw_blob, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(master_key) DO UPDATE SET
            signing_key = excluded.signing_key,
            seq = excluded.seq,
            signature = excluded.signature,
            master_signature = excluded.master_signature,
            domain = excluded.domain,
            domain_verified = CASE
                WHEN excluded.domain_verified = 1 THEN 1
                WHEN excluded.domain IS manifests.domain THEN manifests.domain_verified
                ELSE 0
            END,
            revoked = excluded.revoked,
            raw_blob = excluded.raw_blob,
            updated_at = excluded.updated_at
        WHERE manifests.revoked = 0
          AND excluded.seq > manifests.seq
        "#,
    )
    .bind(&record.master_key)
    .bind(&record.signing_key)
    .bind(i64::from(record.seq))
    .bind(&record.signature)
    .bind(&record.master_signature)
    .bind(&record.domain)
    .bind(record.domain_verified)
    .bind(record.revoked)
    .bind(&record.raw_blob)
    .bind(record.updated_at)
    .execute(&mut *conn)
    .await
    .context("Failed to upsert manifest")?;

    Ok(result.rows_affected() > 0)
}

fn row_to_manifest_record(row: SqliteRow) -> ManifestRecord {
    ManifestRecord {
        master_key: row.get("master_key"),
        signing_key: row.get("signing_key"),
        seq: row.get::<i64, _>("seq") as u32,
        signature: row.get("signature"),
        master_signature: row.get("master_signature"),
        domain: row.get("domain"),
        domain_verified: row.get("domain_verified"),
        revoked: row.get("revoked"),
        raw_blob: row.get("raw_blob"),
        updated_at: row.get("updated_at"),
    }
}
