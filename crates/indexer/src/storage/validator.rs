//! Validator storage operations.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::{debug, warn};

use super::{now_unix, Storage, ValidatorLink, ValidatorRecord};

const VALIDATOR_COLUMNS: &str = "signing_key, master_key, unl, updated_at";

impl Storage {
    /// Record a validator observed by signing key, optionally with its master key.
    ///
    /// An existing row keeps its master key if it already has one; attribution
    /// is never touched here.
    pub async fn upsert_validator(&self, signing_key: &str, master_key: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO validators (signing_key, master_key, unl, updated_at)
            VALUES (?, ?, NULL, ?)
            ON CONFLICT(signing_key) DO UPDATE SET
                master_key = COALESCE(validators.master_key, excluded.master_key),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(signing_key)
        .bind(master_key)
        .bind(now_unix())
        .execute(&self.pool)
        .await
        .context("Failed to upsert validator")?;

        Ok(())
    }

    /// Get a validator by the signing key observed on the wire.
    pub async fn get_validator_by_signing_key(
        &self,
        signing_key: &str,
    ) -> Result<Option<ValidatorRecord>> {
        let mut conn = self.pool.acquire().await?;
        get_validator_by_signing_on(&mut conn, signing_key).await
    }

    /// Get a validator by its resolved master key.
    pub async fn get_validator_by_master_key(
        &self,
        master_key: &str,
    ) -> Result<Option<ValidatorRecord>> {
        let mut conn = self.pool.acquire().await?;
        get_validator_by_master_on(&mut conn, master_key).await
    }

    /// Set (or clear) the UNL attribution of the validator with `master_key`.
    ///
    /// Returns `false` if no row carries that master key.
    pub async fn set_attribution(&self, master_key: &str, unl: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE validators
            SET unl = ?, updated_at = ?
            WHERE master_key = ?
            "#,
        )
        .bind(unl)
        .bind(now_unix())
        .bind(master_key)
        .execute(&self.pool)
        .await
        .context("Failed to set validator attribution")?;

        Ok(result.rows_affected() > 0)
    }

    /// Bind an unresolved validator row to `master_key`.
    ///
    /// Used when a ledger node answers a lookup by signing key with the
    /// identity behind it.
    pub async fn backfill_master_key(
        &self,
        signing_key: &str,
        master_key: &str,
    ) -> Result<ValidatorLink> {
        let mut conn = self.pool.acquire().await?;
        backfill_master_key_on(&mut conn, signing_key, master_key, now_unix()).await
    }

    /// Validators currently attributed to `source`.
    pub async fn validators_attributed_to(&self, source: &str) -> Result<Vec<ValidatorRecord>> {
        let mut conn = self.pool.acquire().await?;
        validators_attributed_to_on(&mut conn, source).await
    }

    /// Validators attributed to any UNL.
    pub async fn validators_on_any_unl(&self) -> Result<Vec<ValidatorRecord>> {
        self.query_validators("WHERE unl IS NOT NULL").await
    }

    /// Validators known only by signing key.
    pub async fn validators_without_master_key(&self) -> Result<Vec<ValidatorRecord>> {
        self.query_validators("WHERE master_key IS NULL").await
    }

    /// All validators.
    pub async fn list_validators(&self) -> Result<Vec<ValidatorRecord>> {
        self.query_validators("").await
    }

    async fn query_validators(&self, filter: &str) -> Result<Vec<ValidatorRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {VALIDATOR_COLUMNS} FROM validators {filter} ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to query validators")?;

        Ok(rows.into_iter().map(row_to_validator_record).collect())
    }
}

pub(crate) async fn get_validator_by_signing_on(
    conn: &mut SqliteConnection,
    signing_key: &str,
) -> Result<Option<ValidatorRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {VALIDATOR_COLUMNS} FROM validators WHERE signing_key = ?"
    ))
    .bind(signing_key)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to fetch validator by signing key")?;

    Ok(row.map(row_to_validator_record))
}

pub(crate) async fn get_validator_by_master_on(
    conn: &mut SqliteConnection,
    master_key: &str,
) -> Result<Option<ValidatorRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {VALIDATOR_COLUMNS} FROM validators WHERE master_key = ?"
    ))
    .bind(master_key)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to fetch validator by master key")?;

    Ok(row.map(row_to_validator_record))
}

pub(crate) async fn validators_attributed_to_on(
    conn: &mut SqliteConnection,
    source: &str,
) -> Result<Vec<ValidatorRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {VALIDATOR_COLUMNS} FROM validators WHERE unl = ? ORDER BY id"
    ))
    .bind(source)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to fetch attributed validators")?;

    Ok(rows.into_iter().map(row_to_validator_record).collect())
}

pub(crate) async fn insert_validator_on(
    conn: &mut SqliteConnection,
    signing_key: &str,
    master_key: Option<&str>,
    unl: Option<&str>,
    now: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO validators (signing_key, master_key, unl, updated_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(signing_key)
    .bind(master_key)
    .bind(unl)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("Failed to insert validator")?;

    Ok(())
}

/// Set `unl` on the row with `signing_key`, optionally backfilling its master key.
pub(crate) async fn set_unl_on(
    conn: &mut SqliteConnection,
    signing_key: &str,
    master_key: Option<&str>,
    unl: Option<&str>,
    now: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE validators
        SET unl = ?,
            master_key = COALESCE(master_key, ?),
            updated_at = ?
        WHERE signing_key = ?
        "#,
    )
    .bind(unl)
    .bind(master_key)
    .bind(now)
    .bind(signing_key)
    .execute(&mut *conn)
    .await
    .context("Failed to update validator attribution")?;

    Ok(result.rows_affected() > 0)
}

/// Attach `master_key` to the row observed under `signing_key`.
///
/// Only fills a missing master key; a row already bound to a master key is
/// never rebound, and a master key already owned by another row is left
/// where it is (`master_key` is unique).
pub(crate) async fn backfill_master_key_on(
    conn: &mut SqliteConnection,
    signing_key: &str,
    master_key: &str,
    now: i64,
) -> Result<ValidatorLink> {
    let Some(row) = get_validator_by_signing_on(conn, signing_key).await? else {
        return Ok(ValidatorLink::Unchanged);
    };

    match row.master_key.as_deref() {
        Some(existing) if existing == master_key => return Ok(ValidatorLink::Unchanged),
        Some(existing) => {
            warn!(
                signing_key,
                master_key,
                existing, "Validator row already bound to a different master key"
            );
            return Ok(ValidatorLink::Conflict);
        }
        None => {}
    }

    if let Some(owner) = get_validator_by_master_on(conn, master_key).await? {
        warn!(
            signing_key,
            master_key,
            owner = %owner.signing_key,
            "Master key already bound to another validator row"
        );
        return Ok(ValidatorLink::Conflict);
    }

    let result = sqlx::query(
        r#"
        UPDATE validators
        SET master_key = ?, updated_at = ?
        WHERE signing_key = ? AND master_key IS NULL
        "#,
    )
    .bind(master_key)
    .bind(now)
    .bind(signing_key)
    .execute(&mut *conn)
    .await
    .context("Failed to backfill validator master key")?;

    if result.rows_affected() == 0 {
        return Ok(ValidatorLink::Unchanged);
    }

    debug!(signing_key, master_key, "Backfilled master key");
    Ok(ValidatorLink::Backfilled)
}

fn row_to_validator_record(row: SqliteRow) -> ValidatorRecord {
    ValidatorRecord {
        signing_key: row.get("signing_key"),
        master_key: row.get("master_key"),
        unl: row.get("unl"),
        updated_at: row.get("updated_at"),
    }
}
