//! UNL source storage operations (anti-rollback state per publisher endpoint).

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use super::{Storage, UnlSourceRecord};

impl Storage {
    /// Last accepted list for a publisher endpoint.
    pub async fn get_unl_source(&self, url: &str) -> Result<Option<UnlSourceRecord>> {
        let mut conn = self.pool.acquire().await?;
        get_unl_source_on(&mut conn, url).await
    }

    /// All publisher endpoints with an accepted list.
    pub async fn list_unl_sources(&self) -> Result<Vec<UnlSourceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT url, source_id, network, publisher_key, sequence,
                   expiration, member_count, updated_at
            FROM unl_sources
            ORDER BY url
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list UNL sources")?;

        Ok(rows.into_iter().map(row_to_unl_source_record).collect())
    }
}

pub(crate) async fn get_unl_source_on(
    conn: &mut SqliteConnection,
    url: &str,
) -> Result<Option<UnlSourceRecord>> {
    let row = sqlx::query(
        r#"
        SELECT url, source_id, network, publisher_key, sequence,
               expiration, member_count, updated_at
        FROM unl_sources
        WHERE url = ?
        "#,
    )
    .bind(url)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to fetch UNL source")?;

    Ok(row.map(row_to_unl_source_record))
}

/// Record `record` as the last accepted list for its endpoint, but only if
/// its sequence is strictly higher than the stored one.
///
/// Returns `false` when the stored sequence is equal or higher.
pub(crate) async fn advance_unl_sequence_on(
    conn: &mut SqliteConnection,
    record: &UnlSourceRecord,
) -> Result<bool> {
    let sequence = i64::try_from(record.sequence)
        .with_context(|| format!("UNL sequence {} out of range", record.sequence))?;
    let member_count = i64::try_from(record.member_count)
        .with_context(|| format!("UNL member count {} out of range", record.member_count))?;

    let result = sqlx::query(
        r#"
        INSERT INTO unl_sources (
            url, source_id, network, publisher_key, sequence,
            expiration, member_count, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(url) DO UPDATE SET
            source_id = excluded.source_id,
            network = excluded.network,
            publisher_key = excluded.publisher_key,
            sequence = excluded.sequence,
            expiration = excluded.expiration,
            member_count = excluded.member_count,
            updated_at = excluded.updated_at
        WHERE excluded.sequence > unl_sources.sequence
        "#,
    )
    .bind(&record.url)
    .bind(&record.source_id)
    .bind(&record.network)
    .bind(&record.publisher_key)
    .bind(sequence)
    .bind(record.expiration)
    .bind(member_count)
    .bind(record.updated_at)
    .execute(&mut *conn)
    .await
    .context("Failed to advance UNL sequence")?;

    Ok(result.rows_affected() > 0)
}

fn row_to_unl_source_record(row: SqliteRow) -> UnlSourceRecord {
    UnlSourceRecord {
        url: row.get("url"),
        source_id: row.get("source_id"),
        network: row.get("network"),
        publisher_key: row.get("publisher_key"),
        sequence: row.get::<i64, _>("sequence") as u64,
        expiration: row.get("expiration"),
        member_count: row.get::<i64, _>("member_count") as u64,
        updated_at: row.get("updated_at"),
    }
}
