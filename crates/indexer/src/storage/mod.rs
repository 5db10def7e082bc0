//! Storage layer for the unlwatch indexer.
//!
//! This module is the only shared mutable state in the system. It provides
//! database operations for:
//! - Manifests (compare-and-set on sequence, terminal revocation)
//! - Validators (signing-key keyed rows, trust attribution)
//! - UNL sources (last accepted list sequence per publisher endpoint)
//!
//! Every write that must be atomic is a single SQL statement or runs inside
//! one transaction, so concurrent ingestion paths never need external locks.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub mod manifest;
pub mod types;
pub mod unl_source;
pub mod validator;

pub use types::*;

/// Database storage for the indexer.
///
/// Provides async access to SQLite database with connection pooling.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// This will create the database file if it doesn't exist. Call
    /// [`Storage::run_migrations`] before first use.
    ///
    /// # Arguments
    /// * `database_url` - SQLite database URL (e.g., "sqlite://unlwatch.db")
    /// * `max_connections` - Pool upper bound (default 5)
    /// * `min_connections` - Pool lower bound (default 1)
    ///
    /// # Example
    /// ```no_run
    /// # use unlwatch_indexer::storage::Storage;
    /// # async fn example() -> anyhow::Result<()> {
    /// let storage = Storage::new("sqlite://unlwatch.db", None, None).await?;
    /// storage.run_migrations().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        database_url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        // WAL lets the read-only API layer query while jobs write.
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(5))
            .min_connections(min_connections.unwrap_or(1))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(
        path: P,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let database_url = format!("sqlite://{}", path.display());
        Self::new(&database_url, max_connections, min_connections).await
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Get a reference to the connection pool.
    ///
    /// Used by components that need to group several writes into one
    /// transaction (see [`crate::reconcile::TrustReconciler`]).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let manifest_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM manifests")
            .fetch_one(&self.pool)
            .await?;

        let revoked_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM manifests WHERE revoked = 1")
                .fetch_one(&self.pool)
                .await?;

        let validator_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM validators")
            .fetch_one(&self.pool)
            .await?;

        let trusted_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM validators WHERE unl IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;

        let unl_source_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM unl_sources")
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            manifest_count: manifest_count as u64,
            revoked_count: revoked_count as u64,
            validator_count: validator_count as u64,
            trusted_validator_count: trusted_count as u64,
            unl_source_count: unl_source_count as u64,
        })
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of manifests
    pub manifest_count: u64,

    /// Manifests whose master key is revoked
    pub revoked_count: u64,

    /// Total number of validators
    pub validator_count: u64,

    /// Validators currently attributed to some UNL
    pub trusted_validator_count: u64,

    /// Publisher endpoints with an accepted list
    pub unl_source_count: u64,
}

/// Current Unix time in seconds.
pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_storage_creation() {
        let temp_db = NamedTempFile::new().unwrap();

        let storage = Storage::new_with_path(temp_db.path(), None, None)
            .await
            .unwrap();
        storage.run_migrations().await.unwrap();

        storage.health_check().await.unwrap();

        // Migrations are idempotent.
        storage.run_migrations().await.unwrap();

        storage.close().await;
    }

    #[tokio::test]
    async fn test_database_stats() {
        let temp_db = NamedTempFile::new().unwrap();

        let storage = Storage::new_with_path(temp_db.path(), None, None)
            .await
            .unwrap();
        storage.run_migrations().await.unwrap();

        let stats = storage.stats().await.unwrap();
        assert_eq!(
            stats,
            DatabaseStats {
                manifest_count: 0,
                revoked_count: 0,
                validator_count: 0,
                trusted_validator_count: 0,
                unl_source_count: 0,
            }
        );

        storage.close().await;
    }
}
