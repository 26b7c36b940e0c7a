//! PostgreSQL database connection and configuration.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};

use stakewatch_core::error::{StorageError, StorageResult};

use super::helpers::non_negative;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to maintain.
    pub min_connections: u32,
    /// Connection acquisition timeout.
    pub acquire_timeout: Duration,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum connection lifetime.
    pub max_lifetime: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/stakewatch".to_string(),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl DatabaseConfig {
    /// Configuration for a single sequential traversal process.
    ///
    /// Items are written one at a time, so a small pool is enough.
    pub fn for_indexer(url: &str) -> Self {
        Self {
            url: url.to_string(),
            max_connections: 5,
            min_connections: 1,
            ..Default::default()
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database with the given configuration.
    #[instrument(skip_all)]
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        debug!(
            max_conn = config.max_connections,
            min_conn = config.min_connections,
            "Creating connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.url)
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;

        debug!("Connection pool created");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> StorageResult<()> {
        debug!("Running migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::MigrationError(e.to_string()))?;

        debug!("Migrations completed");

        Ok(())
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create the Chain record for `name` unless it exists.
    ///
    /// Returns `true` if the record was created. An existing checkpoint is
    /// left untouched.
    #[instrument(skip(self))]
    pub async fn seed_chain(&self, name: &str) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO chains (name, last_grabbed_block)
            VALUES ($1, NULL)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        let created = result.rows_affected() == 1;
        if created {
            info!(chain = name, "🌱 Chain record created");
        } else {
            debug!(chain = name, "Chain record already present");
        }
        Ok(created)
    }

    /// Purge all indexed data from the database.
    ///
    /// Truncates every data table and resets each chain checkpoint. Chain
    /// records, the schema and the migrations history are kept, so indexing
    /// can restart without re-seeding.
    #[instrument(skip(self))]
    pub async fn purge(&self) -> StorageResult<PurgeStats> {
        debug!("Starting database purge");

        let (blocks, events, extrinsics, eras, payouts): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM blocks),
                    (SELECT COUNT(*) FROM events),
                    (SELECT COUNT(*) FROM extrinsics),
                    (SELECT COUNT(*) FROM eras),
                    (SELECT COUNT(*) FROM era_payouts)
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        sqlx::query(
            r#"
            TRUNCATE blocks, sessions, eras, era_validators, era_nominators,
                     events, extrinsics, era_payouts
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        sqlx::query("UPDATE chains SET last_grabbed_block = NULL")
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        debug!("Database purge completed");

        Ok(PurgeStats {
            blocks_removed: non_negative(blocks, "blocks count")?,
            events_removed: non_negative(events, "events count")?,
            extrinsics_removed: non_negative(extrinsics, "extrinsics count")?,
            eras_removed: non_negative(eras, "eras count")?,
            payouts_removed: non_negative(payouts, "era_payouts count")?,
        })
    }
}

/// Statistics from a database purge operation.
#[derive(Debug, Clone)]
pub struct PurgeStats {
    pub blocks_removed: u64,
    pub events_removed: u64,
    pub extrinsics_removed: u64,
    pub eras_removed: u64,
    pub payouts_removed: u64,
}
