//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `stakewatch-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool, migrations, chain seeding and purge
//! - [`PgRepositories`] - Composite repository implementing `Repositories` trait
//! - Individual repos: `PgBlockRepository`, `PgEraRepository`, etc.
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = PgRepositories::new(Arc::new(db));
//! ```

mod block_repo;
mod chain_repo;
mod database;
mod era_repo;
mod event_repo;
mod extrinsic_repo;
mod helpers;
mod payout_repo;
mod session_repo;

pub use block_repo::PgBlockRepository;
pub use chain_repo::PgChainRepository;
pub use database::{Database, DatabaseConfig, PurgeStats};
pub use era_repo::PgEraRepository;
pub use event_repo::PgEventRepository;
pub use extrinsic_repo::PgExtrinsicRepository;
pub use payout_repo::PgPayoutRepository;
pub use session_repo::PgSessionRepository;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use tracing::trace;

use stakewatch_core::error::{StorageError, StorageResult};
use stakewatch_core::models::{EraNominator, EraPayout, EraValidator, Event, Extrinsic};
use stakewatch_core::ports::{
    BlockRepository, ChainRepository, EraRepository, EventRepository, ExtrinsicRepository,
    PayoutRepository, PayoutScope, Repositories, SessionRepository,
};

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `Repositories` trait.
///
/// This provides a single entry point for all storage operations and runs
/// every delete-then-recreate in one transaction.
pub struct PgRepositories {
    db: Arc<Database>,
    blocks: PgBlockRepository,
    sessions: PgSessionRepository,
    eras: PgEraRepository,
    extrinsics: PgExtrinsicRepository,
    events: PgEventRepository,
    payouts: PgPayoutRepository,
    chains: PgChainRepository,
}

impl PgRepositories {
    /// Create a new repository aggregate from a database connection.
    pub fn new(db: Arc<Database>) -> Self {
        let pool = db.pool().clone();
        Self {
            blocks: PgBlockRepository::new(&db),
            sessions: PgSessionRepository::new(pool.clone()),
            eras: PgEraRepository::new(pool.clone()),
            extrinsics: PgExtrinsicRepository::new(pool.clone()),
            events: PgEventRepository::new(pool.clone()),
            payouts: PgPayoutRepository::new(pool),
            chains: PgChainRepository::new(&db),
            db,
        }
    }

    async fn begin(&self) -> StorageResult<Transaction<'static, Postgres>> {
        self.db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))
    }
}

async fn commit(tx: Transaction<'static, Postgres>) -> StorageResult<()> {
    tx.commit()
        .await
        .map_err(|e| StorageError::TransactionError(e.to_string()))
}

#[async_trait]
impl Repositories for PgRepositories {
    fn blocks(&self) -> &dyn BlockRepository {
        &self.blocks
    }

    fn sessions(&self) -> &dyn SessionRepository {
        &self.sessions
    }

    fn eras(&self) -> &dyn EraRepository {
        &self.eras
    }

    fn extrinsics(&self) -> &dyn ExtrinsicRepository {
        &self.extrinsics
    }

    fn events(&self) -> &dyn EventRepository {
        &self.events
    }

    fn payouts(&self) -> &dyn PayoutRepository {
        &self.payouts
    }

    fn chains(&self) -> &dyn ChainRepository {
        &self.chains
    }

    async fn replace_block_activity(
        &self,
        block_number: u64,
        events: &[Event],
        extrinsics: &[Extrinsic],
    ) -> StorageResult<()> {
        let mut tx = self.begin().await?;

        event_repo::replace_events(&mut tx, block_number, events).await?;
        extrinsic_repo::replace_extrinsics(&mut tx, block_number, extrinsics).await?;

        commit(tx).await?;
        trace!(
            block = block_number,
            events = events.len(),
            extrinsics = extrinsics.len(),
            "Block activity replaced"
        );
        Ok(())
    }

    async fn replace_era_snapshot(
        &self,
        era_index: u32,
        validators: &[EraValidator],
        nominators: &[EraNominator],
    ) -> StorageResult<()> {
        let mut tx = self.begin().await?;

        era_repo::insert_snapshot(&mut tx, era_index, validators, nominators).await?;

        commit(tx).await?;
        trace!(
            era = era_index,
            validators = validators.len(),
            nominators = nominators.len(),
            "Era snapshot replaced"
        );
        Ok(())
    }

    async fn replace_payouts(&self, scope: PayoutScope, payouts: &[EraPayout]) -> StorageResult<()> {
        let mut tx = self.begin().await?;

        payout_repo::replace_payouts(&mut tx, scope, payouts).await?;

        commit(tx).await?;
        trace!(?scope, payouts = payouts.len(), "Payouts replaced");
        Ok(())
    }
}
