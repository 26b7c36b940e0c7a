//! Port traits for data repositories.
//!
//! These traits define the storage interface used by the domain layer.
//! Implementations live in the infrastructure layer (e.g.,
//! `stakewatch-storage`).

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::{
    Block, Chain, Era, EraNominator, EraPayout, EraValidator, Event, Extrinsic, Session,
};

// =============================================================================
// Filter Types
// =============================================================================

/// Filter options for extrinsic queries.
#[derive(Debug, Clone, Default)]
pub struct ExtrinsicFilter {
    pub block_number_gte: Option<u64>,
    pub block_number_lte: Option<u64>,
    /// `(section, method)` pairs; empty matches every call.
    pub calls: Vec<(String, String)>,
}

impl ExtrinsicFilter {
    /// Check an extrinsic against the filter.
    pub fn matches(&self, extrinsic: &Extrinsic) -> bool {
        self.block_number_gte
            .is_none_or(|gte| extrinsic.block_number >= gte)
            && self
                .block_number_lte
                .is_none_or(|lte| extrinsic.block_number <= lte)
            && (self.calls.is_empty()
                || self
                    .calls
                    .iter()
                    .any(|(s, m)| *s == extrinsic.section && *m == extrinsic.method))
    }
}

/// Set of payout rows replaced together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutScope {
    /// Payouts executed in one block.
    Block(u64),
    /// Payouts executed inside one era's block window.
    MadeInEra(u32),
}

impl PayoutScope {
    /// Check whether a payout row belongs to this scope.
    pub fn contains(&self, payout: &EraPayout) -> bool {
        match self {
            Self::Block(number) => payout.block_number == *number,
            Self::MadeInEra(era) => payout.made_in_era == *era,
        }
    }
}

// =============================================================================
// Repository Traits
// =============================================================================

/// Repository for block data.
#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// Insert a block unless one with the same number exists.
    ///
    /// Returns `true` if the row was created.
    async fn insert_block_if_absent(&self, block: &Block) -> StorageResult<bool>;

    /// Get block by number.
    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>>;

    async fn lowest_block_number(&self) -> StorageResult<Option<u64>>;

    async fn highest_block_number(&self) -> StorageResult<Option<u64>>;
}

/// Repository for session data.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a session unless one with the same index exists.
    ///
    /// Returns `true` if the row was created.
    async fn insert_session_if_absent(&self, session: &Session) -> StorageResult<bool>;

    async fn get_session(&self, index: u32) -> StorageResult<Option<Session>>;

    /// Session with the highest start block not above `block_number`.
    async fn session_at_block(&self, block_number: u64) -> StorageResult<Option<Session>>;

    /// Session with the highest start block.
    async fn latest_session(&self) -> StorageResult<Option<Session>>;

    /// Session with the lowest start block.
    async fn earliest_session(&self) -> StorageResult<Option<Session>>;
}

/// Repository for era aggregates and their stake snapshots.
#[async_trait]
pub trait EraRepository: Send + Sync {
    /// Insert or fully update an era aggregate.
    async fn upsert_era(&self, era: &Era) -> StorageResult<()>;

    async fn get_era(&self, index: u32) -> StorageResult<Option<Era>>;

    async fn lowest_era_index(&self) -> StorageResult<Option<u32>>;

    async fn highest_era_index(&self) -> StorageResult<Option<u32>>;

    /// Era with the highest start session not above `session_index`.
    async fn era_at_session(&self, session_index: u32) -> StorageResult<Option<Era>>;

    async fn list_validators(&self, era_index: u32) -> StorageResult<Vec<EraValidator>>;

    async fn list_nominators(&self, era_index: u32) -> StorageResult<Vec<EraNominator>>;
}

/// Repository for extrinsic data.
#[async_trait]
pub trait ExtrinsicRepository: Send + Sync {
    /// List extrinsics for a block.
    async fn list_extrinsics_for_block(&self, block_number: u64) -> StorageResult<Vec<Extrinsic>>;

    /// List extrinsics matching a filter, ordered by `(block_number, index)`.
    async fn list_extrinsics(&self, filter: ExtrinsicFilter) -> StorageResult<Vec<Extrinsic>>;
}

/// Repository for event data.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// List events for a block.
    async fn list_events_for_block(&self, block_number: u64) -> StorageResult<Vec<Event>>;

    /// List events for an extrinsic.
    async fn list_events_for_extrinsic(
        &self,
        block_number: u64,
        extrinsic_index: u32,
    ) -> StorageResult<Vec<Event>>;
}

/// Repository for payout records.
#[async_trait]
pub trait PayoutRepository: Send + Sync {
    async fn list_payouts(&self, scope: PayoutScope) -> StorageResult<Vec<EraPayout>>;

    async fn lowest_payout_block(&self) -> StorageResult<Option<u64>>;

    async fn highest_payout_block(&self) -> StorageResult<Option<u64>>;
}

/// Repository for per-chain checkpoint records.
#[async_trait]
pub trait ChainRepository: Send + Sync {
    async fn get_chain(&self, name: &str) -> StorageResult<Option<Chain>>;

    /// Update the checkpoint of an existing chain record.
    async fn set_last_grabbed_block(&self, name: &str, block: Option<u64>) -> StorageResult<()>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// Combined repository access for the indexer.
///
/// This trait provides access to all individual repositories and the
/// delete-then-recreate operations that span several rows. Each `replace_*`
/// call must leave either the old or the new set of rows in place, never a
/// mix of both.
#[async_trait]
pub trait Repositories: Send + Sync {
    fn blocks(&self) -> &dyn BlockRepository;

    fn sessions(&self) -> &dyn SessionRepository;

    fn eras(&self) -> &dyn EraRepository;

    fn extrinsics(&self) -> &dyn ExtrinsicRepository;

    fn events(&self) -> &dyn EventRepository;

    fn payouts(&self) -> &dyn PayoutRepository;

    fn chains(&self) -> &dyn ChainRepository;

    /// Replace every event and extrinsic of a block.
    async fn replace_block_activity(
        &self,
        block_number: u64,
        events: &[Event],
        extrinsics: &[Extrinsic],
    ) -> StorageResult<()>;

    /// Replace the validator and nominator snapshot of an era.
    async fn replace_era_snapshot(
        &self,
        era_index: u32,
        validators: &[EraValidator],
        nominators: &[EraNominator],
    ) -> StorageResult<()>;

    /// Replace every payout in a scope.
    async fn replace_payouts(&self, scope: PayoutScope, payouts: &[EraPayout])
    -> StorageResult<()>;
}
