//! In-memory adapters for tests.
//!
//! [`InMemoryRepositories`] implements every repository port over a single
//! mutex-guarded [`StoreSnapshot`], and [`MockChain`] serves canned blocks and
//! staking storage. Enabled for this crate's tests and for dependents through
//! the `test-utils` feature.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{ChainError, ChainResult, StorageError, StorageResult};
use crate::models::{
    Block, BlockHash, Chain, Era, EraNominator, EraPayout, EraValidator, Event, Extrinsic,
    Session,
};
use crate::ports::{
    BlockRepository, ChainRepository, ChainSource, EraRepository, EraRewardPoints, EventRepository,
    Exposure, ExtrinsicFilter, ExtrinsicRepository, PayoutRepository, PayoutScope, RawEvent,
    RawExtrinsic, Repositories, SessionRepository, ValidatorPrefs,
};

// =============================================================================
// In-memory store
// =============================================================================

/// Every row held by [`InMemoryRepositories`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub blocks: BTreeMap<u64, Block>,
    pub sessions: BTreeMap<u32, Session>,
    pub eras: BTreeMap<u32, Era>,
    pub validators: Vec<EraValidator>,
    pub nominators: Vec<EraNominator>,
    /// Ordered by `(block_number, index)`.
    pub extrinsics: Vec<Extrinsic>,
    /// Ordered by `(block_number, index)`.
    pub events: Vec<Event>,
    /// Ordered by block number, then insertion.
    pub payouts: Vec<EraPayout>,
    pub chains: BTreeMap<String, Chain>,
}

/// Repositories backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryRepositories {
    state: Mutex<StoreSnapshot>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a Chain record.
    pub async fn seed_chain(&self, chain: Chain) {
        self.state
            .lock()
            .await
            .chains
            .insert(chain.name.clone(), chain);
    }

    /// Copy of every stored row.
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl BlockRepository for InMemoryRepositories {
    async fn insert_block_if_absent(&self, block: &Block) -> StorageResult<bool> {
        let mut state = self.state.lock().await;
        if state.blocks.contains_key(&block.number) {
            return Ok(false);
        }
        state.blocks.insert(block.number, block.clone());
        Ok(true)
    }

    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>> {
        Ok(self.state.lock().await.blocks.get(&number).cloned())
    }

    async fn lowest_block_number(&self) -> StorageResult<Option<u64>> {
        Ok(self.state.lock().await.blocks.keys().next().copied())
    }

    async fn highest_block_number(&self) -> StorageResult<Option<u64>> {
        Ok(self.state.lock().await.blocks.keys().next_back().copied())
    }
}

#[async_trait]
impl SessionRepository for InMemoryRepositories {
    async fn insert_session_if_absent(&self, session: &Session) -> StorageResult<bool> {
        let mut state = self.state.lock().await;
        if state.sessions.contains_key(&session.index) {
            return Ok(false);
        }
        state.sessions.insert(session.index, session.clone());
        Ok(true)
    }

    async fn get_session(&self, index: u32) -> StorageResult<Option<Session>> {
        Ok(self.state.lock().await.sessions.get(&index).cloned())
    }

    async fn session_at_block(&self, block_number: u64) -> StorageResult<Option<Session>> {
        Ok(self
            .state
            .lock()
            .await
            .sessions
            .values()
            .filter(|s| s.start_block_number <= block_number)
            .max_by_key(|s| s.start_block_number)
            .cloned())
    }

    async fn latest_session(&self) -> StorageResult<Option<Session>> {
        Ok(self
            .state
            .lock()
            .await
            .sessions
            .values()
            .max_by_key(|s| s.start_block_number)
            .cloned())
    }

    async fn earliest_session(&self) -> StorageResult<Option<Session>> {
        Ok(self
            .state
            .lock()
            .await
            .sessions
            .values()
            .min_by_key(|s| s.start_block_number)
            .cloned())
    }
}

#[async_trait]
impl EraRepository for InMemoryRepositories {
    async fn upsert_era(&self, era: &Era) -> StorageResult<()> {
        self.state.lock().await.eras.insert(era.index, era.clone());
        Ok(())
    }

    async fn get_era(&self, index: u32) -> StorageResult<Option<Era>> {
        Ok(self.state.lock().await.eras.get(&index).cloned())
    }

    async fn lowest_era_index(&self) -> StorageResult<Option<u32>> {
        Ok(self.state.lock().await.eras.keys().next().copied())
    }

    async fn highest_era_index(&self) -> StorageResult<Option<u32>> {
        Ok(self.state.lock().await.eras.keys().next_back().copied())
    }

    async fn era_at_session(&self, session_index: u32) -> StorageResult<Option<Era>> {
        Ok(self
            .state
            .lock()
            .await
            .eras
            .values()
            .filter(|e| e.era_start_session_index <= session_index)
            .max_by_key(|e| e.era_start_session_index)
            .cloned())
    }

    async fn list_validators(&self, era_index: u32) -> StorageResult<Vec<EraValidator>> {
        Ok(self
            .state
            .lock()
            .await
            .validators
            .iter()
            .filter(|v| v.era_index == era_index)
            .cloned()
            .collect())
    }

    async fn list_nominators(&self, era_index: u32) -> StorageResult<Vec<EraNominator>> {
        Ok(self
            .state
            .lock()
            .await
            .nominators
            .iter()
            .filter(|n| n.era_index == era_index)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ExtrinsicRepository for InMemoryRepositories {
    async fn list_extrinsics_for_block(&self, block_number: u64) -> StorageResult<Vec<Extrinsic>> {
        Ok(self
            .state
            .lock()
            .await
            .extrinsics
            .iter()
            .filter(|e| e.block_number == block_number)
            .cloned()
            .collect())
    }

    async fn list_extrinsics(&self, filter: ExtrinsicFilter) -> StorageResult<Vec<Extrinsic>> {
        Ok(self
            .state
            .lock()
            .await
            .extrinsics
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventRepository for InMemoryRepositories {
    async fn list_events_for_block(&self, block_number: u64) -> StorageResult<Vec<Event>> {
        Ok(self
            .state
            .lock()
            .await
            .events
            .iter()
            .filter(|e| e.block_number == block_number)
            .cloned()
            .collect())
    }

    async fn list_events_for_extrinsic(
        &self,
        block_number: u64,
        extrinsic_index: u32,
    ) -> StorageResult<Vec<Event>> {
        Ok(self
            .state
            .lock()
            .await
            .events
            .iter()
            .filter(|e| e.block_number == block_number && e.apply_extrinsic == Some(extrinsic_index))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PayoutRepository for InMemoryRepositories {
    async fn list_payouts(&self, scope: PayoutScope) -> StorageResult<Vec<EraPayout>> {
        Ok(self
            .state
            .lock()
            .await
            .payouts
            .iter()
            .filter(|p| scope.contains(p))
            .cloned()
            .collect())
    }

    async fn lowest_payout_block(&self) -> StorageResult<Option<u64>> {
        Ok(self.state.lock().await.payouts.iter().map(|p| p.block_number).min())
    }

    async fn highest_payout_block(&self) -> StorageResult<Option<u64>> {
        Ok(self.state.lock().await.payouts.iter().map(|p| p.block_number).max())
    }
}

#[async_trait]
impl ChainRepository for InMemoryRepositories {
    async fn get_chain(&self, name: &str) -> StorageResult<Option<Chain>> {
        Ok(self.state.lock().await.chains.get(name).cloned())
    }

    async fn set_last_grabbed_block(&self, name: &str, block: Option<u64>) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        let chain = state
            .chains
            .get_mut(name)
            .ok_or_else(|| StorageError::NotFound(format!("chain {name}")))?;
        chain.last_grabbed_block = block;
        Ok(())
    }
}

#[async_trait]
impl Repositories for InMemoryRepositories {
    fn blocks(&self) -> &dyn BlockRepository {
        self
    }

    fn sessions(&self) -> &dyn SessionRepository {
        self
    }

    fn eras(&self) -> &dyn EraRepository {
        self
    }

    fn extrinsics(&self) -> &dyn ExtrinsicRepository {
        self
    }

    fn events(&self) -> &dyn EventRepository {
        self
    }

    fn payouts(&self) -> &dyn PayoutRepository {
        self
    }

    fn chains(&self) -> &dyn ChainRepository {
        self
    }

    async fn replace_block_activity(
        &self,
        block_number: u64,
        events: &[Event],
        extrinsics: &[Extrinsic],
    ) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state.events.retain(|e| e.block_number != block_number);
        state.events.extend_from_slice(events);
        state.events.sort_by_key(|e| (e.block_number, e.index));
        state.extrinsics.retain(|e| e.block_number != block_number);
        state.extrinsics.extend_from_slice(extrinsics);
        state.extrinsics.sort_by_key(|e| (e.block_number, e.index));
        Ok(())
    }

    async fn replace_era_snapshot(
        &self,
        era_index: u32,
        validators: &[EraValidator],
        nominators: &[EraNominator],
    ) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state.validators.retain(|v| v.era_index != era_index);
        state.validators.extend_from_slice(validators);
        state.nominators.retain(|n| n.era_index != era_index);
        state.nominators.extend_from_slice(nominators);
        Ok(())
    }

    async fn replace_payouts(&self, scope: PayoutScope, payouts: &[EraPayout]) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state.payouts.retain(|p| !scope.contains(p));
        // Rows are keyed by event id, like the unique index in Postgres.
        for payout in payouts {
            match state.payouts.iter_mut().find(|p| p.event_id == payout.event_id) {
                Some(existing) => *existing = payout.clone(),
                None => state.payouts.push(payout.clone()),
            }
        }
        state.payouts.sort_by_key(|p| p.block_number);
        Ok(())
    }
}

// =============================================================================
// Mock chain
// =============================================================================

/// Canned content of one block.
#[derive(Debug, Clone, Default)]
pub struct MockBlock {
    pub timestamp_ms: u64,
    pub session_index: u32,
    pub extrinsics: Vec<RawExtrinsic>,
    pub events: Vec<RawEvent>,
}

impl MockBlock {
    pub fn new(timestamp_ms: u64, session_index: u32) -> Self {
        Self {
            timestamp_ms,
            session_index,
            ..Default::default()
        }
    }

    pub fn with_extrinsic(mut self, extrinsic: RawExtrinsic) -> Self {
        self.extrinsics.push(extrinsic);
        self
    }

    pub fn with_event(mut self, event: RawEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// Canned staking storage of one era.
#[derive(Debug, Clone, Default)]
pub struct MockEra {
    pub start_session: Option<u32>,
    pub points: EraRewardPoints,
    pub total_stake: u128,
    pub validator_reward: Option<u128>,
    pub prefs: HashMap<String, ValidatorPrefs>,
    pub stakers: HashMap<String, Exposure>,
}

/// Chain source serving canned blocks and eras.
///
/// The best block is the highest canned height. Block hashes encode their
/// height, see [`MockChain::hash_for`].
#[derive(Debug, Default)]
pub struct MockChain {
    blocks: Mutex<BTreeMap<u64, MockBlock>>,
    eras: Mutex<HashMap<u32, MockEra>>,
    current_era: u32,
    history_depth: u32,
    session_validators: Vec<String>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            history_depth: 84,
            ..Default::default()
        }
    }

    /// Hash served for the block at `height`.
    pub fn hash_for(height: u64) -> [u8; 32] {
        let mut hash = [0xab; 32];
        hash[24..].copy_from_slice(&height.to_be_bytes());
        hash
    }

    pub fn with_block(mut self, height: u64, block: MockBlock) -> Self {
        self.blocks.get_mut().insert(height, block);
        self
    }

    pub async fn replace_block(&self, height: u64, block: MockBlock) {
        self.blocks.lock().await.insert(height, block);
    }

    pub fn with_current_era(mut self, era: u32) -> Self {
        self.current_era = era;
        self
    }

    pub fn with_history_depth(mut self, depth: u32) -> Self {
        self.history_depth = depth;
        self
    }

    pub fn with_era(mut self, index: u32, era: MockEra) -> Self {
        self.eras.get_mut().insert(index, era);
        self
    }

    pub async fn replace_era(&self, index: u32, era: MockEra) {
        self.eras.lock().await.insert(index, era);
    }

    pub fn with_session_validators(mut self, validators: Vec<String>) -> Self {
        self.session_validators = validators;
        self
    }

    async fn block(&self, hash: &BlockHash) -> ChainResult<MockBlock> {
        let mut height = [0u8; 8];
        height.copy_from_slice(&hash.0[24..]);
        let height = u64::from_be_bytes(height);
        self.blocks
            .lock()
            .await
            .get(&height)
            .cloned()
            .ok_or(ChainError::BlockNotFound(height))
    }

    async fn era(&self, index: u32) -> MockEra {
        self.eras.lock().await.get(&index).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn block_hash(&self, height: u64) -> ChainResult<Option<BlockHash>> {
        Ok(self
            .blocks
            .lock()
            .await
            .contains_key(&height)
            .then(|| BlockHash(Self::hash_for(height))))
    }

    async fn best_number(&self) -> ChainResult<u64> {
        Ok(self
            .blocks
            .lock()
            .await
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    async fn extrinsics(&self, hash: &BlockHash) -> ChainResult<Vec<RawExtrinsic>> {
        Ok(self.block(hash).await?.extrinsics)
    }

    async fn events(&self, hash: &BlockHash) -> ChainResult<Vec<RawEvent>> {
        Ok(self.block(hash).await?.events)
    }

    async fn session_index(&self, hash: &BlockHash) -> ChainResult<u32> {
        Ok(self.block(hash).await?.session_index)
    }

    async fn timestamp(&self, hash: &BlockHash) -> ChainResult<u64> {
        Ok(self.block(hash).await?.timestamp_ms)
    }

    async fn current_era(&self) -> ChainResult<u32> {
        Ok(self.current_era)
    }

    async fn history_depth(&self) -> ChainResult<u32> {
        Ok(self.history_depth)
    }

    async fn era_start_session_index(&self, era: u32) -> ChainResult<Option<u32>> {
        Ok(self.era(era).await.start_session)
    }

    async fn era_reward_points(&self, era: u32) -> ChainResult<EraRewardPoints> {
        Ok(self.era(era).await.points)
    }

    async fn era_total_stake(&self, era: u32) -> ChainResult<u128> {
        Ok(self.era(era).await.total_stake)
    }

    async fn era_validator_reward(&self, era: u32) -> ChainResult<Option<u128>> {
        Ok(self.era(era).await.validator_reward)
    }

    async fn era_validator_prefs(&self, era: u32, validator: &str) -> ChainResult<ValidatorPrefs> {
        Ok(self
            .era(era)
            .await
            .prefs
            .get(validator)
            .cloned()
            .unwrap_or_default())
    }

    async fn era_stakers(&self, era: u32, validator: &str) -> ChainResult<Exposure> {
        Ok(self
            .era(era)
            .await
            .stakers
            .get(validator)
            .cloned()
            .unwrap_or_default())
    }

    async fn session_validators(&self) -> ChainResult<Vec<String>> {
        Ok(self.session_validators.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EraAttribution;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn payout(made_in_era: u32) -> EraPayout {
        EraPayout {
            event_id: "1100-4".into(),
            extrinsic_id: "1100-2".into(),
            block_number: 1_100,
            block_date: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            account_address: "0xN1".into(),
            payout: Decimal::from(3),
            paid_by: Some("0xV".into()),
            paid_for_era: EraAttribution::Era(10),
            made_in_era,
        }
    }

    #[tokio::test]
    async fn test_payouts_are_keyed_by_event_id_across_scopes() {
        let repos = InMemoryRepositories::new();
        repos
            .replace_payouts(PayoutScope::Block(1_100), &[payout(11)])
            .await
            .unwrap();
        // The same event re-attributed to another era from an era-scoped pass.
        repos
            .replace_payouts(PayoutScope::MadeInEra(12), &[payout(12)])
            .await
            .unwrap();

        let payouts = repos.snapshot().await.payouts;
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].made_in_era, 12);
        assert!(
            repos
                .list_payouts(PayoutScope::MadeInEra(11))
                .await
                .unwrap()
                .is_empty()
        );
    }
}
