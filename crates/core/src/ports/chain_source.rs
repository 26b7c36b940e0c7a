//! Port trait for point-in-time chain queries.
//!
//! This trait defines the reads the ingestors need from a Substrate chain.
//! Implementations live in the infrastructure layer (e.g.,
//! `stakewatch-substrate`).

use async_trait::async_trait;

use crate::error::ChainResult;
use crate::models::BlockHash;

/// Raw extrinsic data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExtrinsic {
    /// Index in block.
    pub index: u32,
    /// Decoded pallet name.
    pub pallet: String,
    /// Decoded call name.
    pub call: String,
    /// Signer address (if signed).
    pub signer: Option<String>,
    /// Arguments as JSON.
    pub args: serde_json::Value,
    /// Nonce (zero if unsigned).
    pub nonce: u64,
    /// Tip (zero if unsigned).
    pub tip: u128,
}

/// Raw event data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Index in block.
    pub index: u32,
    /// Extrinsic index (if applicable).
    pub extrinsic_index: Option<u32>,
    /// Human-readable phase.
    pub phase: String,
    /// Pallet name.
    pub pallet: String,
    /// Event variant name.
    pub name: String,
    /// Event data as JSON.
    pub data: serde_json::Value,
    /// Event topics.
    pub topics: Vec<[u8; 32]>,
}

/// `Staking.ErasRewardPoints` for one era.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EraRewardPoints {
    pub total: u32,
    /// Points per validator address. Empty while the era is still running.
    pub individual: Vec<(String, u32)>,
}

/// `Staking.ErasValidatorPrefs` for one validator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatorPrefs {
    /// Commission as a Perbill.
    pub commission: u32,
    pub blocked: bool,
}

/// Stake of one nominator behind a validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndividualExposure {
    pub who: String,
    pub value: u128,
}

/// `Staking.ErasStakers` for one validator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exposure {
    pub total: u128,
    pub own: u128,
    pub others: Vec<IndividualExposure>,
}

/// Port trait for chain queries.
///
/// Every call is a blocking network read from the indexer's point of view;
/// the ingestors await them one at a time.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Hash of the block at `height`, `None` if the chain is not that tall.
    async fn block_hash(&self, height: u64) -> ChainResult<Option<BlockHash>>;

    /// Number of the current chain head.
    async fn best_number(&self) -> ChainResult<u64>;

    /// All extrinsics of a block.
    async fn extrinsics(&self, hash: &BlockHash) -> ChainResult<Vec<RawExtrinsic>>;

    /// All system events of a block.
    async fn events(&self, hash: &BlockHash) -> ChainResult<Vec<RawEvent>>;

    /// `Session.CurrentIndex` at a block.
    async fn session_index(&self, hash: &BlockHash) -> ChainResult<u32>;

    /// `Timestamp.Now` at a block, in milliseconds.
    async fn timestamp(&self, hash: &BlockHash) -> ChainResult<u64>;

    /// `Staking.CurrentEra` at the chain head.
    async fn current_era(&self) -> ChainResult<u32>;

    /// Number of eras the chain keeps staking history for.
    async fn history_depth(&self) -> ChainResult<u32>;

    /// `Staking.ErasStartSessionIndex`, `None` if unknown for the era.
    async fn era_start_session_index(&self, era: u32) -> ChainResult<Option<u32>>;

    async fn era_reward_points(&self, era: u32) -> ChainResult<EraRewardPoints>;

    async fn era_total_stake(&self, era: u32) -> ChainResult<u128>;

    /// `Staking.ErasValidatorReward`, `None` until the era has been paid.
    async fn era_validator_reward(&self, era: u32) -> ChainResult<Option<u128>>;

    async fn era_validator_prefs(&self, era: u32, validator: &str) -> ChainResult<ValidatorPrefs>;

    async fn era_stakers(&self, era: u32, validator: &str) -> ChainResult<Exposure>;

    /// `Session.Validators` at the chain head.
    async fn session_validators(&self) -> ChainResult<Vec<String>>;
}
