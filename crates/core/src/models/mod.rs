//! Domain models representing indexed chain state.
//!
//! These models are storage-agnostic and represent the canonical
//! form of indexed data within the domain layer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// 32-byte Hash Types
// =============================================================================

/// Macro to generate 32-byte hash newtypes with common functionality.
///
/// Generates:
/// - `from_hex()` - Parse from hex string (with or without 0x prefix)
/// - `to_hex()` - Convert to 0x-prefixed hex string
/// - `Display` trait implementation
/// - `From<[u8; 32]>` implementation
macro_rules! hash32_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Parse from hex string (with or without 0x prefix).
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// Convert to 0x-prefixed hex string.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            /// Get the inner bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

hash32_newtype!(
    /// 32-byte block hash (Blake2-256).
    BlockHash
);

// =============================================================================
// Blocks & Sessions
// =============================================================================

/// Indexed block header.
///
/// Created once per height and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block number (height).
    pub number: u64,
    /// Block hash.
    pub hash: BlockHash,
    /// Timestamp from `pallet_timestamp`.
    pub start_date_time: DateTime<Utc>,
}

/// A session, identified by its index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub index: u32,
    /// First block observed for this session.
    pub start_block_number: u64,
}

// =============================================================================
// Eras & stake snapshots
// =============================================================================

/// Era aggregate.
///
/// Upserted: reward points are only final once the era has ended, so the
/// row may be written early and refreshed later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Era {
    pub index: u32,
    pub era_start_session_index: u32,
    pub total_points: u32,
    pub total_stake: Decimal,
    pub validators_rewards: Decimal,
    /// Number of validators with individual reward points.
    pub validators_arr_length: u32,
}

/// Stake snapshot of one validator in one era.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraValidator {
    pub era_index: u32,
    pub validator_address: String,
    /// Individual reward points (zero while the era is still active).
    pub points: u32,
    /// Commission in percent.
    pub commission: Decimal,
    pub blocked: bool,
    pub total_stake: Decimal,
    pub own_stake: Decimal,
    pub others_stake: Decimal,
    pub nominators_arr_length: u32,
}

/// Stake of one nominator behind one validator in one era.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraNominator {
    pub era_index: u32,
    pub validator_address: String,
    pub nominator_address: String,
    pub bonded: Decimal,
}

// =============================================================================
// Extrinsics & Events
// =============================================================================

/// Indexed extrinsic (transaction or inherent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extrinsic {
    /// Unique identifier: block_number-extrinsic_index.
    pub id: String,
    pub block_number: u64,
    /// Index within the block (0-based).
    pub index: u32,
    /// Pallet name (e.g., "Staking").
    pub section: String,
    /// Call name (e.g., "payout_stakers").
    pub method: String,
    /// Call arguments as JSON.
    pub args: serde_json::Value,
    pub is_signed: bool,
    /// Signer address, empty for unsigned extrinsics.
    pub signer: String,
    pub nonce: u64,
    /// Tip in the smallest unit.
    pub tip: u128,
    pub block_date: DateTime<Utc>,
}

impl Extrinsic {
    pub fn make_id(block_number: u64, index: u32) -> String {
        format!("{}-{}", block_number, index)
    }
}

/// Indexed event emitted during block execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier: block_number-event_index.
    pub id: String,
    pub block_number: u64,
    /// Index within the block (0-based).
    pub index: u32,
    /// Pallet name (e.g., "Staking").
    pub section: String,
    /// Event variant name (e.g., "Rewarded").
    pub method: String,
    /// Event data as JSON.
    pub data: serde_json::Value,
    /// Extrinsic index that triggered this event (None for system events).
    pub apply_extrinsic: Option<u32>,
    /// Human-readable phase (`ApplyExtrinsic(3)`, `Finalization`, ...).
    pub phase: String,
    pub topics: Vec<String>,
    pub block_date: DateTime<Utc>,
}

impl Event {
    pub fn make_id(block_number: u64, index: u32) -> String {
        format!("{}-{}", block_number, index)
    }
}

// =============================================================================
// Payouts
// =============================================================================

/// Era a payout is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EraAttribution {
    Era(u32),
    /// The extrinsic paid for several eras at once; no single era is picked.
    Unattributed,
}

impl EraAttribution {
    pub fn era(&self) -> Option<u32> {
        match self {
            Self::Era(index) => Some(*index),
            Self::Unattributed => None,
        }
    }
}

impl From<Option<u32>> for EraAttribution {
    fn from(value: Option<u32>) -> Self {
        value.map_or(Self::Unattributed, Self::Era)
    }
}

/// One reward payment recorded by a reward event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraPayout {
    /// Id of the reward event this payout was read from.
    pub event_id: String,
    /// Id of the payout extrinsic.
    pub extrinsic_id: String,
    pub block_number: u64,
    pub block_date: DateTime<Utc>,
    /// Reward recipient.
    pub account_address: String,
    pub payout: Decimal,
    /// Validator whose payout call triggered the reward. `None` when one
    /// batch paid out several validators.
    pub paid_by: Option<String>,
    pub paid_for_era: EraAttribution,
    /// Era in which the payout transaction executed.
    pub made_in_era: u32,
}

// =============================================================================
// Indexer State
// =============================================================================

/// Per-chain record holding the resumption checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub name: String,
    pub last_grabbed_block: Option<u64>,
}

// =============================================================================
// Tests
// =============================================================================
