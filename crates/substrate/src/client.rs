//! Substrate RPC client with dynamic metadata decoding.

use std::sync::Arc;

use async_trait::async_trait;
use subxt::backend::legacy::{LegacyBackend, LegacyRpcMethods};
use subxt::backend::rpc::RpcClient;
use subxt::blocks::Block;
use subxt::dynamic::{self, Value};
use subxt::storage::StorageKey;
use subxt::utils::H256;
use subxt::{OnlineClient, PolkadotConfig};
use tracing::{debug, instrument, trace, warn};

use stakewatch_core::error::{ChainError, ChainResult};
use stakewatch_core::metrics::record_decode_error;
use stakewatch_core::models::BlockHash;
use stakewatch_core::ports::{
    ChainSource, EraRewardPoints, Exposure, RawEvent, RawExtrinsic, ValidatorPrefs,
};

use crate::convert::{composite_to_json, value_to_json};
use crate::staking;

/// Configuration for the Substrate client.
#[derive(Debug, Clone)]
pub struct SubstrateClientConfig {
    /// WebSocket URL (e.g., "ws://localhost:9944").
    pub ws_url: String,
}

pub type SubstrateBlock = Block<PolkadotConfig, OnlineClient<PolkadotConfig>>;

impl Default for SubstrateClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:9944".to_string(),
        }
    }
}

/// Substrate client adapter implementing the ChainSource port.
///
/// Uses the legacy RPC backend: historical blocks and storage are read at
/// arbitrary hashes, which the chainHead backend only allows for pinned
/// recent blocks.
pub struct SubstrateClient {
    client: OnlineClient<PolkadotConfig>,
    rpc: LegacyRpcMethods<PolkadotConfig>,
}

impl SubstrateClient {
    /// Connect to a Substrate node.
    #[instrument(skip_all, fields(url = %config.ws_url))]
    pub async fn connect(config: SubstrateClientConfig) -> ChainResult<Self> {
        debug!("Connecting to node");

        let rpc_client = RpcClient::from_url(&config.ws_url)
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        let backend = LegacyBackend::<PolkadotConfig>::builder().build(rpc_client.clone());
        let client = OnlineClient::<PolkadotConfig>::from_backend(Arc::new(backend))
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        let rpc = LegacyRpcMethods::<PolkadotConfig>::new(rpc_client);

        debug!(
            spec_version = client.runtime_version().spec_version,
            "Connected successfully"
        );

        Ok(Self { client, rpc })
    }

    async fn block(&self, hash: &BlockHash) -> ChainResult<SubstrateBlock> {
        self.client
            .blocks()
            .at(H256(hash.0))
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))
    }

    /// Fetch a storage entry as JSON, at `at` or at the latest finalized block.
    async fn fetch<K: StorageKey>(
        &self,
        at: Option<&BlockHash>,
        pallet: &str,
        entry: &str,
        keys: K,
    ) -> ChainResult<Option<serde_json::Value>> {
        let address = dynamic::storage(pallet, entry, keys);
        let storage = match at {
            Some(hash) => self.client.storage().at(H256(hash.0)),
            None => self
                .client
                .storage()
                .at_latest()
                .await
                .map_err(|e| ChainError::RpcError(e.to_string()))?,
        };

        let Some(thunk) = storage
            .fetch(&address)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?
        else {
            return Ok(None);
        };

        let value = thunk.to_value().map_err(|e| {
            record_decode_error("storage", pallet);
            ChainError::UnexpectedValue {
                entry: format!("{pallet}.{entry}"),
                message: e.to_string(),
            }
        })?;
        Ok(Some(value_to_json(&value)))
    }

    /// Like [`Self::fetch`], failing when the entry is empty.
    async fn fetch_required<K: StorageKey>(
        &self,
        at: Option<&BlockHash>,
        pallet: &str,
        entry: &str,
        keys: K,
    ) -> ChainResult<serde_json::Value> {
        self.fetch(at, pallet, entry, keys)
            .await?
            .ok_or_else(|| ChainError::MissingValue(format!("{pallet}.{entry}")))
    }

    /// Exposure from the paged staking storage used by newer runtimes.
    async fn paged_exposure(&self, era: u32, validator: &[u8]) -> ChainResult<Exposure> {
        let keys = || vec![Value::u128(era.into()), Value::from_bytes(validator)];

        let Some(overview) = self
            .fetch(None, "Staking", "ErasStakersOverview", keys())
            .await?
        else {
            return Ok(Exposure::default());
        };
        let overview = staking::exposure_overview(&overview)?;

        let mut others = Vec::new();
        for page in 0..overview.page_count {
            let mut page_keys = keys();
            page_keys.push(Value::u128(page.into()));
            if let Some(page) = self
                .fetch(None, "Staking", "ErasStakersPaged", page_keys)
                .await?
            {
                others.extend(staking::exposure_page(&page)?);
            }
        }

        Ok(Exposure {
            total: overview.total,
            own: overview.own,
            others,
        })
    }
}

#[async_trait]
impl ChainSource for SubstrateClient {
    async fn block_hash(&self, height: u64) -> ChainResult<Option<BlockHash>> {
        let hash = self
            .rpc
            .chain_get_block_hash(Some(height.into()))
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;
        Ok(hash.map(|h| BlockHash(h.0)))
    }

    async fn best_number(&self) -> ChainResult<u64> {
        let head = self
            .client
            .blocks()
            .at_latest()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;
        Ok(head.number() as u64)
    }

    async fn extrinsics(&self, hash: &BlockHash) -> ChainResult<Vec<RawExtrinsic>> {
        decode_extrinsics(&self.block(hash).await?).await
    }

    async fn events(&self, hash: &BlockHash) -> ChainResult<Vec<RawEvent>> {
        decode_events(&self.block(hash).await?).await
    }

    async fn session_index(&self, hash: &BlockHash) -> ChainResult<u32> {
        let value = self
            .fetch(Some(hash), "Session", "CurrentIndex", ())
            .await?
            .unwrap_or_default();
        // An unset value query decodes to the type default.
        Ok(staking::json_u32(&value).unwrap_or(0))
    }

    async fn timestamp(&self, hash: &BlockHash) -> ChainResult<u64> {
        if let Some(now) = self.fetch(Some(hash), "Timestamp", "Now", ()).await?
            && let Some(ms) = staking::json_u128(&now).and_then(|v| u64::try_from(v).ok())
            && ms > 0
        {
            return Ok(ms);
        }

        // Genesis and some archive setups have no Timestamp.Now yet.
        get_block_timestamp(&self.block(hash).await?)
            .await?
            .ok_or_else(|| ChainError::MissingValue("Timestamp.Now".to_string()))
    }

    async fn current_era(&self) -> ChainResult<u32> {
        let value = self
            .fetch_required(None, "Staking", "CurrentEra", ())
            .await?;
        staking::json_u32(&value).ok_or_else(|| ChainError::UnexpectedValue {
            entry: "Staking.CurrentEra".to_string(),
            message: value.to_string(),
        })
    }

    async fn history_depth(&self) -> ChainResult<u32> {
        // A constant on current runtimes, a storage value on older ones.
        let constant = dynamic::constant("Staking", "HistoryDepth");
        if let Ok(thunk) = self.client.constants().at(&constant)
            && let Ok(value) = thunk.to_value()
            && let Some(depth) = staking::json_u32(&value_to_json(&value))
        {
            return Ok(depth);
        }

        let value = self
            .fetch_required(None, "Staking", "HistoryDepth", ())
            .await?;
        staking::json_u32(&value).ok_or_else(|| ChainError::UnexpectedValue {
            entry: "Staking.HistoryDepth".to_string(),
            message: value.to_string(),
        })
    }

    async fn era_start_session_index(&self, era: u32) -> ChainResult<Option<u32>> {
        let value = self
            .fetch(
                None,
                "Staking",
                "ErasStartSessionIndex",
                vec![Value::u128(era.into())],
            )
            .await?;
        Ok(value.as_ref().and_then(staking::json_u32))
    }

    async fn era_reward_points(&self, era: u32) -> ChainResult<EraRewardPoints> {
        match self
            .fetch(None, "Staking", "ErasRewardPoints", vec![Value::u128(era.into())])
            .await?
        {
            Some(value) => staking::reward_points(&value),
            None => Ok(EraRewardPoints::default()),
        }
    }

    async fn era_total_stake(&self, era: u32) -> ChainResult<u128> {
        let value = self
            .fetch(None, "Staking", "ErasTotalStake", vec![Value::u128(era.into())])
            .await?;
        Ok(value.as_ref().and_then(staking::json_u128).unwrap_or(0))
    }

    async fn era_validator_reward(&self, era: u32) -> ChainResult<Option<u128>> {
        let value = self
            .fetch(
                None,
                "Staking",
                "ErasValidatorReward",
                vec![Value::u128(era.into())],
            )
            .await?;
        Ok(value.as_ref().and_then(staking::json_u128))
    }

    async fn era_validator_prefs(&self, era: u32, validator: &str) -> ChainResult<ValidatorPrefs> {
        let keys = vec![
            Value::u128(era.into()),
            Value::from_bytes(staking::account_key(validator)?),
        ];
        match self
            .fetch(None, "Staking", "ErasValidatorPrefs", keys)
            .await?
        {
            Some(value) => staking::validator_prefs(&value),
            None => Ok(ValidatorPrefs::default()),
        }
    }

    async fn era_stakers(&self, era: u32, validator: &str) -> ChainResult<Exposure> {
        let account = staking::account_key(validator)?;
        let keys = vec![Value::u128(era.into()), Value::from_bytes(&account)];

        // Older runtimes keep a single exposure per validator.
        match self.fetch(None, "Staking", "ErasStakers", keys).await {
            Ok(Some(value)) => {
                let exposure = staking::exposure(&value)?;
                if exposure.total > 0 {
                    return Ok(exposure);
                }
            }
            Ok(None) => {}
            Err(e) => trace!(error = %e, "ErasStakers unavailable, reading paged exposure"),
        }

        self.paged_exposure(era, &account).await
    }

    async fn session_validators(&self) -> ChainResult<Vec<String>> {
        let value = self
            .fetch(None, "Session", "Validators", ())
            .await?
            .unwrap_or_default();
        staking::accounts(&value, "Session.Validators")
    }
}

// =============================================================================
// Block decoding helpers
// =============================================================================

/// Decode events from a block.
async fn decode_events(block: &SubstrateBlock) -> ChainResult<Vec<RawEvent>> {
    let events = block
        .events()
        .await
        .map_err(|e| ChainError::RpcError(e.to_string()))?;

    let mut raw_events = Vec::new();

    for (index, event) in events.iter().enumerate() {
        match event {
            Ok(ev) => {
                let pallet = ev.pallet_name().to_string();
                let name = ev.variant_name().to_string();

                let data = match ev.field_values() {
                    Ok(composite) => composite_to_json(&composite),
                    Err(e) => {
                        trace!(index, error = ?e, "Failed to decode event fields");
                        record_decode_error("event", &pallet);
                        serde_json::Value::Null
                    }
                };

                let phase = ev.phase();
                let extrinsic_index = match phase {
                    subxt::events::Phase::ApplyExtrinsic(idx) => Some(idx),
                    _ => None,
                };

                raw_events.push(RawEvent {
                    index: index as u32,
                    extrinsic_index,
                    phase: format!("{:?}", phase),
                    pallet,
                    name,
                    data,
                    topics: ev.topics().iter().map(|t| t.0).collect(),
                });
            }
            Err(e) => {
                trace!(index, error = ?e, "Failed to decode event");
                record_decode_error("event", "unknown");
            }
        }
    }

    Ok(raw_events)
}

/// Decode extrinsics from a block.
async fn decode_extrinsics(block: &SubstrateBlock) -> ChainResult<Vec<RawExtrinsic>> {
    let extrinsics = block
        .extrinsics()
        .await
        .map_err(|e| ChainError::RpcError(e.to_string()))?;

    let mut raw_extrinsics = Vec::new();

    for (index, ext) in extrinsics.iter().enumerate() {
        let pallet = ext
            .pallet_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "Unknown".to_string());
        let call = ext
            .variant_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let args = match ext.field_values() {
            Ok(composite) => composite_to_json(&composite),
            Err(e) => {
                trace!(index, error = ?e, "Failed to decode call arguments");
                record_decode_error("extrinsic", &pallet);
                serde_json::Value::Null
            }
        };

        let extensions = ext.signed_extensions();
        raw_extrinsics.push(RawExtrinsic {
            index: index as u32,
            pallet,
            call,
            signer: ext.address_bytes().map(signer_address),
            args,
            nonce: extensions.as_ref().and_then(|e| e.nonce()).unwrap_or(0),
            tip: extensions.as_ref().and_then(|e| e.tip()).unwrap_or(0),
        });
    }

    Ok(raw_extrinsics)
}

/// Hex signer address, without the `MultiAddress::Id` prefix byte.
fn signer_address(bytes: &[u8]) -> String {
    let account = match bytes {
        [0, rest @ ..] if rest.len() == 32 => rest,
        other => other,
    };
    format!("0x{}", hex::encode(account))
}

/// Get timestamp from Timestamp.set inherent.
async fn get_block_timestamp(block: &SubstrateBlock) -> ChainResult<Option<u64>> {
    let extrinsics = block
        .extrinsics()
        .await
        .map_err(|e| ChainError::RpcError(e.to_string()))?;

    for ext in extrinsics.iter() {
        let (Ok(pallet), Ok(call)) = (ext.pallet_name(), ext.variant_name()) else {
            continue;
        };

        if pallet == "Timestamp" && call == "set" {
            if let Ok(values) = ext.field_values() {
                let value_str = format!("{:?}", values);
                if let Some(ts) = parse_timestamp_from_debug(&value_str) {
                    return Ok(Some(ts));
                }

                warn!(
                    block = block.number(),
                    "Could not parse timestamp from Timestamp.set: {:?}", values
                );
            }

            let bytes = ext.bytes();
            if bytes.len() >= 5
                && let Some(ts) = try_decode_compact_u64(&bytes[2..])
            {
                return Ok(Some(ts));
            }
        }
    }

    Ok(None)
}

/// Try to decode a Compact<u64> from bytes.
fn try_decode_compact_u64(bytes: &[u8]) -> Option<u64> {
    let first = *bytes.first()?;

    match first & 0b11 {
        0b00 => Some((first >> 2) as u64),
        0b01 => {
            let value = u16::from_le_bytes([first, *bytes.get(1)?]) >> 2;
            Some(value as u64)
        }
        0b10 => {
            let word: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
            Some((u32::from_le_bytes(word) >> 2) as u64)
        }
        _ => {
            let num_bytes = ((first >> 2) + 4) as usize;
            if bytes.len() < 1 + num_bytes || num_bytes > 8 {
                return None;
            }
            let mut value_bytes = [0u8; 8];
            value_bytes[..num_bytes].copy_from_slice(&bytes[1..1 + num_bytes]);
            Some(u64::from_le_bytes(value_bytes))
        }
    }
}

/// Parse a millisecond timestamp out of a debug-formatted value.
fn parse_timestamp_from_debug(s: &str) -> Option<u64> {
    const MIN_TIMESTAMP_MS: u64 = 1_577_836_800_000;
    const MAX_TIMESTAMP_MS: u64 = 2_524_608_000_000;

    s.split(|c: char| !c.is_ascii_digit())
        .filter_map(|part| part.parse::<u64>().ok())
        .find(|num| (MIN_TIMESTAMP_MS..=MAX_TIMESTAMP_MS).contains(num))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_single_byte() {
        assert_eq!(try_decode_compact_u64(&[252]), Some(63));
        assert_eq!(try_decode_compact_u64(&[0]), Some(0));
        assert_eq!(try_decode_compact_u64(&[4]), Some(1));
        assert_eq!(try_decode_compact_u64(&[]), None);
    }

    #[test]
    fn test_compact_two_and_four_bytes() {
        assert_eq!(try_decode_compact_u64(&[0xFD, 0xFF]), Some(16383));
        let encoded = (1_000_000_000u32 << 2 | 0b10).to_le_bytes();
        assert_eq!(try_decode_compact_u64(&encoded), Some(1_000_000_000));
        assert_eq!(try_decode_compact_u64(&encoded[..3]), None);
    }

    #[test]
    fn test_compact_big_integer_timestamp() {
        let timestamp: u64 = 1_733_097_600_000;
        let mut bytes = vec![0b00001011];
        bytes.extend_from_slice(&timestamp.to_le_bytes()[..6]);
        assert_eq!(try_decode_compact_u64(&bytes), Some(timestamp));
    }

    #[test]
    fn test_timestamp_from_debug() {
        assert_eq!(
            parse_timestamp_from_debug("Compact(1733097600000)"),
            Some(1733097600000)
        );
        assert_eq!(
            parse_timestamp_from_debug("{now: 1700000000000}"),
            Some(1700000000000)
        );
        assert_eq!(parse_timestamp_from_debug("Compact(1500000000000)"), None);
        assert_eq!(parse_timestamp_from_debug("no timestamp here"), None);
    }

    #[test]
    fn test_signer_address_strips_multiaddress_prefix() {
        let mut id = vec![0u8];
        id.extend([0xab; 32]);
        assert_eq!(signer_address(&id), format!("0x{}", "ab".repeat(32)));
        assert_eq!(signer_address(&[0xcd; 20]), format!("0x{}", "cd".repeat(20)));
    }
}
