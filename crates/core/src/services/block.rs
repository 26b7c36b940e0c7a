//! Block ingestor - mirrors one block with its events and extrinsics.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, trace};

use crate::error::{ChainError, DomainError, IndexerResult};
use crate::models::{Block, Event, Extrinsic, Session};
use crate::ports::{ChainSource, RawEvent, RawExtrinsic, Repositories};

use super::traversal::{EntityKind, Frontier, Grabber, ItemOutcome};

/// Ingests blocks by height.
///
/// The Block and Session rows are created once and left untouched on
/// re-ingestion. Events and extrinsics are always replaced so they reflect
/// the latest decode.
pub struct BlockIngestor<C: ChainSource, R: Repositories> {
    chain: Arc<C>,
    repositories: Arc<R>,
    chain_name: String,
}

impl<C: ChainSource, R: Repositories> BlockIngestor<C, R> {
    pub fn new(chain: Arc<C>, repositories: Arc<R>, chain_name: impl Into<String>) -> Self {
        Self {
            chain,
            repositories,
            chain_name: chain_name.into(),
        }
    }

    /// Ingest the block at `height`.
    #[instrument(skip(self))]
    pub async fn ingest(&self, height: u64) -> IndexerResult<ItemOutcome> {
        let hash = self
            .chain
            .block_hash(height)
            .await?
            .ok_or(ChainError::BlockNotFound(height))?;
        let session_index = self.chain.session_index(&hash).await?;
        let timestamp = self.chain.timestamp(&hash).await?;
        let raw_events = self.chain.events(&hash).await?;
        let raw_extrinsics = self.chain.extrinsics(&hash).await?;

        let block_date = block_date(timestamp)?;
        trace!(%hash, session = session_index, %block_date, "Fetched block");

        let block = Block {
            number: height,
            hash,
            start_date_time: block_date,
        };
        if self.repositories.blocks().insert_block_if_absent(&block).await? {
            debug!("Block row created");
        }

        let session = Session {
            index: session_index,
            start_block_number: height,
        };
        if self
            .repositories
            .sessions()
            .insert_session_if_absent(&session)
            .await?
        {
            info!(session = session_index, "🆕 Session created");
        }

        let events = transform_events(height, block_date, raw_events);
        let extrinsics = transform_extrinsics(height, block_date, raw_extrinsics);
        self.repositories
            .replace_block_activity(height, &events, &extrinsics)
            .await?;

        info!(
            block = height,
            events = events.len(),
            extrinsics = extrinsics.len(),
            "⛓️  Block indexed"
        );
        Ok(ItemOutcome::Ingested)
    }
}

#[async_trait]
impl<C: ChainSource, R: Repositories> Grabber for BlockIngestor<C, R> {
    fn kind(&self) -> EntityKind {
        EntityKind::Block
    }

    async fn frontier(&self) -> IndexerResult<Frontier> {
        let blocks = self.repositories.blocks();
        let checkpoint = self
            .repositories
            .chains()
            .get_chain(&self.chain_name)
            .await?
            .and_then(|c| c.last_grabbed_block);

        Ok(Frontier {
            lowest_saved: blocks.lowest_block_number().await?,
            highest_saved: blocks.highest_block_number().await?,
            checkpoint,
            tip: self.chain.best_number().await?,
        })
    }

    async fn exists(&self, index: u64) -> IndexerResult<bool> {
        Ok(self.repositories.blocks().get_block(index).await?.is_some())
    }

    async fn grab(&self, index: u64) -> IndexerResult<ItemOutcome> {
        self.ingest(index).await
    }

    async fn on_gap_filled(&self, index: u64) -> IndexerResult<()> {
        self.repositories
            .chains()
            .set_last_grabbed_block(&self.chain_name, Some(index))
            .await?;
        Ok(())
    }

    async fn clear_checkpoint(&self) -> IndexerResult<()> {
        self.repositories
            .chains()
            .set_last_grabbed_block(&self.chain_name, None)
            .await?;
        Ok(())
    }
}

fn block_date(timestamp_ms: u64) -> IndexerResult<DateTime<Utc>> {
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| {
            DomainError::DecodingError(format!("timestamp {timestamp_ms} out of range")).into()
        })
}

/// Transform raw events to domain models.
fn transform_events(block_number: u64, block_date: DateTime<Utc>, raw: Vec<RawEvent>) -> Vec<Event> {
    raw.into_iter()
        .map(|evt| Event {
            id: Event::make_id(block_number, evt.index),
            block_number,
            index: evt.index,
            section: evt.pallet,
            method: evt.name,
            data: evt.data,
            apply_extrinsic: evt.extrinsic_index,
            phase: evt.phase,
            topics: evt
                .topics
                .iter()
                .map(|t| format!("0x{}", hex::encode(t)))
                .collect(),
            block_date,
        })
        .collect()
}

/// Transform raw extrinsics to domain models.
fn transform_extrinsics(
    block_number: u64,
    block_date: DateTime<Utc>,
    raw: Vec<RawExtrinsic>,
) -> Vec<Extrinsic> {
    raw.into_iter()
        .map(|ext| Extrinsic {
            id: Extrinsic::make_id(block_number, ext.index),
            block_number,
            index: ext.index,
            section: ext.pallet,
            method: ext.call,
            args: ext.args,
            is_signed: ext.signer.is_some(),
            signer: ext.signer.unwrap_or_default(),
            nonce: ext.nonce,
            tip: ext.tip,
            block_date,
        })
        .collect()
}
