//! Session ingestor - records the first block of every session.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::error::{ChainError, IndexerError, IndexerResult};
use crate::models::Session;
use crate::ports::{ChainSource, Repositories};

use super::traversal::{EntityKind, Frontier, Grabber, ItemOutcome};

/// Detects session-index changes between consecutive blocks.
pub struct SessionIngestor<C: ChainSource, R: Repositories> {
    chain: Arc<C>,
    repositories: Arc<R>,
}

impl<C: ChainSource, R: Repositories> SessionIngestor<C, R> {
    pub fn new(chain: Arc<C>, repositories: Arc<R>) -> Self {
        Self {
            chain,
            repositories,
        }
    }

    async fn session_at(&self, height: u64) -> IndexerResult<u32> {
        let hash = self
            .chain
            .block_hash(height)
            .await?
            .ok_or(ChainError::BlockNotFound(height))?;
        Ok(self.chain.session_index(&hash).await?)
    }

    async fn create(&self, index: u32, start_block_number: u64) -> IndexerResult<bool> {
        let created = self
            .repositories
            .sessions()
            .insert_session_if_absent(&Session {
                index,
                start_block_number,
            })
            .await?;
        if created {
            info!(session = index, start = start_block_number, "🆕 Session created");
        }
        Ok(created)
    }

    /// Create the session starting at `height`, if a session starts there.
    #[instrument(skip(self))]
    pub async fn ingest(&self, height: u64) -> IndexerResult<ItemOutcome> {
        let index = self.session_at(height).await?;
        if height > 0 && self.session_at(height - 1).await? == index {
            return Ok(ItemOutcome::Unchanged);
        }

        match self.create(index, height).await? {
            true => Ok(ItemOutcome::Ingested),
            false => Ok(ItemOutcome::Unchanged),
        }
    }

    /// Walk from the chain tip down to the start of the latest saved session,
    /// creating every session whose first block is crossed on the way.
    ///
    /// Returns the number of sessions created.
    #[instrument(skip_all)]
    pub async fn catch_up(&self, shutdown_rx: &watch::Receiver<bool>) -> IndexerResult<u64> {
        let tip = self.chain.best_number().await?;
        let stop = self
            .repositories
            .sessions()
            .latest_session()
            .await?
            .map_or(0, |s| s.start_block_number);

        info!(from = tip, to = stop, "🧭 Catching up sessions");

        let mut created = 0;
        let mut previous: Option<(u64, u32)> = None;
        let mut height = tip;

        while height >= stop {
            if *shutdown_rx.borrow() {
                return Err(IndexerError::ShutdownRequested);
            }

            let index = self.session_at(height).await?;
            if let Some((above, above_index)) = previous
                && above_index != index
                && self.create(above_index, above).await?
            {
                created += 1;
            }
            previous = Some((height, index));

            if height == 0 {
                break;
            }
            height -= 1;
        }

        // Genesis starts the first session.
        if let Some((0, index)) = previous
            && self.create(index, 0).await?
        {
            created += 1;
        }

        debug!(created, "Session catch-up finished");
        Ok(created)
    }
}

#[async_trait]
impl<C: ChainSource, R: Repositories> Grabber for SessionIngestor<C, R> {
    fn kind(&self) -> EntityKind {
        EntityKind::Session
    }

    async fn frontier(&self) -> IndexerResult<Frontier> {
        let sessions = self.repositories.sessions();
        Ok(Frontier {
            lowest_saved: sessions.earliest_session().await?.map(|s| s.start_block_number),
            highest_saved: sessions.latest_session().await?.map(|s| s.start_block_number),
            checkpoint: None,
            tip: self.chain.best_number().await?,
        })
    }

    /// A height is covered once the session the chain reports for it is saved.
    async fn exists(&self, index: u64) -> IndexerResult<bool> {
        let session = self.session_at(index).await?;
        Ok(self
            .repositories
            .sessions()
            .get_session(session)
            .await?
            .is_some())
    }

    async fn grab(&self, index: u64) -> IndexerResult<ItemOutcome> {
        self.ingest(index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chain;
    use crate::services::traversal::{Direction, Traversal, TraversalConfig, TraversalContext};
    use crate::test_utils::{InMemoryRepositories, MockBlock, MockChain};

    /// Sessions 0 at [0,2], 1 at [3,5], 2 at [6,7].
    fn chain() -> Arc<MockChain> {
        let mut chain = MockChain::new();
        for (height, session) in [(0, 0), (1, 0), (2, 0), (3, 1), (4, 1), (5, 1), (6, 2), (7, 2)] {
            chain = chain.with_block(height, MockBlock::new(1_700_000_000_000 + height * 6_000, session));
        }
        Arc::new(chain)
    }

    #[tokio::test]
    async fn test_catch_up_records_session_boundaries() {
        let repos = Arc::new(InMemoryRepositories::new());
        let ingestor = SessionIngestor::new(chain(), repos.clone());
        let (_tx, rx) = watch::channel(false);

        assert_eq!(ingestor.catch_up(&rx).await.unwrap(), 3);

        let sessions = repos.sessions();
        assert_eq!(sessions.get_session(0).await.unwrap().unwrap().start_block_number, 0);
        assert_eq!(sessions.get_session(1).await.unwrap().unwrap().start_block_number, 3);
        assert_eq!(sessions.get_session(2).await.unwrap().unwrap().start_block_number, 6);
    }

    #[tokio::test]
    async fn test_catch_up_stops_at_latest_saved_session() {
        let repos = Arc::new(InMemoryRepositories::new());
        repos
            .sessions()
            .insert_session_if_absent(&Session {
                index: 1,
                start_block_number: 3,
            })
            .await
            .unwrap();
        let ingestor = SessionIngestor::new(chain(), repos.clone());
        let (_tx, rx) = watch::channel(false);

        assert_eq!(ingestor.catch_up(&rx).await.unwrap(), 1);
        assert!(repos.sessions().get_session(0).await.unwrap().is_none());
        assert_eq!(
            repos.sessions().latest_session().await.unwrap().unwrap().index,
            2
        );
    }

    #[tokio::test]
    async fn test_ingest_only_creates_at_boundaries() {
        let repos = Arc::new(InMemoryRepositories::new());
        let ingestor = SessionIngestor::new(chain(), repos.clone());

        assert_eq!(ingestor.ingest(4).await.unwrap(), ItemOutcome::Unchanged);
        assert_eq!(ingestor.ingest(3).await.unwrap(), ItemOutcome::Ingested);
        assert_eq!(ingestor.ingest(3).await.unwrap(), ItemOutcome::Unchanged);
        assert_eq!(ingestor.ingest(0).await.unwrap(), ItemOutcome::Ingested);
        assert_eq!(
            repos.sessions().session_at_block(5).await.unwrap().unwrap().index,
            1
        );
    }

    #[tokio::test]
    async fn test_gaps_create_sessions_missing_between_saved_ones() {
        let repos = Arc::new(InMemoryRepositories::new());
        repos
            .seed_chain(Chain {
                name: "Polkadot".into(),
                last_grabbed_block: None,
            })
            .await;
        for (index, start) in [(0, 0), (2, 6)] {
            repos
                .sessions()
                .insert_session_if_absent(&Session {
                    index,
                    start_block_number: start,
                })
                .await
                .unwrap();
        }
        let ingestor = SessionIngestor::new(chain(), repos.clone());
        let traversal = Traversal::new(
            TraversalConfig {
                chain_name: "Polkadot".into(),
                ..Default::default()
            },
            repos.clone(),
        );
        let mut ctx = TraversalContext::new(EntityKind::Session, Direction::Gaps);
        let (_tx, rx) = watch::channel(false);

        assert!(!ingestor.exists(4).await.unwrap());
        assert!(ingestor.exists(7).await.unwrap());

        traversal.run(&ingestor, &mut ctx, rx).await.unwrap();

        let session = repos.sessions().get_session(1).await.unwrap().unwrap();
        assert_eq!(session.start_block_number, 3);
        assert_eq!(ctx.processed, 1);
        assert!(ctx.is_clean());
    }
}
