//! Ingestion services.
//!
//! Each ingestor implements [`traversal::Grabber`] for one entity kind and is
//! driven index by index by [`traversal::Traversal`].

pub mod block;
pub mod era;
pub mod payout;
pub mod session;
pub mod traversal;

pub use block::BlockIngestor;
pub use era::EraIngestor;
pub use payout::{PayoutReconciler, PayoutWindow};
pub use session::SessionIngestor;
pub use traversal::{
    Direction, EntityKind, Frontier, Grabber, ItemOutcome, Plan, Traversal, TraversalConfig,
    TraversalContext,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::BalanceConverter;
    use crate::models::{Chain, Era, EraAttribution, Event, Extrinsic, Session};
    use crate::ports::{PayoutScope, Repositories};
    use crate::test_utils::{InMemoryRepositories, MockBlock, MockChain};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    async fn seeded_store() -> Arc<InMemoryRepositories> {
        let repos = Arc::new(InMemoryRepositories::new());
        repos
            .seed_chain(Chain {
                name: "Polkadot".into(),
                last_grabbed_block: None,
            })
            .await;
        repos
    }

    fn following_traversal(repos: Arc<InMemoryRepositories>) -> Arc<Traversal<InMemoryRepositories>> {
        Arc::new(Traversal::new(
            TraversalConfig {
                chain_name: "Polkadot".into(),
                poll_interval: Duration::from_millis(5),
                ..Default::default()
            },
            repos,
        ))
    }

    const WAIT: Duration = Duration::from_secs(2);

    fn era(index: u32, start_session: u32) -> Era {
        Era {
            index,
            era_start_session_index: start_session,
            total_points: 0,
            total_stake: Decimal::ZERO,
            validators_rewards: Decimal::ZERO,
            validators_arr_length: 0,
        }
    }

    async fn save_session(repos: &InMemoryRepositories, index: u32, start_block_number: u64) {
        repos
            .sessions()
            .insert_session_if_absent(&Session {
                index,
                start_block_number,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_store_backfills_to_genesis() {
        let mut chain = MockChain::new();
        for height in 0..=3u64 {
            chain = chain.with_block(height, MockBlock::new(1_700_000_000_000 + height * 6_000, 0));
        }
        let chain = Arc::new(chain);
        let repos = Arc::new(InMemoryRepositories::new());
        repos
            .seed_chain(Chain {
                name: "Polkadot".into(),
                last_grabbed_block: None,
            })
            .await;
        let traversal = Traversal::new(
            TraversalConfig {
                chain_name: "Polkadot".into(),
                ..Default::default()
            },
            repos.clone(),
        );
        let (_tx, rx) = watch::channel(false);

        let blocks = BlockIngestor::new(chain, repos.clone(), "Polkadot");
        let mut ctx = TraversalContext::new(EntityKind::Block, Direction::FromLowestSavedToZero);
        traversal.run(&blocks, &mut ctx, rx.clone()).await.unwrap();

        assert_eq!(ctx.bounds, Some((3, 0)));
        assert_eq!(ctx.processed, 4);
        assert!(ctx.is_clean());
        for height in 0..=3 {
            assert!(repos.blocks().get_block(height).await.unwrap().is_some());
        }
        assert!(repos.sessions().get_session(0).await.unwrap().is_some());

        let payouts = PayoutReconciler::by_block(repos.clone(), BalanceConverter::default());
        let mut ctx = TraversalContext::new(EntityKind::Payout, Direction::FromLowestSavedToZero);
        traversal.run(&payouts, &mut ctx, rx).await.unwrap();

        assert_eq!(ctx.processed, 4);
        for height in 0..=3 {
            assert!(
                repos
                    .payouts()
                    .list_payouts(PayoutScope::Block(height))
                    .await
                    .unwrap()
                    .is_empty()
            );
        }
    }

    #[tokio::test]
    async fn test_follow_reverifies_trailing_blocks_then_picks_up_new_ones() {
        let mut chain = MockChain::new();
        for height in 0..=5u64 {
            chain = chain.with_block(height, MockBlock::new(1_700_000_000_000 + height * 6_000, 0));
        }
        let chain = Arc::new(chain);
        let repos = seeded_store().await;
        let blocks = Arc::new(BlockIngestor::new(chain.clone(), repos.clone(), "Polkadot"));
        for height in 0..=3 {
            blocks.ingest(height).await.unwrap();
        }
        let traversal = following_traversal(repos.clone());
        let (tx, rx) = watch::channel(false);

        let handle = {
            let traversal = traversal.clone();
            let blocks = blocks.clone();
            tokio::spawn(async move {
                let mut ctx =
                    TraversalContext::new(EntityKind::Block, Direction::FromHighestSavedUpToNew);
                let result = traversal.run(blocks.as_ref(), &mut ctx, rx).await;
                (result, ctx)
            })
        };

        tokio::time::timeout(WAIT, async {
            while repos.blocks().get_block(5).await.unwrap().is_none() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        chain
            .replace_block(6, MockBlock::new(1_700_000_036_000, 1))
            .await;
        tokio::time::timeout(WAIT, async {
            while repos.blocks().get_block(6).await.unwrap().is_none() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        tx.send(true).unwrap();

        let (result, ctx) = handle.await.unwrap();
        assert!(matches!(result, Err(crate::error::IndexerError::ShutdownRequested)));
        // Heights 2 and 3 are re-verified, 4 to 6 are new.
        assert_eq!(ctx.processed, 5);
        assert!(ctx.is_clean());
        let snapshot = repos.snapshot().await;
        assert_eq!(snapshot.blocks.len(), 7);
        assert_eq!(snapshot.sessions.len(), 2);
        assert_eq!(snapshot.sessions[&1].start_block_number, 6);
    }

    #[tokio::test]
    async fn test_backfill_writes_one_session_per_distinct_index() {
        let mut chain = MockChain::new();
        for (height, session) in [(0u64, 0), (1, 0), (2, 1), (3, 1), (4, 2), (5, 2)] {
            chain = chain.with_block(
                height,
                MockBlock::new(1_700_000_000_000 + height * 6_000, session),
            );
        }
        let repos = seeded_store().await;
        let traversal = following_traversal(repos.clone());
        let blocks = BlockIngestor::new(Arc::new(chain), repos.clone(), "Polkadot");
        let mut ctx = TraversalContext::new(EntityKind::Block, Direction::FromLowestSavedToZero);
        let (_tx, rx) = watch::channel(false);

        traversal.run(&blocks, &mut ctx, rx).await.unwrap();

        let snapshot = repos.snapshot().await;
        assert_eq!(snapshot.blocks.len(), 6);
        assert_eq!(snapshot.sessions.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_by_era_follow_reconciles_era_once_next_era_is_saved() {
        let repos = seeded_store().await;
        save_session(&repos, 50, 700).await;
        save_session(&repos, 55, 1_000).await;
        repos.eras().upsert_era(&era(10, 50)).await.unwrap();
        repos.eras().upsert_era(&era(11, 55)).await.unwrap();

        let block_date = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        repos
            .replace_block_activity(
                1_100,
                &[Event {
                    id: Event::make_id(1_100, 4),
                    block_number: 1_100,
                    index: 4,
                    section: "Staking".into(),
                    method: "Rewarded".into(),
                    data: json!({"stash": "0xN1", "amount": "3000000000000"}),
                    apply_extrinsic: Some(2),
                    phase: "ApplyExtrinsic(2)".into(),
                    topics: vec![],
                    block_date,
                }],
                &[Extrinsic {
                    id: Extrinsic::make_id(1_100, 2),
                    block_number: 1_100,
                    index: 2,
                    section: "Staking".into(),
                    method: "payout_stakers".into(),
                    args: json!({"validator_stash": "0xV", "era": "10"}),
                    is_signed: true,
                    signer: "0xsigner".into(),
                    nonce: 0,
                    tip: 0,
                    block_date,
                }],
            )
            .await
            .unwrap();

        let traversal = following_traversal(repos.clone());
        let reconciler = Arc::new(PayoutReconciler::by_era(
            repos.clone(),
            BalanceConverter::default(),
        ));
        let (tx, rx) = watch::channel(false);

        let handle = {
            let traversal = traversal.clone();
            let reconciler = reconciler.clone();
            tokio::spawn(async move {
                let mut ctx =
                    TraversalContext::new(EntityKind::EraPayout, Direction::FromHighestSavedUpToNew);
                let result = traversal.run(reconciler.as_ref(), &mut ctx, rx).await;
                (result, ctx)
            })
        };

        // Era 11 has no known end yet and is deferred.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(
            repos
                .payouts()
                .list_payouts(PayoutScope::MadeInEra(11))
                .await
                .unwrap()
                .is_empty()
        );

        save_session(&repos, 60, 1_300).await;
        repos.eras().upsert_era(&era(12, 60)).await.unwrap();
        tokio::time::timeout(WAIT, async {
            while repos
                .payouts()
                .list_payouts(PayoutScope::MadeInEra(11))
                .await
                .unwrap()
                .is_empty()
            {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        tx.send(true).unwrap();

        let (result, ctx) = handle.await.unwrap();
        assert!(matches!(result, Err(crate::error::IndexerError::ShutdownRequested)));
        let payouts = repos
            .payouts()
            .list_payouts(PayoutScope::MadeInEra(11))
            .await
            .unwrap();
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].event_id, "1100-4");
        assert_eq!(payouts[0].paid_for_era, EraAttribution::Era(10));
        assert_eq!(payouts[0].payout, Decimal::from(3));
        // Era 11 before its successor was saved, then era 12.
        assert_eq!(ctx.deferred, 2);
    }
}
