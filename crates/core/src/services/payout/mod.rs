//! Payout reconciler - turns stored payout extrinsics and reward events
//! into attributed [`EraPayout`] rows.
//!
//! Two windowing variants share one correlation:
//!
//! - by block: the payout extrinsics of one block
//! - by era: every payout extrinsic inside an era's block window
//!
//! Both read only from the store, so the Block ingestor must have run over
//! the window first.

mod correlate;

pub use correlate::{
    ValidatorEras, attribute_era, candidate_calls, group_payout_calls, is_batch_call,
    is_payout_call, is_reward_event, paid_by, parse_payout_args, parse_reward,
};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::balance::BalanceConverter;
use crate::error::{DomainError, IndexerResult};
use crate::metrics::{record_payout_attribution_anomaly, record_payouts_written};
use crate::models::{EraAttribution, EraPayout, Extrinsic};
use crate::ports::{ExtrinsicFilter, PayoutScope, Repositories};

use super::era::era_index;
use super::traversal::{EntityKind, Frontier, Grabber, ItemOutcome};

/// Window a reconciler traverses by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutWindow {
    ByBlock,
    ByEra,
}

/// Reconciles payouts from stored extrinsics and events.
pub struct PayoutReconciler<R: Repositories> {
    repositories: Arc<R>,
    converter: BalanceConverter,
    window: PayoutWindow,
}

impl<R: Repositories> PayoutReconciler<R> {
    pub fn new(repositories: Arc<R>, converter: BalanceConverter, window: PayoutWindow) -> Self {
        Self {
            repositories,
            converter,
            window,
        }
    }

    /// Reconciler traversing block heights.
    pub fn by_block(repositories: Arc<R>, converter: BalanceConverter) -> Self {
        Self::new(repositories, converter, PayoutWindow::ByBlock)
    }

    /// Reconciler traversing era indices.
    pub fn by_era(repositories: Arc<R>, converter: BalanceConverter) -> Self {
        Self::new(repositories, converter, PayoutWindow::ByEra)
    }

    /// Rebuild the payouts executed in one block.
    ///
    /// The era the block belongs to must be resolvable from saved sessions
    /// and eras, and an attributed paid-for era must be saved; otherwise the
    /// block is aborted and its existing payouts are left untouched.
    #[instrument(skip(self))]
    pub async fn reconcile_block(&self, block_number: u64) -> IndexerResult<ItemOutcome> {
        let extrinsics = self
            .repositories
            .extrinsics()
            .list_extrinsics(ExtrinsicFilter {
                block_number_gte: Some(block_number),
                block_number_lte: Some(block_number),
                calls: candidate_calls(),
            })
            .await?;

        let mut payouts = Vec::new();
        let mut made_in_era = None;

        for extrinsic in &extrinsics {
            let groups = group_payout_calls(extrinsic)?;
            if groups.is_empty() {
                continue;
            }

            let paid_for_era = attribute_era(&groups);
            if let EraAttribution::Era(era) = paid_for_era
                && self.repositories.eras().get_era(era).await?.is_none()
            {
                return Err(DomainError::AttributionFailed(format!(
                    "era {era} paid for by extrinsic {} is not saved",
                    extrinsic.id
                ))
                .into());
            }

            let made_in = match made_in_era {
                Some(era) => era,
                None => {
                    let era = self.era_of_block(block_number).await?;
                    made_in_era = Some(era);
                    era
                }
            };

            payouts.extend(
                self.payouts_for(extrinsic, &groups, paid_for_era, made_in)
                    .await?,
            );
        }

        self.repositories
            .replace_payouts(PayoutScope::Block(block_number), &payouts)
            .await?;
        record_payouts_written(payouts.len() as u64);

        if !payouts.is_empty() {
            info!(block = block_number, payouts = payouts.len(), "💰 Payouts indexed");
        }
        Ok(ItemOutcome::Ingested)
    }

    /// Rebuild the payouts executed during one era.
    ///
    /// The window runs from the first block of the era's start session to
    /// the block before the next era's start session. Missing eras or
    /// sessions defer the era.
    #[instrument(skip(self))]
    pub async fn reconcile_era(&self, era: u32) -> IndexerResult<ItemOutcome> {
        let Some((first, last)) = self.era_window(era).await? else {
            return Ok(ItemOutcome::Deferred {
                reason: format!("block window of era {era} is not known yet"),
            });
        };
        debug!(first, last, "Era window resolved");

        let extrinsics = self
            .repositories
            .extrinsics()
            .list_extrinsics(ExtrinsicFilter {
                block_number_gte: Some(first),
                block_number_lte: Some(last),
                calls: candidate_calls(),
            })
            .await?;

        let mut payouts = Vec::new();
        for extrinsic in &extrinsics {
            let groups = group_payout_calls(extrinsic)?;
            if groups.is_empty() {
                continue;
            }
            let paid_for_era = attribute_era(&groups);
            payouts.extend(
                self.payouts_for(extrinsic, &groups, paid_for_era, era)
                    .await?,
            );
        }

        self.repositories
            .replace_payouts(PayoutScope::MadeInEra(era), &payouts)
            .await?;
        record_payouts_written(payouts.len() as u64);

        info!(era, first, last, payouts = payouts.len(), "💰 Era payouts indexed");
        Ok(ItemOutcome::Ingested)
    }

    /// Block window `[first, last]` of an era, `None` while unknown.
    pub async fn era_window(&self, era: u32) -> IndexerResult<Option<(u64, u64)>> {
        let eras = self.repositories.eras();
        let sessions = self.repositories.sessions();

        let Some(this_era) = eras.get_era(era).await? else {
            return Ok(None);
        };
        let Some(next_index) = era.checked_add(1) else {
            return Ok(None);
        };
        let Some(next_era) = eras.get_era(next_index).await? else {
            return Ok(None);
        };
        let Some(start) = sessions.get_session(this_era.era_start_session_index).await? else {
            return Ok(None);
        };
        let Some(end) = sessions.get_session(next_era.era_start_session_index).await? else {
            return Ok(None);
        };

        if end.start_block_number <= start.start_block_number {
            warn!(
                era,
                start = start.start_block_number,
                next_start = end.start_block_number,
                "⚠️  Era window is empty"
            );
            return Ok(None);
        }
        Ok(Some((start.start_block_number, end.start_block_number - 1)))
    }

    /// Era whose start session is the latest one started at or before the block.
    async fn era_of_block(&self, block_number: u64) -> IndexerResult<u32> {
        let session = self
            .repositories
            .sessions()
            .session_at_block(block_number)
            .await?
            .ok_or_else(|| {
                DomainError::AttributionFailed(format!("no session saved for block {block_number}"))
            })?;

        let era = self
            .repositories
            .eras()
            .era_at_session(session.index)
            .await?
            .ok_or_else(|| {
                DomainError::AttributionFailed(format!(
                    "no era saved for session {}",
                    session.index
                ))
            })?;

        Ok(era.index)
    }

    /// One payout row per reward event emitted by the extrinsic.
    async fn payouts_for(
        &self,
        extrinsic: &Extrinsic,
        groups: &[ValidatorEras],
        paid_for_era: EraAttribution,
        made_in_era: u32,
    ) -> IndexerResult<Vec<EraPayout>> {
        let events = self
            .repositories
            .events()
            .list_events_for_extrinsic(extrinsic.block_number, extrinsic.index)
            .await?;
        let rewards: Vec<_> = events.iter().filter(|e| is_reward_event(e)).collect();

        if rewards.is_empty() {
            warn!(
                extrinsic = %extrinsic.id,
                "⚠️  Payout extrinsic emitted no reward events"
            );
            return Ok(Vec::new());
        }

        if let EraAttribution::Era(paid_for) = paid_for_era
            && made_in_era < paid_for
        {
            warn!(
                extrinsic = %extrinsic.id,
                paid_for,
                made_in = made_in_era,
                "⚠️  Payout executed before the era it pays for"
            );
            record_payout_attribution_anomaly();
        }

        let paid_by = paid_by(groups);
        let mut payouts = Vec::with_capacity(rewards.len());
        for event in rewards {
            let (account, raw) = parse_reward(event)?;
            payouts.push(EraPayout {
                event_id: event.id.clone(),
                extrinsic_id: extrinsic.id.clone(),
                block_number: event.block_number,
                block_date: event.block_date,
                account_address: account,
                payout: self.converter.to_decimal(raw)?,
                paid_by: paid_by.clone(),
                paid_for_era,
                made_in_era,
            });
        }

        debug!(
            extrinsic = %extrinsic.id,
            paid_for = ?paid_for_era.era(),
            rewards = payouts.len(),
            "Payout extrinsic correlated"
        );
        Ok(payouts)
    }
}

#[async_trait]
impl<R: Repositories> Grabber for PayoutReconciler<R> {
    fn kind(&self) -> EntityKind {
        match self.window {
            PayoutWindow::ByBlock => EntityKind::Payout,
            PayoutWindow::ByEra => EntityKind::EraPayout,
        }
    }

    async fn frontier(&self) -> IndexerResult<Frontier> {
        match self.window {
            PayoutWindow::ByBlock => {
                let payouts = self.repositories.payouts();
                Ok(Frontier {
                    lowest_saved: payouts.lowest_payout_block().await?,
                    highest_saved: payouts.highest_payout_block().await?,
                    checkpoint: None,
                    tip: self
                        .repositories
                        .blocks()
                        .highest_block_number()
                        .await?
                        .unwrap_or(0),
                })
            }
            PayoutWindow::ByEra => {
                let eras = self.repositories.eras();
                let highest = eras.highest_era_index().await?.map(u64::from);
                Ok(Frontier {
                    lowest_saved: eras.lowest_era_index().await?.map(u64::from),
                    highest_saved: highest,
                    checkpoint: None,
                    tip: highest.unwrap_or(0),
                })
            }
        }
    }

    async fn exists(&self, index: u64) -> IndexerResult<bool> {
        let scope = match self.window {
            PayoutWindow::ByBlock => PayoutScope::Block(index),
            PayoutWindow::ByEra => PayoutScope::MadeInEra(era_index(index)?),
        };
        Ok(!self.repositories.payouts().list_payouts(scope).await?.is_empty())
    }

    async fn grab(&self, index: u64) -> IndexerResult<ItemOutcome> {
        match self.window {
            PayoutWindow::ByBlock => self.reconcile_block(index).await,
            PayoutWindow::ByEra => self.reconcile_era(era_index(index)?).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorTier;
    use crate::models::{Era, Event, Session};
    use crate::test_utils::InMemoryRepositories;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::{Value, json};

    const UNIT: u128 = 1_000_000_000_000;

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

    fn extrinsic(block: u64, index: u32, section: &str, method: &str, args: Value) -> Extrinsic {
        Extrinsic {
            id: Extrinsic::make_id(block, index),
            block_number: block,
            index,
            section: section.into(),
            method: method.into(),
            args,
            is_signed: true,
            signer: "0xsigner".into(),
            nonce: 0,
            tip: 0,
            block_date: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn reward(block: u64, index: u32, extrinsic: u32, who: &str, amount: u128) -> Event {
        Event {
            id: Event::make_id(block, index),
            block_number: block,
            index,
            section: "Staking".into(),
            method: "Rewarded".into(),
            data: json!({"stash": who, "amount": amount.to_string()}),
            apply_extrinsic: Some(extrinsic),
            phase: format!("ApplyExtrinsic({extrinsic})"),
            topics: vec![],
            block_date: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn payout_call(validator: &str, era: u32) -> Value {
        json!({"Staking": {"payout_stakers": {"validator_stash": validator, "era": era.to_string()}}})
    }

    /// Eras 10 (session 50) and 11 (session 55); session 50 starts at 700,
    /// session 55 at 1000.
    async fn store() -> Arc<InMemoryRepositories> {
        let repos = Arc::new(InMemoryRepositories::new());
        for (index, start) in [(50, 700), (55, 1_000)] {
            repos
                .sessions()
                .insert_session_if_absent(&Session {
                    index,
                    start_block_number: start,
                })
                .await
                .unwrap();
        }
        repos.eras().upsert_era(&era(10, 50)).await.unwrap();
        repos.eras().upsert_era(&era(11, 55)).await.unwrap();
        repos
    }

    #[tokio::test]
    async fn test_era_window_spans_start_sessions() {
        let repos = store().await;
        let reconciler = PayoutReconciler::by_era(repos, BalanceConverter::default());

        assert_eq!(reconciler.era_window(10).await.unwrap(), Some((700, 999)));
        assert_eq!(reconciler.era_window(11).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_representable_era_is_deferred() {
        let repos = store().await;
        repos.eras().upsert_era(&era(u32::MAX, 55)).await.unwrap();
        let reconciler = PayoutReconciler::by_era(repos, BalanceConverter::default());

        assert_eq!(reconciler.era_window(u32::MAX).await.unwrap(), None);
        assert!(matches!(
            reconciler.reconcile_era(u32::MAX).await.unwrap(),
            ItemOutcome::Deferred { .. }
        ));
    }

    #[tokio::test]
    async fn test_by_block_attributes_single_validator_payout() {
        let repos = store().await;
        repos
            .replace_block_activity(
                1_200,
                &[
                    reward(1_200, 3, 1, "0xN1", 5 * UNIT),
                    reward(1_200, 4, 1, "0xN2", 2 * UNIT),
                    reward(1_200, 5, 2, "0xX", UNIT),
                ],
                &[
                    extrinsic(1_200, 1, "Staking", "payout_stakers", json!({"validator_stash": "0xV", "era": "10"})),
                    extrinsic(1_200, 2, "Balances", "transfer", json!({"dest": "0xX", "value": "1"})),
                ],
            )
            .await
            .unwrap();
        let reconciler = PayoutReconciler::by_block(repos.clone(), BalanceConverter::default());

        assert_eq!(reconciler.reconcile_block(1_200).await.unwrap(), ItemOutcome::Ingested);

        let payouts = repos.payouts().list_payouts(PayoutScope::Block(1_200)).await.unwrap();
        assert_eq!(payouts.len(), 2);
        assert_eq!(payouts[0].event_id, "1200-3");
        assert_eq!(payouts[0].extrinsic_id, "1200-1");
        assert_eq!(payouts[0].account_address, "0xN1");
        assert_eq!(payouts[0].payout, Decimal::from(5));
        assert_eq!(payouts[0].paid_by.as_deref(), Some("0xV"));
        assert_eq!(payouts[0].paid_for_era, EraAttribution::Era(10));
        assert_eq!(payouts[0].made_in_era, 11);
    }

    #[tokio::test]
    async fn test_by_block_rerun_leaves_store_unchanged() {
        let repos = store().await;
        repos
            .replace_block_activity(
                1_200,
                &[reward(1_200, 3, 1, "0xN1", 5 * UNIT), reward(1_200, 4, 1, "0xN2", 2 * UNIT)],
                &[extrinsic(1_200, 1, "Staking", "payout_stakers", json!(["0xV", "10"]))],
            )
            .await
            .unwrap();
        let reconciler = PayoutReconciler::by_block(repos.clone(), BalanceConverter::default());

        reconciler.reconcile_block(1_200).await.unwrap();
        let first = repos.snapshot().await;
        assert_eq!(first.payouts.len(), 2);
        reconciler.reconcile_block(1_200).await.unwrap();
        assert_eq!(first, repos.snapshot().await);
    }

    #[tokio::test]
    async fn test_by_block_batch_over_two_eras_is_unattributed() {
        let repos = store().await;
        repos
            .replace_block_activity(
                1_300,
                &[reward(1_300, 0, 0, "0xN1", UNIT)],
                &[extrinsic(
                    1_300,
                    0,
                    "Utility",
                    "batch",
                    json!({"calls": [payout_call("0xV", 9), payout_call("0xV", 10)]}),
                )],
            )
            .await
            .unwrap();
        let reconciler = PayoutReconciler::by_block(repos.clone(), BalanceConverter::default());

        reconciler.reconcile_block(1_300).await.unwrap();

        let payouts = repos.payouts().list_payouts(PayoutScope::Block(1_300)).await.unwrap();
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].paid_for_era, EraAttribution::Unattributed);
        assert_eq!(payouts[0].paid_by.as_deref(), Some("0xV"));
    }

    #[tokio::test]
    async fn test_by_block_missing_paid_for_era_aborts_scope() {
        let repos = store().await;
        repos
            .replace_block_activity(
                1_200,
                &[reward(1_200, 0, 0, "0xN1", UNIT)],
                &[extrinsic(1_200, 0, "Staking", "payout_stakers", json!(["0xV", "4"]))],
            )
            .await
            .unwrap();
        let reconciler = PayoutReconciler::by_block(repos.clone(), BalanceConverter::default());

        let err = reconciler.reconcile_block(1_200).await.unwrap_err();
        assert_eq!(err.tier(), ErrorTier::FatalForScope);
        assert!(
            repos
                .payouts()
                .list_payouts(PayoutScope::Block(1_200))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_by_block_missing_session_aborts_scope() {
        let repos = store().await;
        repos
            .replace_block_activity(
                500,
                &[reward(500, 0, 0, "0xN1", UNIT)],
                &[extrinsic(500, 0, "Staking", "payout_stakers", json!(["0xV", "10"]))],
            )
            .await
            .unwrap();
        let reconciler = PayoutReconciler::by_block(repos, BalanceConverter::default());

        let err = reconciler.reconcile_block(500).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::IndexerError::Domain(DomainError::AttributionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_by_era_collects_window_and_is_idempotent() {
        let repos = store().await;
        for (block, era) in [(699, 8), (800, 9), (999, 9), (1_000, 10)] {
            repos
                .replace_block_activity(
                    block,
                    &[reward(block, 0, 0, "0xN1", UNIT)],
                    &[extrinsic(
                        block,
                        0,
                        "Utility",
                        "batch",
                        json!({"calls": [payout_call("0xA", era), payout_call("0xB", era)]}),
                    )],
                )
                .await
                .unwrap();
        }
        let reconciler = PayoutReconciler::by_era(repos.clone(), BalanceConverter::default());

        reconciler.reconcile_era(10).await.unwrap();
        let first = repos.snapshot().await;
        reconciler.reconcile_era(10).await.unwrap();
        assert_eq!(first, repos.snapshot().await);

        let payouts = repos.payouts().list_payouts(PayoutScope::MadeInEra(10)).await.unwrap();
        let blocks: Vec<u64> = payouts.iter().map(|p| p.block_number).collect();
        assert_eq!(blocks, vec![800, 999]);
        assert!(payouts.iter().all(|p| p.paid_for_era == EraAttribution::Era(9)));
        assert!(payouts.iter().all(|p| p.paid_by.is_none()));
        assert!(payouts.iter().all(|p| p.made_in_era == 10));
    }

    #[tokio::test]
    async fn test_by_era_defers_without_next_era() {
        let repos = store().await;
        let reconciler = PayoutReconciler::by_era(repos, BalanceConverter::default());

        assert!(matches!(
            reconciler.reconcile_era(11).await.unwrap(),
            ItemOutcome::Deferred { .. }
        ));
    }
}
