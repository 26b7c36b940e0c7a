//! Era ingestor - era aggregates and per-era stake snapshots.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::balance::BalanceConverter;
use crate::error::{DomainError, IndexerResult};
use crate::models::{Era, EraNominator, EraValidator};
use crate::ports::{ChainSource, Repositories};

use super::traversal::{EntityKind, Frontier, Grabber, ItemOutcome};

/// Ingests eras by index.
///
/// The Era row is upserted. Validator and nominator rows are a snapshot:
/// every ingestion replaces the whole set for the era.
pub struct EraIngestor<C: ChainSource, R: Repositories> {
    chain: Arc<C>,
    repositories: Arc<R>,
    converter: BalanceConverter,
}

impl<C: ChainSource, R: Repositories> EraIngestor<C, R> {
    pub fn new(chain: Arc<C>, repositories: Arc<R>, converter: BalanceConverter) -> Self {
        Self {
            chain,
            repositories,
            converter,
        }
    }

    /// Ingest the era with index `era`.
    ///
    /// Eras older than the chain's history depth are rejected. Eras whose
    /// start session is not saved yet are deferred.
    #[instrument(skip(self))]
    pub async fn ingest(&self, era: u32) -> IndexerResult<ItemOutcome> {
        let current = self.chain.current_era().await?;
        let depth = self.chain.history_depth().await?;
        if current.saturating_sub(era) >= depth {
            return Err(DomainError::HistoryDepthExceeded {
                era,
                current,
                depth,
            }
            .into());
        }

        let Some(start_session) = self.chain.era_start_session_index(era).await? else {
            return Ok(ItemOutcome::Deferred {
                reason: format!("era {era} has no start session on chain yet"),
            });
        };
        if self
            .repositories
            .sessions()
            .get_session(start_session)
            .await?
            .is_none()
        {
            return Ok(ItemOutcome::Deferred {
                reason: format!("session {start_session} for era {era} is not saved yet"),
            });
        }

        let points = self.chain.era_reward_points(era).await?;
        let total_stake = self.chain.era_total_stake(era).await?;
        let reward = self.chain.era_validator_reward(era).await?.unwrap_or(0);

        let aggregate = Era {
            index: era,
            era_start_session_index: start_session,
            total_points: points.total,
            total_stake: self.converter.to_decimal(total_stake)?,
            validators_rewards: self.converter.to_decimal(reward)?,
            validators_arr_length: points.individual.len() as u32,
        };

        // Individual points only exist once the era has finished.
        let provisional = points.individual.is_empty();
        let validators: Vec<(String, u32)> = if provisional {
            debug!("No individual points, using the current validator set");
            self.chain
                .session_validators()
                .await?
                .into_iter()
                .map(|v| (v, 0))
                .collect()
        } else {
            points.individual
        };

        let mut era_validators = Vec::with_capacity(validators.len());
        let mut era_nominators = Vec::new();
        for (address, points) in validators {
            let (validator, nominators) = self.snapshot_validator(era, address, points).await?;
            debug!(
                validator = %validator.validator_address,
                stakers = nominators.len(),
                "Validator snapshot read"
            );
            era_validators.push(validator);
            era_nominators.extend(nominators);
        }

        self.repositories.eras().upsert_era(&aggregate).await?;
        self.repositories
            .replace_era_snapshot(era, &era_validators, &era_nominators)
            .await?;

        info!(
            era,
            validators = era_validators.len(),
            nominators = era_nominators.len(),
            provisional,
            "🏛️  Era indexed"
        );
        if provisional {
            Ok(ItemOutcome::Provisional)
        } else {
            Ok(ItemOutcome::Ingested)
        }
    }

    async fn snapshot_validator(
        &self,
        era: u32,
        address: String,
        points: u32,
    ) -> IndexerResult<(EraValidator, Vec<EraNominator>)> {
        let prefs = self.chain.era_validator_prefs(era, &address).await?;
        let exposure = self.chain.era_stakers(era, &address).await?;

        if exposure.own > exposure.total {
            warn!(validator = %address, "⚠️  Own stake exceeds total stake");
        }

        let mut nominators: Vec<EraNominator> = Vec::with_capacity(exposure.others.len());
        for staker in &exposure.others {
            let bonded = self.converter.to_decimal(staker.value)?;
            // Paged exposures may list one nominator twice.
            match nominators
                .iter_mut()
                .find(|n| n.nominator_address == staker.who)
            {
                Some(existing) => existing.bonded += bonded,
                None => nominators.push(EraNominator {
                    era_index: era,
                    validator_address: address.clone(),
                    nominator_address: staker.who.clone(),
                    bonded,
                }),
            }
        }

        let validator = EraValidator {
            era_index: era,
            points,
            commission: BalanceConverter::perbill_to_percent(prefs.commission),
            blocked: prefs.blocked,
            total_stake: self.converter.to_decimal(exposure.total)?,
            own_stake: self.converter.to_decimal(exposure.own)?,
            others_stake: self
                .converter
                .to_decimal(exposure.total.saturating_sub(exposure.own))?,
            nominators_arr_length: exposure.others.len() as u32,
            validator_address: address,
        };

        Ok((validator, nominators))
    }
}

#[async_trait]
impl<C: ChainSource, R: Repositories> Grabber for EraIngestor<C, R> {
    fn kind(&self) -> EntityKind {
        EntityKind::Era
    }

    async fn frontier(&self) -> IndexerResult<Frontier> {
        let eras = self.repositories.eras();
        Ok(Frontier {
            lowest_saved: eras.lowest_era_index().await?.map(u64::from),
            highest_saved: eras.highest_era_index().await?.map(u64::from),
            checkpoint: None,
            tip: u64::from(self.chain.current_era().await?),
        })
    }

    async fn exists(&self, index: u64) -> IndexerResult<bool> {
        let era = era_index(index)?;
        Ok(self.repositories.eras().get_era(era).await?.is_some())
    }

    async fn grab(&self, index: u64) -> IndexerResult<ItemOutcome> {
        self.ingest(era_index(index)?).await
    }
}

/// Narrow a traversal index to an era index.
pub(crate) fn era_index(index: u64) -> IndexerResult<u32> {
    u32::try_from(index)
        .map_err(|_| DomainError::ValidationError(format!("era index {index} out of range")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorTier;
    use crate::models::Session;
    use crate::ports::{EraRewardPoints, Exposure, IndividualExposure, ValidatorPrefs};
    use crate::test_utils::{InMemoryRepositories, MockChain, MockEra};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const UNIT: u128 = 1_000_000_000_000;

    fn finished_era() -> MockEra {
        MockEra {
            start_session: Some(50),
            points: EraRewardPoints {
                total: 100,
                individual: vec![("0xv1".into(), 60), ("0xv2".into(), 40)],
            },
            total_stake: 3_000 * UNIT,
            validator_reward: Some(10 * UNIT),
            prefs: [
                (
                    "0xv1".to_string(),
                    ValidatorPrefs {
                        commission: 50_000_000,
                        blocked: false,
                    },
                ),
                (
                    "0xv2".to_string(),
                    ValidatorPrefs {
                        commission: 0,
                        blocked: true,
                    },
                ),
            ]
            .into(),
            stakers: [
                (
                    "0xv1".to_string(),
                    Exposure {
                        total: 2_000 * UNIT,
                        own: 500 * UNIT,
                        others: vec![
                            IndividualExposure {
                                who: "0xn1".into(),
                                value: 1_000 * UNIT,
                            },
                            IndividualExposure {
                                who: "0xn2".into(),
                                value: 500 * UNIT,
                            },
                        ],
                    },
                ),
                (
                    "0xv2".to_string(),
                    Exposure {
                        total: 1_000 * UNIT,
                        own: 1_000 * UNIT,
                        others: vec![],
                    },
                ),
            ]
            .into(),
        }
    }

    async fn repos_with_session(index: u32) -> Arc<InMemoryRepositories> {
        let repos = Arc::new(InMemoryRepositories::new());
        repos
            .sessions()
            .insert_session_if_absent(&Session {
                index,
                start_block_number: 1_000,
            })
            .await
            .unwrap();
        repos
    }

    fn chain(era: MockEra) -> Arc<MockChain> {
        Arc::new(
            MockChain::new()
                .with_current_era(12)
                .with_history_depth(84)
                .with_era(10, era)
                .with_session_validators(vec!["0xv1".into()]),
        )
    }

    #[tokio::test]
    async fn test_ingest_writes_aggregate_and_snapshot() {
        let repos = repos_with_session(50).await;
        let ingestor = EraIngestor::new(chain(finished_era()), repos.clone(), BalanceConverter::default());

        assert_eq!(ingestor.ingest(10).await.unwrap(), ItemOutcome::Ingested);

        let era = repos.eras().get_era(10).await.unwrap().unwrap();
        assert_eq!(era.era_start_session_index, 50);
        assert_eq!(era.total_points, 100);
        assert_eq!(era.total_stake, Decimal::from(3_000));
        assert_eq!(era.validators_rewards, Decimal::from(10));
        assert_eq!(era.validators_arr_length, 2);

        let validators = repos.eras().list_validators(10).await.unwrap();
        assert_eq!(validators.len(), 2);
        let v1 = validators.iter().find(|v| v.validator_address == "0xv1").unwrap();
        assert_eq!(v1.points, 60);
        assert_eq!(v1.commission, Decimal::from(5));
        assert_eq!(v1.others_stake, Decimal::from(1_500));
        assert_eq!(v1.nominators_arr_length, 2);
        let v2 = validators.iter().find(|v| v.validator_address == "0xv2").unwrap();
        assert!(v2.blocked);

        let nominators = repos.eras().list_nominators(10).await.unwrap();
        assert_eq!(nominators.len(), 2);
        assert!(nominators.iter().all(|n| n.validator_address == "0xv1"));
    }

    #[tokio::test]
    async fn test_active_era_falls_back_to_current_validators() {
        let repos = repos_with_session(50).await;
        let mut era = finished_era();
        era.points.individual.clear();
        era.validator_reward = None;
        let ingestor = EraIngestor::new(chain(era), repos.clone(), BalanceConverter::default());

        assert_eq!(ingestor.ingest(10).await.unwrap(), ItemOutcome::Provisional);

        let stored = repos.eras().get_era(10).await.unwrap().unwrap();
        assert_eq!(stored.validators_rewards, Decimal::ZERO);
        assert_eq!(stored.validators_arr_length, 0);
        let validators = repos.eras().list_validators(10).await.unwrap();
        assert_eq!(validators.len(), 1);
        assert_eq!(validators[0].validator_address, "0xv1");
        assert_eq!(validators[0].points, 0);
    }

    #[tokio::test]
    async fn test_missing_session_defers_the_era() {
        let repos = repos_with_session(49).await;
        let ingestor = EraIngestor::new(chain(finished_era()), repos.clone(), BalanceConverter::default());

        let outcome = ingestor.ingest(10).await.unwrap();
        assert!(matches!(outcome, ItemOutcome::Deferred { .. }));
        assert!(repos.eras().get_era(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_era_beyond_history_depth_is_fatal_for_scope() {
        let repos = repos_with_session(50).await;
        let chain = Arc::new(
            MockChain::new()
                .with_current_era(200)
                .with_history_depth(84)
                .with_era(10, finished_era()),
        );
        let ingestor = EraIngestor::new(chain, repos, BalanceConverter::default());

        let err = ingestor.ingest(10).await.unwrap_err();
        assert_eq!(err.tier(), ErrorTier::FatalForScope);
    }

    #[tokio::test]
    async fn test_reingest_replaces_snapshot() {
        let repos = repos_with_session(50).await;
        let chain = chain(finished_era());
        let ingestor = EraIngestor::new(chain.clone(), repos.clone(), BalanceConverter::default());
        ingestor.ingest(10).await.unwrap();
        let first = repos.snapshot().await;
        ingestor.ingest(10).await.unwrap();
        assert_eq!(first, repos.snapshot().await);

        // A nominator leaves v1.
        let mut era = finished_era();
        if let Some(exposure) = era.stakers.get_mut("0xv1") {
            exposure.others.truncate(1);
        }
        chain.replace_era(10, era).await;
        ingestor.ingest(10).await.unwrap();

        let nominators = repos.eras().list_nominators(10).await.unwrap();
        assert_eq!(nominators.len(), 1);
        assert_eq!(nominators[0].nominator_address, "0xn1");
        assert_eq!(nominators[0].bonded, Decimal::from_str("1000").unwrap());
    }
}
