//! Traversal controller - decides which heights or eras to ingest next.
//!
//! The controller is independent of what is ingested. Each entity kind
//! plugs in through the [`Grabber`] trait; the controller only computes an
//! ordered plan from a [`Direction`] and the persisted [`Frontier`], then
//! drives the grabber over it one index at a time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::balance::{BalanceConverter, DEFAULT_DENOMINATION};
use crate::error::{ErrorTier, IndexerError, IndexerResult};
use crate::metrics::{
    ProcessingTimer, record_item_deferred, record_item_failed, record_item_ingested,
};
use crate::ports::Repositories;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration shared by every traversal run.
#[derive(Debug, Clone)]
pub struct TraversalConfig {
    /// Name of the Chain record holding the checkpoint.
    pub chain_name: String,
    /// Number of trailing saved indices re-processed on resume.
    pub reverify_depth: u64,
    /// Sleep between tip polls while tail-following.
    pub poll_interval: Duration,
    /// Raw balance units per token.
    pub denomination: u128,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            chain_name: String::new(),
            reverify_depth: 1,
            poll_interval: Duration::from_secs(6),
            denomination: DEFAULT_DENOMINATION,
        }
    }
}

impl TraversalConfig {
    /// Balance converter for the configured denomination.
    pub fn converter(&self) -> IndexerResult<BalanceConverter> {
        Ok(BalanceConverter::new(self.denomination)?)
    }
}

// =============================================================================
// Directions & Plans
// =============================================================================

/// Entity kind driven by a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Block,
    Session,
    Era,
    /// Payout reconciliation per block.
    Payout,
    /// Payout reconciliation per era window.
    EraPayout,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Session => "session",
            Self::Era => "era",
            Self::Payout => "payout",
            Self::EraPayout => "era_payout",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traversal policy. Each variant carries only the inputs it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Exactly one index.
    Exact(u64),
    /// A caller-supplied list, in the given order.
    Array(Vec<u64>),
    /// `[higher, lower]`, descending.
    RangeHigherToLower { higher: u64, lower: u64 },
    /// Missing indices between the saved frontier bounds.
    Gaps,
    /// Up from the highest saved index, then follow the tip forever.
    FromHighestSavedUpToNew,
    /// Down from the tip to the highest saved index, once.
    FromActualToHighestSaved,
    /// Down from the lowest saved index to zero, once.
    FromLowestSavedToZero,
}

impl Direction {
    /// Build a direction from its CLI name and the numbers given with it.
    pub fn from_cli(name: &str, numbers: &[u64]) -> IndexerResult<Self> {
        let direction = match name {
            "exact" => match numbers {
                [n] => Self::Exact(*n),
                _ => return Err(config_error("exact requires exactly one number")),
            },
            "array" => {
                if numbers.is_empty() {
                    return Err(config_error("array requires at least one number"));
                }
                Self::Array(numbers.to_vec())
            }
            "range" => match numbers {
                [a, b] => Self::RangeHigherToLower {
                    higher: (*a).max(*b),
                    lower: (*a).min(*b),
                },
                _ => return Err(config_error("range requires two numbers")),
            },
            "gaps" => Self::Gaps,
            "from-highest-to-new" => Self::FromHighestSavedUpToNew,
            "from-actual-to-highest" => Self::FromActualToHighestSaved,
            "from-lowest-to-zero" => Self::FromLowestSavedToZero,
            other => return Err(config_error(&format!("unknown direction '{other}'"))),
        };

        if !direction.takes_numbers() && !numbers.is_empty() {
            return Err(config_error(&format!(
                "direction '{name}' does not take numbers"
            )));
        }

        Ok(direction)
    }

    fn takes_numbers(&self) -> bool {
        matches!(
            self,
            Self::Exact(_) | Self::Array(_) | Self::RangeHigherToLower { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Exact(_) => "exact",
            Self::Array(_) => "array",
            Self::RangeHigherToLower { .. } => "range",
            Self::Gaps => "gaps",
            Self::FromHighestSavedUpToNew => "from-highest-to-new",
            Self::FromActualToHighestSaved => "from-actual-to-highest",
            Self::FromLowestSavedToZero => "from-lowest-to-zero",
        }
    }
}

fn config_error(message: &str) -> IndexerError {
    IndexerError::ConfigError(message.to_string())
}

/// Persisted progress for one entity kind, plus the current tip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Frontier {
    pub lowest_saved: Option<u64>,
    pub highest_saved: Option<u64>,
    /// Last index recorded in the Chain checkpoint.
    pub checkpoint: Option<u64>,
    /// Highest index currently available (chain head, current era, ...).
    pub tip: u64,
}

/// Ordered work computed from a direction and a frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Explicit indices, in order.
    Indices(Vec<u64>),
    /// `from` down to `to`, inclusive. Empty when `from < to`.
    Descending {
        from: u64,
        to: u64,
        only_missing: bool,
    },
    /// Ascending from `from` to the tip, then keep polling for a new tip.
    Follow { from: u64 },
}

impl Plan {
    /// First and last index of a finite plan.
    pub fn bounds(&self) -> Option<(u64, u64)> {
        match self {
            Self::Indices(indices) => Some((*indices.first()?, *indices.last()?)),
            Self::Descending { from, to, .. } if from >= to => Some((*from, *to)),
            Self::Descending { .. } => None,
            Self::Follow { .. } => None,
        }
    }
}

/// Compute the plan for a direction against the persisted frontier.
pub fn plan(direction: &Direction, frontier: &Frontier, reverify_depth: u64) -> Plan {
    let resume_from = frontier
        .highest_saved
        .map_or(0, |h| h.saturating_sub(reverify_depth));

    match direction {
        Direction::Exact(index) => Plan::Indices(vec![*index]),
        Direction::Array(indices) => Plan::Indices(indices.clone()),
        Direction::RangeHigherToLower { higher, lower } => Plan::Descending {
            from: *higher,
            to: *lower,
            only_missing: false,
        },
        Direction::Gaps => match (frontier.lowest_saved, frontier.highest_saved) {
            (Some(lowest), Some(highest)) => Plan::Descending {
                from: frontier.checkpoint.map_or(highest, |c| c.max(highest)),
                to: lowest,
                only_missing: true,
            },
            _ => Plan::Indices(Vec::new()),
        },
        Direction::FromHighestSavedUpToNew => Plan::Follow { from: resume_from },
        Direction::FromActualToHighestSaved => Plan::Descending {
            from: frontier.tip,
            to: resume_from,
            only_missing: false,
        },
        Direction::FromLowestSavedToZero => Plan::Descending {
            from: frontier.lowest_saved.unwrap_or(frontier.tip),
            to: 0,
            only_missing: false,
        },
    }
}

// =============================================================================
// Traversal Context
// =============================================================================

/// Result of ingesting one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Rows were written.
    Ingested,
    /// Nothing to write at this index.
    Unchanged,
    /// Rows were written from state that is still moving (the active era).
    /// Follow mode grabs the index again once the tip advances.
    Provisional,
    /// A dependency is not ingested yet; a later pass should succeed.
    Deferred { reason: String },
}

impl ItemOutcome {
    /// Whether follow mode should come back to this index.
    pub fn needs_revisit(&self) -> bool {
        matches!(self, Self::Provisional | Self::Deferred { .. })
    }
}

/// Explicit state of one traversal run.
#[derive(Debug, Clone)]
pub struct TraversalContext {
    pub kind: EntityKind,
    pub direction: Direction,
    /// First and last planned index (finite plans only).
    pub bounds: Option<(u64, u64)>,
    /// Index currently (or last) being processed.
    pub current: Option<u64>,
    pub processed: u64,
    pub skipped: u64,
    pub deferred: u64,
    pub failed: u64,
    pub last_error: Option<String>,
}

impl TraversalContext {
    pub fn new(kind: EntityKind, direction: Direction) -> Self {
        Self {
            kind,
            direction,
            bounds: None,
            current: None,
            processed: 0,
            skipped: 0,
            deferred: 0,
            failed: 0,
            last_error: None,
        }
    }

    /// Whether the pass finished with nothing left to retry.
    pub fn is_clean(&self) -> bool {
        self.deferred == 0 && self.failed == 0
    }
}

// =============================================================================
// Grabber
// =============================================================================

/// One entity kind as seen by the traversal controller.
#[async_trait]
pub trait Grabber: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Current persisted bounds and tip for this kind.
    async fn frontier(&self) -> IndexerResult<Frontier>;

    /// Whether the index is already present in the store.
    async fn exists(&self, index: u64) -> IndexerResult<bool>;

    /// Ingest (or re-ingest) one index.
    async fn grab(&self, index: u64) -> IndexerResult<ItemOutcome>;

    /// Called after a gap was filled at `index`.
    async fn on_gap_filled(&self, _index: u64) -> IndexerResult<()> {
        Ok(())
    }

    /// Called before a tip-down pass starts.
    async fn clear_checkpoint(&self) -> IndexerResult<()> {
        Ok(())
    }
}

// =============================================================================
// Traversal
// =============================================================================

/// Sequential traversal driver.
pub struct Traversal<R: Repositories> {
    config: TraversalConfig,
    repositories: Arc<R>,
}

impl<R: Repositories> Traversal<R> {
    pub fn new(config: TraversalConfig, repositories: Arc<R>) -> Self {
        Self {
            config,
            repositories,
        }
    }

    /// Run one traversal to completion (or until shutdown for follow mode).
    ///
    /// Per-item errors are classified by tier: transient and scope-fatal
    /// errors are counted in `ctx` and the traversal moves on; process-fatal
    /// errors end the run.
    #[instrument(skip_all, fields(kind = %ctx.kind, direction = ctx.direction.name()))]
    pub async fn run(
        &self,
        grabber: &dyn Grabber,
        ctx: &mut TraversalContext,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        self.verify_chain_record().await?;

        if ctx.direction == Direction::FromActualToHighestSaved {
            grabber.clear_checkpoint().await?;
        }

        let frontier = grabber.frontier().await?;
        let plan = plan(&ctx.direction, &frontier, self.config.reverify_depth);
        ctx.bounds = plan.bounds();

        info!(
            lowest = ?frontier.lowest_saved,
            highest = ?frontier.highest_saved,
            tip = frontier.tip,
            bounds = ?ctx.bounds,
            "🧭 Starting traversal"
        );

        match plan {
            Plan::Indices(indices) => {
                for index in indices {
                    self.step(grabber, ctx, index, false, &shutdown_rx).await?;
                }
            }
            Plan::Descending {
                from,
                to,
                only_missing,
            } => {
                let mut index = from;
                while index >= to {
                    self.step(grabber, ctx, index, only_missing, &shutdown_rx)
                        .await?;
                    if index == 0 {
                        break;
                    }
                    index -= 1;
                }
            }
            Plan::Follow { from } => {
                self.follow(grabber, ctx, from, &mut shutdown_rx).await?;
            }
        }

        info!(
            processed = ctx.processed,
            skipped = ctx.skipped,
            deferred = ctx.deferred,
            failed = ctx.failed,
            "✅ Traversal finished"
        );
        Ok(())
    }

    /// The Chain record must exist before anything is written.
    async fn verify_chain_record(&self) -> IndexerResult<()> {
        let chain = self
            .repositories
            .chains()
            .get_chain(&self.config.chain_name)
            .await?;

        if chain.is_none() {
            error!(
                chain = %self.config.chain_name,
                "❌ Chain record missing, run with --seed-chain first"
            );
            return Err(IndexerError::ChainNotRegistered(
                self.config.chain_name.clone(),
            ));
        }
        Ok(())
    }

    /// Process ascending indices and keep polling the tip.
    ///
    /// Deferred and provisional indices are kept in `revisit`; the next pass
    /// after the tip advances starts from the lowest of them.
    async fn follow(
        &self,
        grabber: &dyn Grabber,
        ctx: &mut TraversalContext,
        from: u64,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        let mut next = from;
        let mut revisit: Option<u64> = None;

        loop {
            if *shutdown_rx.borrow() {
                debug!("Shutdown requested");
                return Err(IndexerError::ShutdownRequested);
            }

            match grabber.frontier().await {
                Ok(frontier) if next <= frontier.tip => {
                    let start = revisit.take().map_or(next, |r| r.min(next));
                    debug!(from = start, to = frontier.tip, "Catching up to tip");
                    for index in start..=frontier.tip {
                        if self.step(grabber, ctx, index, false, shutdown_rx).await? {
                            revisit.get_or_insert(index);
                        }
                    }
                    next = frontier.tip.saturating_add(1);
                    continue;
                }
                Ok(_) => trace!(next, "Waiting for new tip"),
                Err(e) if e.tier() == ErrorTier::FatalForProcess => return Err(e),
                Err(e) => warn!(error = %e, "⚠️  Failed to read frontier, retrying"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Err(IndexerError::ShutdownRequested);
                    }
                }
            }
        }
    }

    /// Process one index and fold its outcome into the context.
    ///
    /// Returns whether the index should be grabbed again on a later pass.
    async fn step(
        &self,
        grabber: &dyn Grabber,
        ctx: &mut TraversalContext,
        index: u64,
        only_missing: bool,
        shutdown_rx: &watch::Receiver<bool>,
    ) -> IndexerResult<bool> {
        if *shutdown_rx.borrow() {
            debug!(index, "Shutdown requested");
            return Err(IndexerError::ShutdownRequested);
        }

        ctx.current = Some(index);
        let kind = ctx.kind.as_str();

        let outcome = attempt(grabber, index, only_missing).await;
        let revisit = matches!(&outcome, Ok(Some(o)) if o.needs_revisit());

        match outcome {
            Ok(None) => {
                trace!(index, "Already saved, skipping");
                ctx.skipped += 1;
            }
            Ok(Some(ItemOutcome::Ingested)) => {
                debug!(index, "Item ingested");
                ctx.processed += 1;
                record_item_ingested(kind);
            }
            Ok(Some(ItemOutcome::Provisional)) => {
                debug!(index, "Item ingested from moving state");
                ctx.processed += 1;
                record_item_ingested(kind);
            }
            Ok(Some(ItemOutcome::Unchanged)) => {
                trace!(index, "Nothing to write");
                ctx.skipped += 1;
            }
            Ok(Some(ItemOutcome::Deferred { reason })) => {
                warn!(index, %reason, "⏳ Item deferred");
                ctx.deferred += 1;
                record_item_deferred(kind);
            }
            Err(e) => {
                let tier = e.tier();
                if tier == ErrorTier::FatalForProcess {
                    return Err(e);
                }
                match tier {
                    ErrorTier::Transient => warn!(index, error = %e, "⚠️  Item failed"),
                    _ => error!(index, error = %e, "❌ Item scope aborted"),
                }
                ctx.failed += 1;
                ctx.last_error = Some(e.to_string());
                record_item_failed(kind, tier);
            }
        }

        Ok(revisit)
    }
}

/// Grab one index. `None` means it was skipped as already saved.
async fn attempt(
    grabber: &dyn Grabber,
    index: u64,
    only_missing: bool,
) -> IndexerResult<Option<ItemOutcome>> {
    if only_missing && grabber.exists(index).await? {
        return Ok(None);
    }
    let _timer = ProcessingTimer::new(grabber.kind().as_str());
    let outcome = grabber.grab(index).await?;
    if only_missing && matches!(outcome, ItemOutcome::Ingested | ItemOutcome::Provisional) {
        grabber.on_gap_filled(index).await?;
    }
    Ok(Some(outcome))
}
