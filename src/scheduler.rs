// =============================================================================
// Scheduler Loop — one discover / open / evaluate / close pass per interval
// =============================================================================
//
// Cycle:
//   1. fetch snapshot                 (failure aborts the cycle, nothing mutated)
//   2. refresh price book (deepest pair per asset)
//   3. filter the deepest pair of each unheld asset
//   4. size against budget and free slots
//   5. open allocations concurrently, then insert fills one at a time
//   6. fetch prices for held assets the snapshot did not cover
//   7. evaluate every open position
//   8. close triggered positions concurrently (retrying transient failures),
//      then remove, credit and record one at a time
//
// Per-item failures are logged, pushed to the error log and counted in the
// cycle report; they never stop the loop. Only an `InvariantViolation` does.
//
// The stop signal is checked between cycles. A cycle in flight completes, and
// the inter-cycle wait wakes as soon as stop is signalled.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::candidate_filter::{self, RiskTier};
use crate::error::{DataFetchError, ExecutionError, InvariantViolation};
use crate::execution::ExecutionGateway;
use crate::exit::evaluator::evaluate_positions;
use crate::ledger::Position;
use crate::market_data::{deepest_pairs, MarketDataProvider};
use crate::outcome::TradeOutcome;
use crate::runtime_config::RuntimeConfig;
use crate::sizer::{self, SizingRequest};
use crate::types::{AssetSnapshot, SchedulerState, TriggerKind};

const CLOSE_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub opened: usize,
    pub open_failures: usize,
    pub closed: usize,
    pub close_failures: usize,
    pub skipped_evaluations: usize,
    /// The snapshot could not be fetched; nothing else ran.
    pub aborted: bool,
}

pub struct Scheduler {
    state: Arc<AppState>,
    market: Arc<dyn MarketDataProvider>,
    gateway: ExecutionGateway,
    close_retry_pause: Duration,
}

impl Scheduler {
    pub fn new(
        state: Arc<AppState>,
        market: Arc<dyn MarketDataProvider>,
        gateway: ExecutionGateway,
    ) -> Self {
        Self {
            state,
            market,
            gateway,
            close_retry_pause: CLOSE_RETRY_PAUSE,
        }
    }

    pub fn with_close_retry_pause(mut self, pause: Duration) -> Self {
        self.close_retry_pause = pause;
        self
    }

    /// Run cycles until `stop` turns true (or its sender is dropped).
    ///
    /// The state is `Running` while a cycle is in flight and `Idle` during the
    /// wait between cycles.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> Result<(), InvariantViolation> {
        info!(venue = self.gateway.venue_name(), "scheduler started");

        let mut cycle: u64 = 0;
        while !*stop.borrow() {
            cycle += 1;
            self.state.set_scheduler_state(SchedulerState::Running);
            let outcome = self.run_cycle().await;
            self.state.set_scheduler_state(SchedulerState::Idle);
            match outcome {
                Ok(report) => info!(cycle, report = ?report, "cycle complete"),
                Err(e) => {
                    error!(cycle, error = %e, "ledger invariant violated, halting");
                    self.state.set_scheduler_state(SchedulerState::Stopped);
                    return Err(e);
                }
            }

            let interval = self.state.runtime_config.read().poll_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.state.set_scheduler_state(SchedulerState::Stopped);
        info!(cycles = cycle, "scheduler stopped");
        Ok(())
    }

    /// One full pass.
    pub async fn run_cycle(&self) -> Result<CycleReport, InvariantViolation> {
        let config = self.state.runtime_config.read().clone();
        let mut report = CycleReport::default();

        // ── 1-2. Snapshot ────────────────────────────────────────────────
        let snapshot = match self.fetch_snapshot(config.market_data_timeout()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "market snapshot unavailable, cycle aborted");
                self.state.push_error(e.to_string(), None);
                report.aborted = true;
                return Ok(report);
            }
        };
        self.state.price_book.replace_from_snapshot(&snapshot);
        debug!(assets = snapshot.len(), "snapshot received");

        // ── 3-5. Discover and open ───────────────────────────────────────
        self.open_new_positions(&snapshot, &config, &mut report).await?;

        // ── 6. Prices for held assets outside the snapshot ───────────────
        let held = self.state.ledger.snapshot();
        self.refresh_held_prices(&held, config.market_data_timeout()).await;

        // ── 7. Evaluate ──────────────────────────────────────────────────
        let evaluation = evaluate_positions(
            &held,
            self.state.price_book.as_ref(),
            &config.exit_thresholds(),
        );
        report.skipped_evaluations = evaluation.skipped.len();
        for (id, e) in &evaluation.skipped {
            self.state.push_error(e.to_string(), Some(id.to_string()));
        }

        // ── 8. Close ─────────────────────────────────────────────────────
        let max_retries = config.max_close_retries;
        let closes = evaluation.triggered().map(|decision| async move {
            let result = self
                .close_with_retry(&decision.position, decision.trigger, max_retries)
                .await;
            (&decision.position, result)
        });
        for (position, result) in join_all(closes).await {
            match result {
                Ok(outcome) => {
                    self.settle_close(position, &outcome)?;
                    report.closed += 1;
                }
                Err(e) => {
                    warn!(id = %position.id, symbol = %position.symbol, error = %e, "close failed, position kept");
                    self.state
                        .push_error(format!("close {}: {e}", position.symbol), Some(position.id.to_string()));
                    report.close_failures += 1;
                }
            }
        }

        self.state.increment_version();
        Ok(report)
    }

    async fn fetch_snapshot(&self, timeout: Duration) -> Result<Vec<AssetSnapshot>, DataFetchError> {
        match tokio::time::timeout(timeout, self.market.fetch_snapshot()).await {
            Ok(result) => result,
            Err(_) => Err(DataFetchError::Timeout {
                after_secs: timeout.as_secs(),
            }),
        }
    }

    async fn open_new_positions(
        &self,
        snapshot: &[AssetSnapshot],
        config: &RuntimeConfig,
        report: &mut CycleReport,
    ) -> Result<(), InvariantViolation> {
        // One position per asset, bought on its deepest pair; skip what we hold.
        let unheld: Vec<AssetSnapshot> = deepest_pairs(snapshot)
            .into_iter()
            .filter(|a| !self.state.ledger.holds_asset(&a.asset_id))
            .cloned()
            .collect();

        let thresholds = config.filter_thresholds();
        let candidates: Vec<&AssetSnapshot> =
            candidate_filter::eligible(&unheld, Utc::now(), &thresholds).collect();
        for asset in &candidates {
            info!(
                symbol = %asset.symbol,
                asset_id = %asset.asset_id,
                price = asset.price_usd,
                risk = %RiskTier::classify(asset),
                "candidate"
            );
        }

        let request = SizingRequest {
            budget_usd: self.state.budget(),
            spend_per_asset_usd: config.spend_per_asset_usd,
            open_positions: self.state.ledger.count(),
            max_concurrent_positions: config.max_concurrent_positions,
        };
        let plan = sizer::allocate(candidates, &request);
        if plan.is_empty() {
            debug!(limit = ?plan.limit, "nothing to open");
            return Ok(());
        }
        info!(
            count = plan.allocations.len(),
            total_spend_usd = plan.total_spend(),
            limit = ?plan.limit,
            "opening positions"
        );

        let opens = plan.allocations.iter().map(|allocation| async move {
            let result = self.gateway.open(allocation.asset, allocation.spend_usd).await;
            (allocation.asset, result)
        });

        for (asset, result) in join_all(opens).await {
            match result {
                Ok(position) => {
                    let spent = position.spent_usd;
                    self.state.ledger.insert(position)?;
                    self.state.debit(spent);
                    report.opened += 1;
                }
                Err(e) => {
                    warn!(symbol = %asset.symbol, asset_id = %asset.asset_id, error = %e, "open failed");
                    self.state
                        .push_error(format!("open {}: {e}", asset.symbol), Some(asset.asset_id.clone()));
                    report.open_failures += 1;
                }
            }
        }
        Ok(())
    }

    async fn refresh_held_prices(&self, held: &[Position], timeout: Duration) {
        let mut missing: Vec<String> = held
            .iter()
            .filter(|p| !self.state.price_book.contains(&p.asset_id))
            .map(|p| p.asset_id.clone())
            .collect();
        missing.sort();
        missing.dedup();
        if missing.is_empty() {
            return;
        }

        match tokio::time::timeout(timeout, self.market.fetch_prices(&missing)).await {
            Ok(Ok(prices)) => {
                debug!(requested = missing.len(), received = prices.len(), "held prices refreshed");
                self.state.price_book.merge(prices);
            }
            Ok(Err(e)) => {
                warn!(error = %e, assets = missing.len(), "held price refresh failed");
                self.state.push_error(e.to_string(), None);
            }
            Err(_) => {
                warn!(after_secs = timeout.as_secs(), "held price refresh timed out");
                self.state.push_error(
                    DataFetchError::Timeout {
                        after_secs: timeout.as_secs(),
                    }
                    .to_string(),
                    None,
                );
            }
        }
    }

    async fn close_with_retry(
        &self,
        position: &Position,
        trigger: TriggerKind,
        max_retries: u32,
    ) -> Result<TradeOutcome, ExecutionError> {
        let mut attempt = 0;
        loop {
            match self.gateway.close(position, trigger).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    warn!(id = %position.id, attempt, error = %e, "close failed, retrying");
                    tokio::time::sleep(self.close_retry_pause).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn settle_close(&self, position: &Position, outcome: &TradeOutcome) -> Result<(), InvariantViolation> {
        if self.state.ledger.remove(position.id).is_none() {
            return Err(InvariantViolation::UnknownPosition(position.id));
        }
        self.state.credit(outcome.realized_usd);

        if let Err(e) = self.state.recorder.record(outcome) {
            error!(id = %position.id, error = format!("{e:#}"), "trade outcome not persisted");
            self.state
                .push_error(format!("{e:#}"), Some(position.id.to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("gateway", &self.gateway)
            .field("close_retry_pause", &self.close_retry_pause)
            .finish()
    }
}
