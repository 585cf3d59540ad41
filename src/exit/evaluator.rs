// =============================================================================
// Exit Evaluator — stop-loss / take-profit decisions per open position
// =============================================================================
//
// For each position:
//   current_value     = current_price * quantity
//   stop_loss_value   = spent * (1 - stop_loss_fraction)
//   take_profit_value = spent * take_profit_multiplier
//
// Precedence: stop-loss first, then take-profit, else none. With crossed
// thresholds (degenerate config) a value satisfying both is a stop-loss.
//
// A position whose price cannot be looked up is skipped for this pass; it is
// never force-liquidated. Evaluation is pure and follows snapshot order, so
// re-running it on unchanged inputs gives identical decisions.
// =============================================================================

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PriceLookupError;
use crate::ledger::Position;
use crate::types::TriggerKind;

/// Capability: current USD price by asset id.
pub trait PriceLookup {
    fn price_of(&self, asset_id: &str) -> Result<f64, PriceLookupError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitThresholds {
    /// In (0, 1): 0.30 exits once 30 % of spend is lost.
    pub stop_loss_fraction: f64,
    /// > 1: 2.0 exits once value doubles.
    pub take_profit_multiplier: f64,
}

impl Default for ExitThresholds {
    fn default() -> Self {
        Self {
            stop_loss_fraction: 0.30,
            take_profit_multiplier: 2.0,
        }
    }
}

impl ExitThresholds {
    pub fn stop_loss_value(&self, spent_usd: f64) -> f64 {
        spent_usd * (1.0 - self.stop_loss_fraction)
    }

    pub fn take_profit_value(&self, spent_usd: f64) -> f64 {
        spent_usd * self.take_profit_multiplier
    }
}

/// Transient verdict for one position. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub position: Position,
    pub trigger: TriggerKind,
    pub current_price: f64,
    pub current_value: f64,
}

impl ExitDecision {
    pub fn is_triggered(&self) -> bool {
        self.trigger != TriggerKind::None
    }
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    /// One decision per position that had a price, in snapshot order.
    pub decisions: Vec<ExitDecision>,
    /// Positions left alone this pass because no price was available.
    pub skipped: Vec<(Uuid, PriceLookupError)>,
}

impl EvaluationReport {
    /// Decisions with an actual trigger, in snapshot order.
    pub fn triggered(&self) -> impl Iterator<Item = &ExitDecision> {
        self.decisions.iter().filter(|d| d.is_triggered())
    }
}

/// Classify a single position at `current_price`.
pub fn decide(position: &Position, current_price: f64, thresholds: &ExitThresholds) -> ExitDecision {
    let current_value = position.value_at(current_price);
    let trigger = if current_value <= thresholds.stop_loss_value(position.spent_usd) {
        TriggerKind::StopLoss
    } else if current_value >= thresholds.take_profit_value(position.spent_usd) {
        TriggerKind::TakeProfit
    } else {
        TriggerKind::None
    };

    ExitDecision {
        position: position.clone(),
        trigger,
        current_price,
        current_value,
    }
}

/// Evaluate every position in `positions` against current prices.
pub fn evaluate_positions<P>(
    positions: &[Position],
    prices: &P,
    thresholds: &ExitThresholds,
) -> EvaluationReport
where
    P: PriceLookup + ?Sized,
{
    let mut report = EvaluationReport::default();

    for position in positions {
        let price = match prices.price_of(&position.asset_id) {
            Ok(price) => price,
            Err(e) => {
                warn!(
                    id = %position.id,
                    symbol = %position.symbol,
                    error = %e,
                    "no current price, skipping exit evaluation"
                );
                report.skipped.push((position.id, e));
                continue;
            }
        };

        let decision = decide(position, price, thresholds);
        if decision.is_triggered() {
            info!(
                id = %position.id,
                symbol = %position.symbol,
                trigger = %decision.trigger,
                spent_usd = position.spent_usd,
                current_value = format!("{:.4}", decision.current_value),
                price,
                "exit triggered"
            );
        } else {
            debug!(
                id = %position.id,
                symbol = %position.symbol,
                current_value = format!("{:.4}", decision.current_value),
                "holding"
            );
        }
        report.decisions.push(decision);
    }

    report
}
