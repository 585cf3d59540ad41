// =============================================================================
// Execution Gateway — opens and closes positions through a swap venue
// =============================================================================
//
// The gateway owns the per-call timeout and turns venue fills into ledger
// types: a filled buy becomes a `Position`, a filled sell becomes a settled
// `TradeOutcome`. It never touches the ledger itself; the scheduler applies
// the returned values.
//
// Venues:
//   paper   fills at the last observed market price, no network
//   bridge  forwards swaps to an external signing/routing service over HTTP
// =============================================================================

pub mod bridge;
pub mod paper;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::ExecutionError;
use crate::ledger::Position;
use crate::outcome::{self, TradeOutcome};
use crate::types::{AssetSnapshot, TriggerKind};

pub use bridge::BridgeVenue;
pub use paper::PaperVenue;

/// A filled swap as reported by the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    /// Execution price in USD per token.
    pub price: f64,
    /// Venue-side reference (transaction signature, simulated order id).
    pub reference: Option<String>,
}

/// A place where swaps are executed.
///
/// `client_ref` is the position id the order belongs to, so a venue can
/// de-duplicate a retried close.
#[async_trait]
pub trait Venue: Send + Sync {
    fn name(&self) -> &str;

    async fn buy(
        &self,
        asset: &AssetSnapshot,
        spend_usd: f64,
        client_ref: Uuid,
    ) -> Result<Fill, ExecutionError>;

    async fn sell(&self, position: &Position) -> Result<Fill, ExecutionError>;
}

pub struct ExecutionGateway {
    venue: Arc<dyn Venue>,
    timeout: Duration,
}

impl ExecutionGateway {
    pub fn new(venue: Arc<dyn Venue>, timeout: Duration) -> Self {
        Self { venue, timeout }
    }

    pub fn venue_name(&self) -> &str {
        self.venue.name()
    }

    /// Buy `spend_usd` worth of `asset`. On success the returned position is
    /// not yet in the ledger.
    pub async fn open(
        &self,
        asset: &AssetSnapshot,
        spend_usd: f64,
    ) -> Result<Position, ExecutionError> {
        if !(spend_usd > 0.0) {
            return Err(ExecutionError::rejected(format!(
                "non-positive spend {spend_usd}"
            )));
        }

        let id = Uuid::new_v4();
        let fill = self.bounded(self.venue.buy(asset, spend_usd, id)).await?;
        check_fill_price(fill.price)?;

        info!(
            id = %id,
            symbol = %asset.symbol,
            venue = self.venue.name(),
            spend_usd,
            fill_price = fill.price,
            reference = fill.reference.as_deref().unwrap_or("-"),
            "buy filled"
        );

        Ok(Position::from_fill(id, asset, spend_usd, fill.price, Utc::now()))
    }

    /// Sell the whole of `position`. On success the caller removes the
    /// position from the ledger and records the outcome.
    pub async fn close(
        &self,
        position: &Position,
        trigger: TriggerKind,
    ) -> Result<TradeOutcome, ExecutionError> {
        let fill = self.bounded(self.venue.sell(position)).await?;
        check_fill_price(fill.price)?;

        info!(
            id = %position.id,
            symbol = %position.symbol,
            venue = self.venue.name(),
            trigger = %trigger,
            fill_price = fill.price,
            reference = fill.reference.as_deref().unwrap_or("-"),
            "sell filled"
        );

        Ok(outcome::settle(position, fill.price, Utc::now(), trigger))
    }

    async fn bounded<F>(&self, call: F) -> Result<Fill, ExecutionError>
    where
        F: Future<Output = Result<Fill, ExecutionError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout {
                after_secs: self.timeout.as_secs(),
            }),
        }
    }
}

impl std::fmt::Debug for ExecutionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGateway")
            .field("venue", &self.venue.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn check_fill_price(price: f64) -> Result<(), ExecutionError> {
    if price.is_finite() && price > 0.0 {
        Ok(())
    } else {
        Err(ExecutionError::rejected(format!("invalid fill price {price}")))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Scripted venue: pops one result per call, fills at `price` once the
    /// script runs out. Assets in `reject_assets` are always rejected.
    pub(crate) struct ScriptedVenue {
        pub price: f64,
        pub reject_assets: Mutex<HashSet<String>>,
        pub buys: Mutex<Vec<Result<Fill, ExecutionError>>>,
        pub sells: Mutex<Vec<Result<Fill, ExecutionError>>>,
        pub sell_calls: Mutex<usize>,
        pub delay: Duration,
    }

    impl ScriptedVenue {
        pub(crate) fn filling_at(price: f64) -> Self {
            Self {
                price,
                reject_assets: Mutex::new(HashSet::new()),
                buys: Mutex::new(Vec::new()),
                sells: Mutex::new(Vec::new()),
                sell_calls: Mutex::new(0),
                delay: Duration::ZERO,
            }
        }

        fn fill(&self) -> Result<Fill, ExecutionError> {
            Ok(Fill {
                price: self.price,
                reference: None,
            })
        }
    }

    #[async_trait]
    impl Venue for ScriptedVenue {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn buy(
            &self,
            asset: &AssetSnapshot,
            _spend_usd: f64,
            _client_ref: Uuid,
        ) -> Result<Fill, ExecutionError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.reject_assets.lock().contains(&asset.asset_id) {
                return Err(ExecutionError::rejected("asset blocked"));
            }
            let next = self.buys.lock().pop();
            next.unwrap_or_else(|| self.fill())
        }

        async fn sell(&self, position: &Position) -> Result<Fill, ExecutionError> {
            *self.sell_calls.lock() += 1;
            if self.reject_assets.lock().contains(&position.asset_id) {
                return Err(ExecutionError::rejected("asset blocked"));
            }
            let next = self.sells.lock().pop();
            next.unwrap_or_else(|| self.fill())
        }
    }

    pub(crate) fn asset(id: &str, price: f64) -> AssetSnapshot {
        AssetSnapshot {
            asset_id: id.to_string(),
            symbol: id.to_uppercase(),
            price_usd: price,
            liquidity_usd: Some(60_000.0),
            valuation_usd: Some(800_000.0),
            created_at: Some(Utc::now()),
            volume_24h_usd: None,
            price_change_24h_pct: None,
        }
    }

    fn gateway(venue: ScriptedVenue) -> ExecutionGateway {
        ExecutionGateway::new(Arc::new(venue), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn open_builds_position_from_fill() {
        let gw = gateway(ScriptedVenue::filling_at(0.1));
        let p = gw.open(&asset("a", 0.1), 10.0).await.unwrap();
        assert_eq!(p.asset_id, "a");
        assert!((p.quantity - 100.0).abs() < 1e-9);
        assert!((p.spent_usd - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rejected_buy_surfaces_as_error() {
        let venue = ScriptedVenue::filling_at(0.1);
        venue.buys.lock().push(Err(ExecutionError::rejected("no route")));
        let gw = gateway(venue);
        let err = gw.open(&asset("a", 0.1), 10.0).await.unwrap_err();
        assert_eq!(err, ExecutionError::rejected("no route"));
    }

    #[tokio::test]
    async fn zero_fill_price_is_rejected() {
        let gw = gateway(ScriptedVenue::filling_at(0.0));
        let err = gw.open(&asset("a", 0.1), 10.0).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Rejected { .. }));
    }

    #[tokio::test]
    async fn non_positive_spend_never_reaches_venue() {
        let gw = gateway(ScriptedVenue::filling_at(0.1));
        assert!(gw.open(&asset("a", 0.1), 0.0).await.is_err());
    }

    #[tokio::test]
    async fn slow_venue_times_out() {
        let mut venue = ScriptedVenue::filling_at(0.1);
        venue.delay = Duration::from_secs(5);
        let gw = ExecutionGateway::new(Arc::new(venue), Duration::from_millis(50));
        let err = gw.open(&asset("a", 0.1), 10.0).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn close_settles_outcome() {
        let opener = gateway(ScriptedVenue::filling_at(0.1));
        let p = opener.open(&asset("a", 0.1), 10.0).await.unwrap();

        let closer = gateway(ScriptedVenue::filling_at(0.21));
        let outcome = closer.close(&p, TriggerKind::TakeProfit).await.unwrap();
        assert_eq!(outcome.position_id, p.id);
        assert_eq!(outcome.trigger, TriggerKind::TakeProfit);
        assert!((outcome.realized_usd - 21.0).abs() < 1e-9);
        assert!(outcome.is_profit());
    }
}
