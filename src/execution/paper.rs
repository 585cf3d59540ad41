// =============================================================================
// Paper venue — simulated fills for Demo mode
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{Fill, Venue};
use crate::error::ExecutionError;
use crate::ledger::Position;
use crate::market_data::PriceBook;
use crate::types::AssetSnapshot;

/// Buys fill at the snapshot price; sells fill at the current price-book
/// quote. Nothing leaves the process.
#[derive(Debug, Clone)]
pub struct PaperVenue {
    prices: Arc<PriceBook>,
}

impl PaperVenue {
    pub fn new(prices: Arc<PriceBook>) -> Self {
        Self { prices }
    }

    fn sim_reference(side: &str, client_ref: Uuid) -> String {
        format!("PAPER-{side}-{}", &client_ref.simple().to_string()[..8])
    }
}

#[async_trait]
impl Venue for PaperVenue {
    fn name(&self) -> &str {
        "paper"
    }

    async fn buy(
        &self,
        asset: &AssetSnapshot,
        spend_usd: f64,
        client_ref: Uuid,
    ) -> Result<Fill, ExecutionError> {
        debug!(symbol = %asset.symbol, spend_usd, price = asset.price_usd, "paper buy");
        Ok(Fill {
            price: asset.price_usd,
            reference: Some(Self::sim_reference("BUY", client_ref)),
        })
    }

    async fn sell(&self, position: &Position) -> Result<Fill, ExecutionError> {
        let price = self.prices.get(&position.asset_id).ok_or_else(|| {
            ExecutionError::rejected(format!("no market price for {}", position.asset_id))
        })?;
        debug!(symbol = %position.symbol, quantity = position.quantity, price, "paper sell");
        Ok(Fill {
            price,
            reference: Some(Self::sim_reference("SELL", position.id)),
        })
    }
}
