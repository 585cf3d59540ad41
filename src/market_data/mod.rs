// =============================================================================
// Market Data — snapshot provider trait and the per-cycle price book
// =============================================================================

pub mod dexscreener;

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{DataFetchError, PriceLookupError};
use crate::exit::evaluator::PriceLookup;
use crate::types::AssetSnapshot;

pub use dexscreener::DexScreenerClient;

/// Source of tradable-pair snapshots and spot prices.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch the current set of tradable assets. No retry is implied.
    async fn fetch_snapshot(&self) -> Result<Vec<AssetSnapshot>, DataFetchError>;

    /// Fetch spot prices for specific assets (typically held ones that fell
    /// out of the discovery snapshot). Unknown ids are simply absent.
    async fn fetch_prices(
        &self,
        asset_ids: &[String],
    ) -> Result<HashMap<String, f64>, DataFetchError>;
}

/// Latest known USD price per asset id.
///
/// Replaced wholesale at the start of every cycle so that a price never
/// outlives the snapshot it came from.
#[derive(Debug, Default)]
pub struct PriceBook {
    prices: RwLock<HashMap<String, f64>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every price with the ones in `snapshot`, one per asset taken
    /// from its deepest pair.
    pub fn replace_from_snapshot(&self, snapshot: &[AssetSnapshot]) {
        let fresh: HashMap<String, f64> = deepest_pairs(snapshot)
            .into_iter()
            .map(|a| (a.asset_id.clone(), a.price_usd))
            .collect();
        *self.prices.write() = fresh;
    }

    /// Add or overwrite individual prices.
    pub fn merge(&self, prices: HashMap<String, f64>) {
        self.prices.write().extend(prices);
    }

    pub fn get(&self, asset_id: &str) -> Option<f64> {
        self.prices.read().get(asset_id).copied()
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        self.prices.read().contains_key(asset_id)
    }

}

/// One row per asset, keeping the pair with the greatest `liquidity_usd`.
/// Missing liquidity counts as zero and ties keep the earlier row. Assets stay
/// in order of first appearance.
pub fn deepest_pairs(snapshot: &[AssetSnapshot]) -> Vec<&AssetSnapshot> {
    let mut slot: HashMap<&str, usize> = HashMap::new();
    let mut deepest: Vec<&AssetSnapshot> = Vec::new();
    for asset in snapshot {
        match slot.get(asset.asset_id.as_str()) {
            Some(&i) => {
                if depth(asset) > depth(deepest[i]) {
                    deepest[i] = asset;
                }
            }
            None => {
                slot.insert(asset.asset_id.as_str(), deepest.len());
                deepest.push(asset);
            }
        }
    }
    deepest
}

fn depth(asset: &AssetSnapshot) -> f64 {
    asset.liquidity_usd.unwrap_or(0.0)
}

impl PriceLookup for PriceBook {
    fn price_of(&self, asset_id: &str) -> Result<f64, PriceLookupError> {
        match self.get(asset_id) {
            None => Err(PriceLookupError::NoQuote {
                asset_id: asset_id.to_string(),
            }),
            Some(price) if !(price.is_finite() && price > 0.0) => {
                Err(PriceLookupError::InvalidPrice {
                    asset_id: asset_id.to_string(),
                    price,
                })
            }
            Some(price) => Ok(price),
        }
    }
}
