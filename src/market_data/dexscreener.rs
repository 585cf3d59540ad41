// =============================================================================
// DexScreener REST client — pair snapshots and token prices
// =============================================================================
//
// Endpoints (public, unsigned):
//   GET /latest/dex/pairs/{chain}          discovery snapshot
//   GET /latest/dex/tokens/{a,b,c,...}     pairs for up to 30 token addresses
//
// Rows are decoded one by one so that a single malformed pair never costs the
// whole snapshot; such rows are dropped with a debug log.
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::MarketDataProvider;
use crate::error::DataFetchError;
use crate::types::AssetSnapshot;

/// DexScreener accepts at most this many addresses per token query.
const MAX_TOKENS_PER_QUERY: usize = 30;

#[derive(Debug, Deserialize)]
struct PairsEnvelope {
    #[serde(default)]
    pairs: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPair {
    base_token: RawToken,
    /// Usually a decimal string, occasionally a bare number.
    #[serde(default)]
    price_usd: Option<serde_json::Value>,
    #[serde(default)]
    liquidity: Option<RawLiquidity>,
    #[serde(default)]
    fdv: Option<f64>,
    /// Milliseconds since the UNIX epoch.
    #[serde(default, alias = "createdAt")]
    pair_created_at: Option<i64>,
    #[serde(default)]
    volume: Option<RawWindowed>,
    #[serde(default)]
    price_change: Option<RawWindowed>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawToken {
    address: String,
    #[serde(default)]
    symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawLiquidity {
    #[serde(default)]
    usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawWindowed {
    #[serde(default)]
    h24: Option<f64>,
}

impl RawPair {
    fn price(&self) -> Option<f64> {
        let price = match self.price_usd.as_ref()? {
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
            serde_json::Value::Number(n) => n.as_f64()?,
            _ => return None,
        };
        (price.is_finite() && price > 0.0).then_some(price)
    }

    fn liquidity_usd(&self) -> Option<f64> {
        self.liquidity.as_ref().and_then(|l| l.usd)
    }

    fn into_snapshot(self) -> Option<AssetSnapshot> {
        let price_usd = self.price()?;
        let liquidity_usd = self.liquidity_usd();
        Some(AssetSnapshot {
            asset_id: self.base_token.address,
            symbol: self.base_token.symbol,
            price_usd,
            liquidity_usd,
            valuation_usd: self.fdv,
            created_at: self.pair_created_at.and_then(DateTime::<Utc>::from_timestamp_millis),
            volume_24h_usd: self.volume.and_then(|v| v.h24),
            price_change_24h_pct: self.price_change.and_then(|p| p.h24),
        })
    }
}

/// Decode a `{ "pairs": [...] }` body, skipping rows that do not parse.
fn parse_pairs(body: &str) -> Result<Vec<RawPair>, DataFetchError> {
    let envelope: PairsEnvelope =
        serde_json::from_str(body).map_err(|e| DataFetchError::Decode(e.to_string()))?;

    let rows = envelope.pairs.unwrap_or_default();
    let total = rows.len();
    let pairs: Vec<RawPair> = rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<RawPair>(row) {
            Ok(pair) => Some(pair),
            Err(e) => {
                debug!(error = %e, "dropping undecodable pair row");
                None
            }
        })
        .collect();

    if pairs.len() < total {
        debug!(kept = pairs.len(), total, "some pair rows were dropped");
    }
    Ok(pairs)
}

/// Convert decoded rows into snapshots, dropping rows without a usable price.
fn to_snapshots(pairs: Vec<RawPair>) -> Vec<AssetSnapshot> {
    pairs
        .into_iter()
        .filter_map(|pair| {
            let address = pair.base_token.address.clone();
            let snapshot = pair.into_snapshot();
            if snapshot.is_none() {
                debug!(asset_id = %address, "dropping pair without a positive price");
            }
            snapshot
        })
        .collect()
}

/// Best price per requested token: the one quoted by its deepest pool.
fn best_prices(pairs: &[RawPair], wanted: &[String]) -> HashMap<String, f64> {
    let mut best: HashMap<String, (f64, f64)> = HashMap::new();
    for pair in pairs {
        let id = &pair.base_token.address;
        if !wanted.iter().any(|w| w == id) {
            continue;
        }
        let Some(price) = pair.price() else { continue };
        let depth = pair.liquidity_usd().unwrap_or(0.0);
        match best.get(id) {
            Some((_, best_depth)) if *best_depth >= depth => {}
            _ => {
                best.insert(id.clone(), (price, depth));
            }
        }
    }
    best.into_iter().map(|(id, (price, _))| (id, price)).collect()
}

/// HTTP client for the DexScreener public API.
#[derive(Clone)]
pub struct DexScreenerClient {
    base_url: String,
    chain: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl DexScreenerClient {
    pub fn new(
        base_url: impl Into<String>,
        chain: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build market data HTTP client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "DexScreenerClient initialised");

        Ok(Self {
            base_url,
            chain: chain.into(),
            timeout,
            client,
        })
    }

    async fn get_pairs(&self, url: &str) -> Result<Vec<RawPair>, DataFetchError> {
        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DataFetchError::Timeout {
                    after_secs: self.timeout.as_secs(),
                }
            } else {
                DataFetchError::Request(e.to_string())
            }
        })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| DataFetchError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(DataFetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_pairs(&body)
    }
}

#[async_trait]
impl MarketDataProvider for DexScreenerClient {
    #[instrument(skip(self), name = "dexscreener::fetch_snapshot")]
    async fn fetch_snapshot(&self) -> Result<Vec<AssetSnapshot>, DataFetchError> {
        let url = format!("{}/latest/dex/pairs/{}", self.base_url, self.chain);
        let pairs = self.get_pairs(&url).await?;
        let snapshot = to_snapshots(pairs);
        debug!(count = snapshot.len(), "snapshot retrieved");
        Ok(snapshot)
    }

    #[instrument(skip(self, asset_ids), fields(count = asset_ids.len()), name = "dexscreener::fetch_prices")]
    async fn fetch_prices(
        &self,
        asset_ids: &[String],
    ) -> Result<HashMap<String, f64>, DataFetchError> {
        let mut prices = HashMap::new();
        for chunk in asset_ids.chunks(MAX_TOKENS_PER_QUERY) {
            let url = format!("{}/latest/dex/tokens/{}", self.base_url, chunk.join(","));
            let pairs = self.get_pairs(&url).await?;
            prices.extend(best_prices(&pairs, chunk));
        }
        debug!(found = prices.len(), "token prices retrieved");
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str = r#"{
        "schemaVersion": "1.0.0",
        "pairs": [
            {
                "pairAddress": "P1",
                "baseToken": { "address": "MintA", "symbol": "AAA" },
                "priceUsd": "0.1000",
                "liquidity": { "usd": 60000.0 },
                "fdv": 800000.0,
                "pairCreatedAt": 1700000000000,
                "volume": { "h24": 120000.0 },
                "priceChange": { "h24": 12.5 }
            },
            {
                "pairAddress": "P2",
                "baseToken": { "address": "MintB", "symbol": "BBB" },
                "priceUsd": "0",
                "liquidity": { "usd": 90000.0 }
            },
            {
                "pairAddress": "P3",
                "baseToken": { "address": "MintC", "symbol": "CCC" },
                "priceUsd": 2.5
            },
            { "pairAddress": "P4" }
        ]
    }"#;

    #[test]
    fn parses_rows_and_drops_unusable_ones() {
        let snapshot = to_snapshots(parse_pairs(BODY).unwrap());
        assert_eq!(snapshot.len(), 2);

        let a = &snapshot[0];
        assert_eq!(a.asset_id, "MintA");
        assert_eq!(a.symbol, "AAA");
        assert!((a.price_usd - 0.1).abs() < 1e-12);
        assert_eq!(a.liquidity_usd, Some(60_000.0));
        assert_eq!(a.valuation_usd, Some(800_000.0));
        assert_eq!(a.created_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(a.volume_24h_usd, Some(120_000.0));
        assert_eq!(a.price_change_24h_pct, Some(12.5));

        let c = &snapshot[1];
        assert_eq!(c.asset_id, "MintC");
        assert!(c.liquidity_usd.is_none());
        assert!(c.valuation_usd.is_none());
        assert!(c.created_at.is_none());
    }

    #[test]
    fn created_at_alias_is_accepted() {
        let body = r#"{ "pairs": [ {
            "baseToken": { "address": "X", "symbol": "X" },
            "priceUsd": "1",
            "createdAt": 1700000000000
        } ] }"#;
        let snapshot = to_snapshots(parse_pairs(body).unwrap());
        assert_eq!(snapshot[0].created_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn null_pairs_is_an_empty_snapshot() {
        assert!(parse_pairs(r#"{ "pairs": null }"#).unwrap().is_empty());
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        assert!(matches!(
            parse_pairs("<html>"),
            Err(DataFetchError::Decode(_))
        ));
    }

    #[test]
    fn best_price_comes_from_deepest_pool() {
        let body = r#"{ "pairs": [
            { "baseToken": { "address": "T", "symbol": "T" }, "priceUsd": "1.0", "liquidity": { "usd": 100.0 } },
            { "baseToken": { "address": "T", "symbol": "T" }, "priceUsd": "1.2", "liquidity": { "usd": 5000.0 } },
            { "baseToken": { "address": "U", "symbol": "U" }, "priceUsd": "9.0", "liquidity": { "usd": 5000.0 } }
        ] }"#;
        let pairs = parse_pairs(body).unwrap();
        let prices = best_prices(&pairs, &["T".to_string()]);
        assert_eq!(prices.len(), 1);
        assert!((prices["T"] - 1.2).abs() < 1e-12);
    }

    #[tokio::test]
    async fn fetch_snapshot_hits_chain_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/dex/pairs/solana"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
            .mount(&server)
            .await;

        let client =
            DexScreenerClient::new(server.uri(), "solana", Duration::from_secs(5)).unwrap();
        let snapshot = client.fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let client =
            DexScreenerClient::new(server.uri(), "solana", Duration::from_secs(5)).unwrap();
        match client.fetch_snapshot().await {
            Err(DataFetchError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_prices_queries_token_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/dex/tokens/MintA,MintC"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
            .mount(&server)
            .await;

        let client =
            DexScreenerClient::new(server.uri(), "solana", Duration::from_secs(5)).unwrap();
        let prices = client
            .fetch_prices(&["MintA".to_string(), "MintC".to_string()])
            .await
            .unwrap();
        assert_eq!(prices.len(), 2);
        assert!((prices["MintC"] - 2.5).abs() < 1e-12);
    }
}
