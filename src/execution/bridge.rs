// =============================================================================
// Bridge venue — live swaps through an external execution service
// =============================================================================
//
// The agent never holds keys. Every swap is a single JSON POST to
// `{base_url}/swap`; the bridge signs, routes and submits it, then answers
// with the fill price and transaction signature.
//
//   request   {side, asset_id, symbol, amount_usd | quantity, slippage_bps,
//              client_ref}
//   response  {ok, fill_price, signature, error}
//
// Error mapping:
//   reqwest timeout            -> ExecutionError::Timeout
//   other transport failure    -> ExecutionError::NetworkError
//   non-2xx, ok=false, no fill -> ExecutionError::Rejected
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{Fill, Venue};
use crate::error::ExecutionError;
use crate::ledger::Position;
use crate::types::AssetSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Serialize)]
struct SwapRequest<'a> {
    side: Side,
    asset_id: &'a str,
    symbol: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quantity: Option<f64>,
    slippage_bps: u32,
    client_ref: Uuid,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
    ok: bool,
    #[serde(default)]
    fill_price: Option<f64>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct BridgeVenue {
    base_url: String,
    slippage_bps: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl BridgeVenue {
    pub fn new(base_url: impl Into<String>, slippage_bps: u32, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build bridge HTTP client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, slippage_bps, "BridgeVenue initialised");

        Ok(Self {
            base_url,
            slippage_bps,
            timeout,
            client,
        })
    }

    #[instrument(skip_all, name = "bridge::swap")]
    async fn swap(&self, request: SwapRequest<'_>) -> Result<Fill, ExecutionError> {
        let url = format!("{}/swap", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExecutionError::rejected(format!(
                "bridge returned {status}: {body}"
            )));
        }

        let body: SwapResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(e)
            } else {
                ExecutionError::rejected(format!("unreadable bridge response: {e}"))
            }
        })?;

        if !body.ok {
            return Err(ExecutionError::rejected(
                body.error.unwrap_or_else(|| "bridge refused swap".to_string()),
            ));
        }

        let price = body
            .fill_price
            .ok_or_else(|| ExecutionError::rejected("bridge reported success without a fill price"))?;

        debug!(price, signature = body.signature.as_deref().unwrap_or("-"), "swap confirmed");
        Ok(Fill {
            price,
            reference: body.signature,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> ExecutionError {
        if e.is_timeout() {
            ExecutionError::Timeout {
                after_secs: self.timeout.as_secs(),
            }
        } else {
            ExecutionError::NetworkError(e.to_string())
        }
    }
}

#[async_trait]
impl Venue for BridgeVenue {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn buy(
        &self,
        asset: &AssetSnapshot,
        spend_usd: f64,
        client_ref: Uuid,
    ) -> Result<Fill, ExecutionError> {
        self.swap(SwapRequest {
            side: Side::Buy,
            asset_id: &asset.asset_id,
            symbol: &asset.symbol,
            amount_usd: Some(spend_usd),
            quantity: None,
            slippage_bps: self.slippage_bps,
            client_ref,
        })
        .await
    }

    async fn sell(&self, position: &Position) -> Result<Fill, ExecutionError> {
        self.swap(SwapRequest {
            side: Side::Sell,
            asset_id: &position.asset_id,
            symbol: &position.symbol,
            amount_usd: None,
            quantity: Some(position.quantity),
            slippage_bps: self.slippage_bps,
            client_ref: position.id,
        })
        .await
    }
}

impl std::fmt::Debug for BridgeVenue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeVenue")
            .field("base_url", &self.base_url)
            .field("slippage_bps", &self.slippage_bps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::tests::asset;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn venue(server: &MockServer) -> BridgeVenue {
        BridgeVenue::new(server.uri(), 100, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn buy_posts_amount_and_returns_fill() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/swap"))
            .and(body_partial_json(serde_json::json!({
                "side": "buy",
                "asset_id": "a",
                "amount_usd": 10.0,
                "slippage_bps": 100
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "fill_price": 0.102,
                "signature": "5xSig"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fill = venue(&server)
            .buy(&asset("a", 0.1), 10.0, Uuid::new_v4())
            .await
            .unwrap();
        assert!((fill.price - 0.102).abs() < f64::EPSILON);
        assert_eq!(fill.reference.as_deref(), Some("5xSig"));
    }

    #[tokio::test]
    async fn sell_posts_quantity_and_position_id() {
        let server = MockServer::start().await;
        let held = Position::from_fill(Uuid::new_v4(), &asset("a", 0.1), 10.0, 0.1, Utc::now());

        Mock::given(method("POST"))
            .and(path("/swap"))
            .and(body_partial_json(serde_json::json!({
                "side": "sell",
                "client_ref": held.id,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "fill_price": 0.2
            })))
            .mount(&server)
            .await;

        let fill = venue(&server).sell(&held).await.unwrap();
        assert!((fill.price - 0.2).abs() < f64::EPSILON);
        assert_eq!(fill.reference, None);
    }

    #[tokio::test]
    async fn refused_swap_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/swap"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "slippage exceeded"
            })))
            .mount(&server)
            .await;

        let err = venue(&server)
            .buy(&asset("a", 0.1), 10.0, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::rejected("slippage exceeded"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn http_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/swap"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = venue(&server)
            .buy(&asset("a", 0.1), 10.0, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Rejected { .. }));
    }

    #[tokio::test]
    async fn slow_bridge_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/swap"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": true, "fill_price": 1.0}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let slow = BridgeVenue::new(server.uri(), 100, Duration::from_millis(200)).unwrap();
        let err = slow
            .buy(&asset("a", 0.1), 10.0, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn unreachable_bridge_is_network_error() {
        let unreachable = BridgeVenue::new("http://127.0.0.1:1", 100, Duration::from_secs(2)).unwrap();
        let err = unreachable
            .buy(&asset("a", 0.1), 10.0, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::NetworkError(_)));
        assert!(err.is_retryable());
    }
}
