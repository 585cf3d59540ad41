// =============================================================================
// Runtime Configuration — agent thresholds with env overrides and atomic save
// =============================================================================
//
// Every tunable the agent reads lives here. All fields carry a serde default
// so that an older or partial config file still loads, and `PULSE_<FIELD>`
// environment variables override whatever the file says.
//
// Persistence uses an atomic tmp + rename so a crash mid-write never leaves a
// truncated file behind.
// =============================================================================

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::candidate_filter::{FilterThresholds, MomentumGate};
use crate::exit::evaluator::ExitThresholds;
use crate::types::AccountMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_chain() -> String {
    "solana".to_string()
}

fn default_market_data_url() -> String {
    "https://api.dexscreener.com".to_string()
}

fn default_min_liquidity_usd() -> f64 {
    50_000.0
}

fn default_max_valuation_usd() -> f64 {
    1_000_000.0
}

fn default_max_age_seconds() -> u64 {
    6 * 60 * 60
}

fn default_max_candidates() -> usize {
    10
}

fn default_min_price_change_pct() -> f64 {
    5.0
}

fn default_min_volume_surge() -> f64 {
    1.5
}

fn default_budget_usd() -> f64 {
    100.0
}

fn default_spend_per_asset_usd() -> f64 {
    10.0
}

fn default_max_concurrent_positions() -> usize {
    10
}

fn default_stop_loss_fraction() -> f64 {
    0.30
}

fn default_take_profit_multiplier() -> f64 {
    2.0
}

fn default_poll_interval_seconds() -> u64 {
    600
}

fn default_execution_timeout_seconds() -> u64 {
    30
}

fn default_market_data_timeout_seconds() -> u64 {
    15
}

fn default_max_close_retries() -> u32 {
    2
}

fn default_slippage_bps() -> u32 {
    100
}

fn default_outcome_dir() -> String {
    "trade_logs".to_string()
}

fn default_positions_file() -> String {
    "open_positions.json".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Operational mode ---------------------------------------------------

    /// Demo fills against the local price book, Live sends swaps to the bridge.
    #[serde(default)]
    pub account_mode: AccountMode,

    /// Chain slug used in market-data URLs.
    #[serde(default = "default_chain")]
    pub chain: String,

    #[serde(default = "default_market_data_url")]
    pub market_data_url: String,

    /// Base URL of the swap-execution bridge. Required in Live mode.
    #[serde(default)]
    pub bridge_url: Option<String>,

    // --- Discovery ----------------------------------------------------------

    #[serde(default = "default_min_liquidity_usd")]
    pub min_liquidity_usd: f64,

    /// Upper bound on fully-diluted valuation.
    #[serde(default = "default_max_valuation_usd")]
    pub max_valuation_usd: f64,

    /// Maximum pair age in seconds.
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,

    /// Maximum eligible candidates considered per cycle.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Extra price-change / volume-surge screen. Off by default.
    #[serde(default)]
    pub enable_momentum_gate: bool,

    #[serde(default = "default_min_price_change_pct")]
    pub min_price_change_pct: f64,

    #[serde(default = "default_min_volume_surge")]
    pub min_volume_surge: f64,

    // --- Sizing -------------------------------------------------------------

    /// Session budget in USD. Restored positions are deducted at startup.
    #[serde(default = "default_budget_usd")]
    pub budget_usd: f64,

    #[serde(default = "default_spend_per_asset_usd")]
    pub spend_per_asset_usd: f64,

    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,

    // --- Exits --------------------------------------------------------------

    /// Fraction of spend that may be lost before stopping out (0.30 = 30 %).
    #[serde(default = "default_stop_loss_fraction")]
    pub stop_loss_fraction: f64,

    /// Multiple of spend at which profit is taken.
    #[serde(default = "default_take_profit_multiplier")]
    pub take_profit_multiplier: f64,

    // --- Timing -------------------------------------------------------------

    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// Per-call venue timeout. Must be shorter than the poll interval.
    #[serde(default = "default_execution_timeout_seconds")]
    pub execution_timeout_seconds: u64,

    #[serde(default = "default_market_data_timeout_seconds")]
    pub market_data_timeout_seconds: u64,

    /// Extra attempts for a close that failed with a transient error.
    #[serde(default = "default_max_close_retries")]
    pub max_close_retries: u32,

    /// Maximum slippage forwarded to the bridge, in basis points.
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,

    // --- Files --------------------------------------------------------------

    /// Directory for profit.txt / loss.txt / trades.jsonl.
    #[serde(default = "default_outcome_dir")]
    pub outcome_dir: String,

    /// Where open positions are persisted across restarts.
    #[serde(default = "default_positions_file")]
    pub positions_file: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            account_mode: AccountMode::Demo,
            chain: default_chain(),
            market_data_url: default_market_data_url(),
            bridge_url: None,
            min_liquidity_usd: default_min_liquidity_usd(),
            max_valuation_usd: default_max_valuation_usd(),
            max_age_seconds: default_max_age_seconds(),
            max_candidates: default_max_candidates(),
            enable_momentum_gate: false,
            min_price_change_pct: default_min_price_change_pct(),
            min_volume_surge: default_min_volume_surge(),
            budget_usd: default_budget_usd(),
            spend_per_asset_usd: default_spend_per_asset_usd(),
            max_concurrent_positions: default_max_concurrent_positions(),
            stop_loss_fraction: default_stop_loss_fraction(),
            take_profit_multiplier: default_take_profit_multiplier(),
            poll_interval_seconds: default_poll_interval_seconds(),
            execution_timeout_seconds: default_execution_timeout_seconds(),
            market_data_timeout_seconds: default_market_data_timeout_seconds(),
            max_close_retries: default_max_close_retries(),
            slippage_bps: default_slippage_bps(),
            outcome_dir: default_outcome_dir(),
            positions_file: default_positions_file(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            account_mode = %config.account_mode,
            chain = %config.chain,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// The config to run with: a copy of `self` with `PULSE_<FIELD>`
    /// overrides from the process environment applied. `self` keeps the file
    /// values and is the one to save back.
    pub fn with_env_overrides(&self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides<F>(&self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut effective = self.clone();
        effective.apply_overrides(lookup)?;
        Ok(effective)
    }

    /// Apply overrides from an arbitrary key lookup. Unset keys leave the
    /// field untouched; a value that does not parse is an error.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("PULSE_ACCOUNT_MODE") {
            self.account_mode = match mode.trim().to_lowercase().as_str() {
                "demo" => AccountMode::Demo,
                "live" => AccountMode::Live,
                other => bail!("PULSE_ACCOUNT_MODE must be 'demo' or 'live', got '{other}'"),
            };
        }
        if let Some(v) = lookup("PULSE_CHAIN") {
            self.chain = v;
        }
        if let Some(v) = lookup("PULSE_MARKET_DATA_URL") {
            self.market_data_url = v;
        }
        if let Some(v) = lookup("PULSE_BRIDGE_URL") {
            self.bridge_url = Some(v);
        }
        if let Some(v) = lookup("PULSE_OUTCOME_DIR") {
            self.outcome_dir = v;
        }
        if let Some(v) = lookup("PULSE_POSITIONS_FILE") {
            self.positions_file = v;
        }

        override_parsed(&lookup, "PULSE_MIN_LIQUIDITY_USD", &mut self.min_liquidity_usd)?;
        override_parsed(&lookup, "PULSE_MAX_VALUATION_USD", &mut self.max_valuation_usd)?;
        override_parsed(&lookup, "PULSE_MAX_AGE_SECONDS", &mut self.max_age_seconds)?;
        override_parsed(&lookup, "PULSE_MAX_CANDIDATES", &mut self.max_candidates)?;
        override_parsed(&lookup, "PULSE_ENABLE_MOMENTUM_GATE", &mut self.enable_momentum_gate)?;
        override_parsed(&lookup, "PULSE_MIN_PRICE_CHANGE_PCT", &mut self.min_price_change_pct)?;
        override_parsed(&lookup, "PULSE_MIN_VOLUME_SURGE", &mut self.min_volume_surge)?;
        override_parsed(&lookup, "PULSE_BUDGET_USD", &mut self.budget_usd)?;
        override_parsed(&lookup, "PULSE_SPEND_PER_ASSET_USD", &mut self.spend_per_asset_usd)?;
        override_parsed(&lookup, "PULSE_MAX_CONCURRENT_POSITIONS", &mut self.max_concurrent_positions)?;
        override_parsed(&lookup, "PULSE_STOP_LOSS_FRACTION", &mut self.stop_loss_fraction)?;
        override_parsed(&lookup, "PULSE_TAKE_PROFIT_MULTIPLIER", &mut self.take_profit_multiplier)?;
        override_parsed(&lookup, "PULSE_POLL_INTERVAL_SECONDS", &mut self.poll_interval_seconds)?;
        override_parsed(&lookup, "PULSE_EXECUTION_TIMEOUT_SECONDS", &mut self.execution_timeout_seconds)?;
        override_parsed(&lookup, "PULSE_MARKET_DATA_TIMEOUT_SECONDS", &mut self.market_data_timeout_seconds)?;
        override_parsed(&lookup, "PULSE_MAX_CLOSE_RETRIES", &mut self.max_close_retries)?;
        override_parsed(&lookup, "PULSE_SLIPPAGE_BPS", &mut self.slippage_bps)?;

        Ok(())
    }

    /// Reject configurations the agent cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        if !(self.stop_loss_fraction > 0.0 && self.stop_loss_fraction < 1.0) {
            bail!(
                "stop_loss_fraction must be in (0, 1), got {}",
                self.stop_loss_fraction
            );
        }
        if self.take_profit_multiplier <= 1.0 {
            bail!(
                "take_profit_multiplier must be > 1, got {}",
                self.take_profit_multiplier
            );
        }
        if self.spend_per_asset_usd <= 0.0 {
            bail!("spend_per_asset_usd must be > 0, got {}", self.spend_per_asset_usd);
        }
        if self.budget_usd < 0.0 {
            bail!("budget_usd must be >= 0, got {}", self.budget_usd);
        }
        if self.max_candidates == 0 {
            bail!("max_candidates must be at least 1");
        }
        if self.poll_interval_seconds == 0 {
            bail!("poll_interval_seconds must be at least 1");
        }
        if self.execution_timeout_seconds >= self.poll_interval_seconds {
            bail!(
                "execution_timeout_seconds ({}) must be shorter than poll_interval_seconds ({})",
                self.execution_timeout_seconds,
                self.poll_interval_seconds
            );
        }
        if self.account_mode == AccountMode::Live && self.bridge_url.is_none() {
            bail!("Live mode requires bridge_url (PULSE_BRIDGE_URL)");
        }
        Ok(())
    }

    // --- Derived views ------------------------------------------------------

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_seconds)
    }

    pub fn market_data_timeout(&self) -> Duration {
        Duration::from_secs(self.market_data_timeout_seconds)
    }

    pub fn filter_thresholds(&self) -> FilterThresholds {
        FilterThresholds {
            min_liquidity_usd: self.min_liquidity_usd,
            max_valuation_usd: self.max_valuation_usd,
            max_age_seconds: self.max_age_seconds,
            max_candidates: self.max_candidates,
            momentum: self.enable_momentum_gate.then(|| MomentumGate {
                min_price_change_pct: self.min_price_change_pct,
                min_volume_surge: self.min_volume_surge,
            }),
        }
    }

    pub fn exit_thresholds(&self) -> ExitThresholds {
        ExitThresholds {
            stop_loss_fraction: self.stop_loss_fraction,
            take_profit_multiplier: self.take_profit_multiplier,
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={raw:?} is invalid: {e}"))?;
    }
    Ok(())
}
