// =============================================================================
// Pulse Agent — Main Entry Point
// =============================================================================
//
// Starts in Demo (paper venue) unless the config asks for Live. Open positions
// are restored from disk at startup and written back on shutdown.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod app_state;
mod candidate_filter;
mod error;
mod execution;
mod exit;
mod ledger;
mod market_data;
mod outcome;
mod runtime_config;
mod scheduler;
mod sizer;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::execution::{BridgeVenue, ExecutionGateway, PaperVenue, Venue};
use crate::ledger::PositionLedger;
use crate::market_data::DexScreenerClient;
use crate::outcome::{FileOutcomeSink, OutcomeRecorder};
use crate::runtime_config::RuntimeConfig;
use crate::scheduler::Scheduler;
use crate::types::AccountMode;

const DEFAULT_CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Pulse Agent — Starting Up                         ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("PULSE_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let file_config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    let config = file_config
        .with_env_overrides()
        .context("invalid PULSE_* environment override")?;
    config.validate().context("invalid runtime config")?;

    info!(
        account_mode = %config.account_mode,
        chain = %config.chain,
        budget_usd = config.budget_usd,
        spend_per_asset_usd = config.spend_per_asset_usd,
        max_concurrent_positions = config.max_concurrent_positions,
        poll_interval_seconds = config.poll_interval_seconds,
        "Agent configured"
    );

    // ── 2. Restore ledger, build shared state ────────────────────────────
    let restored = PositionLedger::load_positions(&config.positions_file)?;
    let ledger = PositionLedger::from_positions(restored)
        .context("restored positions are inconsistent")?;

    let recorder = OutcomeRecorder::new(Box::new(FileOutcomeSink::new(&config.outcome_dir)));
    let state = Arc::new(AppState::new(config.clone(), ledger, recorder));

    info!(
        open_positions = state.ledger.count(),
        available_budget_usd = state.budget(),
        "Ledger ready"
    );

    // ── 3. Collaborators ─────────────────────────────────────────────────
    let market = Arc::new(DexScreenerClient::new(
        &config.market_data_url,
        &config.chain,
        config.market_data_timeout(),
    )?);

    let venue: Arc<dyn Venue> = match config.account_mode {
        AccountMode::Demo => Arc::new(PaperVenue::new(state.price_book.clone())),
        AccountMode::Live => {
            let url = config
                .bridge_url
                .clone()
                .context("bridge_url is required in Live mode")?;
            Arc::new(BridgeVenue::new(
                url,
                config.slippage_bps,
                config.execution_timeout(),
            )?)
        }
    };
    let gateway = ExecutionGateway::new(venue, config.execution_timeout());

    // ── 4. Scheduler ─────────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler = Scheduler::new(state.clone(), market, gateway);
    let mut task = tokio::spawn(async move { scheduler.run(stop_rx).await });

    info!("Scheduler running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    let joined = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for Ctrl+C, stopping");
            }
            warn!("Shutdown signal received — finishing current cycle");
            let _ = stop_tx.send(true);
            (&mut task).await
        }
        joined = &mut task => joined,
    };

    if let Err(e) = state.ledger.save(&config.positions_file) {
        error!(error = %e, "Failed to persist open positions on shutdown");
    }
    if let Err(e) = file_config.save(&config_path) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    let tally = state.tally();
    info!(
        trades = tally.trades,
        wins = tally.wins,
        losses = tally.losses,
        win_rate = tally
            .win_rate()
            .map(|r| format!("{:.0}%", r * 100.0))
            .unwrap_or_else(|| "-".to_string()),
        realized_pnl_usd = format!("{:+.2}", tally.realized_pnl_usd),
        open_positions = state.ledger.count(),
        remaining_budget_usd = format!("{:.2}", state.budget()),
        errors_logged = state.recent_errors().len(),
        uptime_secs = state.uptime_secs(),
        "Session summary"
    );

    match joined {
        Ok(Ok(())) => {
            info!("Pulse Agent shut down complete.");
            Ok(())
        }
        Ok(Err(violation)) => Err(anyhow::Error::new(violation).context("scheduler halted")),
        Err(e) => Err(anyhow::Error::new(e).context("scheduler task failed")),
    }
}
