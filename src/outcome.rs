// =============================================================================
// Outcome Recorder — realized PnL for every closed position
// =============================================================================
//
//   pnl      = realized_usd - spent_usd        (exact, no rounding)
//   profit  <=> pnl > 0                         (a flat trade counts as a loss)
//   hold     = closed_at - opened_at
//
// Settlement is pure. Writing goes through an `OutcomeSink`; a failed write is
// returned to the caller and never swallowed.
// =============================================================================

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::ledger::Position;
use crate::types::TriggerKind;

/// Immutable record of one closed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub position_id: Uuid,
    pub asset_id: String,
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub spent_usd: f64,
    pub realized_usd: f64,
    pub pnl_usd: f64,
    /// Seconds between open and close. Negative only if the clock stepped
    /// backwards while the position was held.
    pub hold_secs: i64,
    pub trigger: TriggerKind,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl TradeOutcome {
    pub fn is_profit(&self) -> bool {
        self.pnl_usd > 0.0
    }

    pub fn hold_minutes(&self) -> i64 {
        self.hold_secs / 60
    }

    /// `[ts] SYM: +$x.xx (Duration: N min)`, or `-$x.xx` for a loss.
    pub fn summary_line(&self) -> String {
        let sign = if self.is_profit() { '+' } else { '-' };
        format!(
            "[{}] {}: {}${:.2} (Duration: {} min)",
            self.closed_at.format("%Y-%m-%d %H:%M:%S"),
            self.symbol,
            sign,
            self.pnl_usd.abs(),
            self.hold_minutes()
        )
    }
}

/// Build the outcome of selling all of `position` at `exit_price`.
pub fn settle(
    position: &Position,
    exit_price: f64,
    closed_at: DateTime<Utc>,
    trigger: TriggerKind,
) -> TradeOutcome {
    let realized_usd = position.value_at(exit_price);
    TradeOutcome {
        position_id: position.id,
        asset_id: position.asset_id.clone(),
        symbol: position.symbol.clone(),
        quantity: position.quantity,
        entry_price: position.entry_price,
        exit_price,
        spent_usd: position.spent_usd,
        realized_usd,
        pnl_usd: realized_usd - position.spent_usd,
        hold_secs: (closed_at - position.opened_at).num_seconds(),
        trigger,
        opened_at: position.opened_at,
        closed_at,
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Append-only destination for outcomes. Durable once `append` returns Ok.
pub trait OutcomeSink: Send + Sync {
    fn append(&self, outcome: &TradeOutcome) -> Result<()>;
}

/// Writes `profit.txt` / `loss.txt` summary lines and a `trades.jsonl`
/// journal under one directory.
#[derive(Debug, Clone)]
pub struct FileOutcomeSink {
    dir: PathBuf,
}

impl FileOutcomeSink {
    pub const PROFIT_FILE: &'static str = "profit.txt";
    pub const LOSS_FILE: &'static str = "loss.txt";
    pub const JOURNAL_FILE: &'static str = "trades.jsonl";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn append_line(&self, file_name: &str, line: &str) -> Result<()> {
        let path = self.dir.join(file_name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        writeln!(file, "{line}").with_context(|| format!("failed to append to {}", path.display()))?;
        file.sync_data()
            .with_context(|| format!("failed to sync {}", path.display()))
    }
}

impl OutcomeSink for FileOutcomeSink {
    fn append(&self, outcome: &TradeOutcome) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let summary = if outcome.is_profit() {
            Self::PROFIT_FILE
        } else {
            Self::LOSS_FILE
        };
        self.append_line(summary, &outcome.summary_line())?;

        let json = serde_json::to_string(outcome).context("failed to serialise trade outcome")?;
        self.append_line(Self::JOURNAL_FILE, &json)
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Running totals for this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SessionTally {
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub realized_pnl_usd: f64,
}

impl SessionTally {
    fn add(&mut self, outcome: &TradeOutcome) {
        self.trades += 1;
        if outcome.is_profit() {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.realized_pnl_usd += outcome.pnl_usd;
    }

    pub fn win_rate(&self) -> Option<f64> {
        (self.trades > 0).then(|| self.wins as f64 / self.trades as f64)
    }
}

pub struct OutcomeRecorder {
    sink: Box<dyn OutcomeSink>,
    tally: RwLock<SessionTally>,
}

impl OutcomeRecorder {
    pub fn new(sink: Box<dyn OutcomeSink>) -> Self {
        Self {
            sink,
            tally: RwLock::new(SessionTally::default()),
        }
    }

    /// Count the outcome and hand it to the sink. The tally reflects every
    /// settled trade even when the write fails.
    pub fn record(&self, outcome: &TradeOutcome) -> Result<()> {
        self.tally.write().add(outcome);

        info!(
            id = %outcome.position_id,
            symbol = %outcome.symbol,
            trigger = %outcome.trigger,
            spent_usd = outcome.spent_usd,
            realized_usd = format!("{:.4}", outcome.realized_usd),
            pnl_usd = format!("{:+.4}", outcome.pnl_usd),
            hold_min = outcome.hold_minutes(),
            "trade closed"
        );

        self.sink
            .append(outcome)
            .with_context(|| format!("outcome for position {} not persisted", outcome.position_id))
    }

    pub fn tally(&self) -> SessionTally {
        *self.tally.read()
    }
}

impl std::fmt::Debug for OutcomeRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeRecorder")
            .field("tally", &self.tally())
            .finish()
    }
}
