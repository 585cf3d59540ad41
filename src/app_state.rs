// =============================================================================
// Central Application State — pulse agent
// =============================================================================
//
// Ties together the handles every task needs: config, ledger, price book,
// outcome recorder, the internal budget, the scheduler state and a short log
// of recent failures.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for every mutable field; guards never cross an await.
//   - Arc wrappers for components that manage their own interior mutability.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::ledger::PositionLedger;
use crate::market_data::PriceBook;
use crate::outcome::{OutcomeRecorder, SessionTally};
use crate::runtime_config::RuntimeConfig;
use crate::types::SchedulerState;

/// A reported per-item failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Asset or position id the failure concerns.
    pub subject: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

const MAX_RECENT_ERRORS: usize = 50;

pub struct AppState {
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    pub ledger: Arc<PositionLedger>,
    pub price_book: Arc<PriceBook>,
    pub recorder: Arc<OutcomeRecorder>,

    /// USD still available for new positions.
    pub budget_usd: RwLock<f64>,
    pub scheduler_state: RwLock<SchedulerState>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    pub start_time: std::time::Instant,
}

impl AppState {
    /// Available budget starts at the configured budget minus whatever the
    /// restored positions already committed.
    pub fn new(config: RuntimeConfig, ledger: PositionLedger, recorder: OutcomeRecorder) -> Self {
        let budget = config.budget_usd - ledger.committed_usd();
        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            ledger: Arc::new(ledger),
            price_book: Arc::new(PriceBook::new()),
            recorder: Arc::new(recorder),
            budget_usd: RwLock::new(budget),
            scheduler_state: RwLock::new(SchedulerState::Idle),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Budget ──────────────────────────────────────────────────────────

    pub fn budget(&self) -> f64 {
        *self.budget_usd.read()
    }

    /// Deduct the spend of a filled open.
    pub fn debit(&self, amount_usd: f64) -> f64 {
        let mut budget = self.budget_usd.write();
        *budget -= amount_usd;
        debug!(amount_usd, remaining = *budget, "budget debited");
        *budget
    }

    /// Credit the realized value of a filled close.
    pub fn credit(&self, amount_usd: f64) -> f64 {
        let mut budget = self.budget_usd.write();
        *budget += amount_usd;
        debug!(amount_usd, remaining = *budget, "budget credited");
        *budget
    }

    // ── Scheduler State ─────────────────────────────────────────────────

    pub fn scheduler_state(&self) -> SchedulerState {
        *self.scheduler_state.read()
    }

    /// `Stopped` is terminal; later transitions are ignored.
    pub fn set_scheduler_state(&self, next: SchedulerState) {
        let mut state = self.scheduler_state.write();
        if *state == SchedulerState::Stopped || *state == next {
            return;
        }
        let from = *state;
        debug!(from = %from, to = %next, "scheduler state change");
        *state = next;
        drop(state);
        self.increment_version();
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record a failure. Oldest entries are evicted past
    /// [`MAX_RECENT_ERRORS`].
    pub fn push_error(&self, message: String, subject: Option<String>) {
        let record = ErrorRecord {
            message,
            subject,
            at: Utc::now().to_rfc3339(),
        };
        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);
        self.increment_version();
    }

    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.recent_errors.read().clone()
    }

    pub fn tally(&self) -> SessionTally {
        self.recorder.tally()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("state_version", &self.current_state_version())
            .field("scheduler_state", &self.scheduler_state())
            .field("open_positions", &self.ledger.count())
            .field("budget_usd", &self.budget())
            .field("recent_errors", &self.recent_errors.read().len())
            .finish()
    }
}
