// =============================================================================
// Position Ledger — the in-memory set of open positions
// =============================================================================
//
// Mutated only by `insert` (after a filled open) and `remove` (after a filled
// close). Readers take `snapshot()`, a cloned Vec in insertion order, so that
// evaluation never iterates the live collection while it is being mutated.
//
// Thread-safety: a single `parking_lot::RwLock`; writers are serialised and no
// guard ever escapes a method, so nothing is held across an await.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::InvariantViolation;
use crate::types::AssetSnapshot;

// ---------------------------------------------------------------------------
// Position model
// ---------------------------------------------------------------------------

/// One open allocation into a single asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub asset_id: String,
    pub symbol: String,
    /// Fill price of the opening swap, > 0.
    pub entry_price: f64,
    /// Tokens held, > 0. `quantity * entry_price == spent_usd` at open.
    pub quantity: f64,
    pub spent_usd: f64,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Build a position from a filled buy. The caller guarantees
    /// `fill_price > 0` and `spent_usd > 0`; `id` is the identity the venue
    /// saw with the order.
    pub fn from_fill(
        id: Uuid,
        asset: &AssetSnapshot,
        spent_usd: f64,
        fill_price: f64,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            asset_id: asset.asset_id.clone(),
            symbol: asset.symbol.clone(),
            entry_price: fill_price,
            quantity: spent_usd / fill_price,
            spent_usd,
            opened_at,
        }
    }

    /// Mark-to-market value at `price`.
    pub fn value_at(&self, price: f64) -> f64 {
        price * self.quantity
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct PositionLedger {
    open: RwLock<Vec<Position>>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(Vec::new()),
        }
    }

    /// Build a ledger from previously persisted positions. Duplicate ids are
    /// an invariant violation, exactly as for `insert`.
    pub fn from_positions(positions: Vec<Position>) -> Result<Self, InvariantViolation> {
        let ledger = Self::new();
        for position in positions {
            ledger.insert(position)?;
        }
        Ok(ledger)
    }

    /// Add a newly opened position.
    pub fn insert(&self, position: Position) -> Result<(), InvariantViolation> {
        let mut open = self.open.write();
        if open.iter().any(|p| p.id == position.id) {
            return Err(InvariantViolation::DuplicatePosition(position.id));
        }

        info!(
            id = %position.id,
            symbol = %position.symbol,
            asset_id = %position.asset_id,
            entry_price = position.entry_price,
            quantity = position.quantity,
            spent_usd = position.spent_usd,
            "position opened"
        );

        open.push(position);
        Ok(())
    }

    /// Remove a position by id, returning it if it was present.
    pub fn remove(&self, id: Uuid) -> Option<Position> {
        let mut open = self.open.write();
        let idx = open.iter().position(|p| p.id == id)?;
        Some(open.remove(idx))
    }

    /// Copy of all open positions in insertion order.
    pub fn snapshot(&self) -> Vec<Position> {
        self.open.read().clone()
    }

    pub fn count(&self) -> usize {
        self.open.read().len()
    }

    pub fn holds_asset(&self, asset_id: &str) -> bool {
        self.open.read().iter().any(|p| p.asset_id == asset_id)
    }

    /// Total USD committed to open positions.
    pub fn committed_usd(&self) -> f64 {
        self.open.read().iter().map(|p| p.spent_usd).sum()
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Write open positions to `path` (tmp + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let positions = self.snapshot();

        let content = serde_json::to_string_pretty(&positions)
            .context("failed to serialise open positions")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp positions to {}", path.display()))?;

        info!(path = %path.display(), count = positions.len(), "open positions saved");
        Ok(())
    }

    /// Read positions persisted by `save`. A missing file is an empty ledger.
    pub fn load_positions(path: impl AsRef<Path>) -> Result<Vec<Position>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let positions: Vec<Position> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        if !positions.is_empty() {
            warn!(path = %path.display(), count = positions.len(), "restoring open positions");
        }
        Ok(positions)
    }
}

impl Default for PositionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PositionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionLedger")
            .field("open_positions", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: &str, price: f64) -> AssetSnapshot {
        AssetSnapshot {
            asset_id: id.to_string(),
            symbol: id.to_uppercase(),
            price_usd: price,
            liquidity_usd: None,
            valuation_usd: None,
            created_at: None,
            volume_24h_usd: None,
            price_change_24h_pct: None,
        }
    }

    fn position(id: &str) -> Position {
        Position::from_fill(Uuid::new_v4(), &asset(id, 0.1), 10.0, 0.1, Utc::now())
    }

    #[test]
    fn from_fill_sizes_quantity_from_spend() {
        let p = position("a");
        assert!((p.quantity - 100.0).abs() < 1e-9);
        assert!((p.quantity * p.entry_price - p.spent_usd).abs() < 1e-9);
        assert!((p.value_at(0.065) - 6.5).abs() < 1e-9);
    }

    #[test]
    fn duplicate_id_is_an_invariant_violation() {
        let ledger = PositionLedger::new();
        let p = position("a");
        ledger.insert(p.clone()).unwrap();
        assert_eq!(
            ledger.insert(p.clone()),
            Err(InvariantViolation::DuplicatePosition(p.id))
        );
        assert_eq!(ledger.count(), 1);
    }

    #[test]
    fn snapshot_is_insertion_ordered_and_detached() {
        let ledger = PositionLedger::new();
        let (a, b, c) = (position("a"), position("b"), position("c"));
        ledger.insert(a.clone()).unwrap();
        ledger.insert(b.clone()).unwrap();

        let snap = ledger.snapshot();
        ledger.insert(c).unwrap();
        ledger.remove(a.id);

        let ids: Vec<Uuid> = snap.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert_eq!(ledger.count(), 2);
    }

    #[test]
    fn remove_unknown_is_none() {
        let ledger = PositionLedger::new();
        assert!(ledger.remove(Uuid::new_v4()).is_none());
    }

    #[test]
    fn holds_asset_and_committed() {
        let ledger = PositionLedger::new();
        ledger.insert(position("a")).unwrap();
        ledger.insert(position("b")).unwrap();
        assert!(ledger.holds_asset("a"));
        assert!(!ledger.holds_asset("z"));
        assert!((ledger.committed_usd() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn save_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("open_positions.json");

        let ledger = PositionLedger::new();
        let p = position("a");
        ledger.insert(p.clone()).unwrap();
        ledger.save(&path).unwrap();

        let restored =
            PositionLedger::from_positions(PositionLedger::load_positions(&path).unwrap()).unwrap();
        assert_eq!(restored.snapshot(), vec![p]);
    }

    #[test]
    fn missing_positions_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let positions = PositionLedger::load_positions(dir.path().join("none.json")).unwrap();
        assert!(positions.is_empty());
    }

    #[test]
    fn restoring_duplicates_fails() {
        let p = position("a");
        assert!(PositionLedger::from_positions(vec![p.clone(), p]).is_err());
    }
}
