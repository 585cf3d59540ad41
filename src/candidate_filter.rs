// =============================================================================
// Candidate Filter — liquidity / valuation / age gates over a market snapshot
// =============================================================================
//
// An asset is eligible iff
//   liquidity_usd >= min_liquidity_usd
//   valuation_usd <= max_valuation_usd
//   0 <= now - created_at <= max_age_seconds
// and, when the momentum gate is enabled,
//   price_change_24h_pct >= min_price_change_pct
//   volume_24h_usd / (valuation_usd / price_usd) >= min_volume_surge
//
// Missing fields fail closed. Output preserves input order and is truncated to
// `max_candidates`. Pure: no I/O, no clock reads.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AssetSnapshot;

/// Optional price-change / volume-surge screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentumGate {
    pub min_price_change_pct: f64,
    /// Ratio of 24h volume to the `valuation / price` share-count proxy.
    pub min_volume_surge: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterThresholds {
    pub min_liquidity_usd: f64,
    pub max_valuation_usd: f64,
    pub max_age_seconds: u64,
    pub max_candidates: usize,
    pub momentum: Option<MomentumGate>,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            min_liquidity_usd: 50_000.0,
            max_valuation_usd: 1_000_000.0,
            max_age_seconds: 6 * 60 * 60,
            max_candidates: 10,
            momentum: None,
        }
    }
}

/// Lazily yield the eligible assets of `snapshot`, in input order, at most
/// `thresholds.max_candidates` of them.
pub fn eligible<'a>(
    snapshot: &'a [AssetSnapshot],
    now: DateTime<Utc>,
    thresholds: &'a FilterThresholds,
) -> impl Iterator<Item = &'a AssetSnapshot> + 'a {
    snapshot
        .iter()
        .filter(move |asset| is_eligible(asset, now, thresholds))
        .take(thresholds.max_candidates)
}

/// Whether a single asset passes every enabled gate.
pub fn is_eligible(asset: &AssetSnapshot, now: DateTime<Utc>, t: &FilterThresholds) -> bool {
    let Some(liquidity) = asset.liquidity_usd else {
        return false;
    };
    let Some(valuation) = asset.valuation_usd else {
        return false;
    };
    let Some(created_at) = asset.created_at else {
        return false;
    };

    if !(liquidity >= t.min_liquidity_usd) || !(valuation <= t.max_valuation_usd) {
        return false;
    }

    // A creation time in the future gives a negative age, which `to_std`
    // refuses.
    match (now - created_at).to_std() {
        Ok(age) if age <= std::time::Duration::from_secs(t.max_age_seconds) => {}
        _ => return false,
    }

    match t.momentum {
        Some(gate) => passes_momentum(asset, valuation, &gate),
        None => true,
    }
}

fn passes_momentum(asset: &AssetSnapshot, valuation: f64, gate: &MomentumGate) -> bool {
    let (Some(change), Some(volume)) = (asset.price_change_24h_pct, asset.volume_24h_usd) else {
        return false;
    };
    if change < gate.min_price_change_pct {
        return false;
    }
    match volume_surge(volume, valuation, asset.price_usd) {
        Some(surge) => surge >= gate.min_volume_surge,
        None => false,
    }
}

/// `volume / (valuation / price)`. The denominator approximates circulating
/// supply rather than a volume baseline, so treat the ratio as a heuristic.
pub fn volume_surge(volume_usd: f64, valuation_usd: f64, price_usd: f64) -> Option<f64> {
    if price_usd <= 0.0 {
        return None;
    }
    let baseline = valuation_usd / price_usd;
    (baseline > 0.0 && baseline.is_finite()).then(|| volume_usd / baseline)
}

// ---------------------------------------------------------------------------
// Risk tiers (informational)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskTier {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "High"),
            Self::Medium => write!(f, "Medium"),
            Self::Low => write!(f, "Low"),
        }
    }
}

impl RiskTier {
    /// Coarse tier from valuation and recent volatility. An unknown valuation
    /// is treated as the riskiest case.
    pub fn classify(asset: &AssetSnapshot) -> Self {
        let valuation = asset.valuation_usd.unwrap_or(0.0);
        let swing = asset.price_change_24h_pct.unwrap_or(0.0).abs();
        if valuation < 1_000_000.0 || swing > 50.0 {
            Self::High
        } else if valuation < 3_000_000.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_750_000_000, 0).unwrap()
    }

    fn asset(id: &str, liquidity: f64, valuation: f64, age_secs: i64) -> AssetSnapshot {
        AssetSnapshot {
            asset_id: id.to_string(),
            symbol: id.to_uppercase(),
            price_usd: 0.1,
            liquidity_usd: Some(liquidity),
            valuation_usd: Some(valuation),
            created_at: Some(now() - Duration::seconds(age_secs)),
            volume_24h_usd: None,
            price_change_24h_pct: None,
        }
    }

    #[test]
    fn typical_young_liquid_asset_is_eligible() {
        let t = FilterThresholds::default();
        let a = asset("a", 60_000.0, 800_000.0, 2 * 3600);
        assert!(is_eligible(&a, now(), &t));
    }

    #[test]
    fn boundaries_are_inclusive() {
        let t = FilterThresholds::default();
        let a = asset("a", 50_000.0, 1_000_000.0, 6 * 3600);
        assert!(is_eligible(&a, now(), &t));
    }

    #[test]
    fn each_threshold_disqualifies() {
        let t = FilterThresholds::default();
        assert!(!is_eligible(&asset("thin", 49_999.0, 800_000.0, 60), now(), &t));
        assert!(!is_eligible(&asset("big", 60_000.0, 1_000_001.0, 60), now(), &t));
        assert!(!is_eligible(&asset("old", 60_000.0, 800_000.0, 6 * 3600 + 1), now(), &t));
    }

    #[test]
    fn sub_second_age_past_the_limit_disqualifies() {
        let t = FilterThresholds::default();
        let mut a = asset("a", 60_000.0, 800_000.0, 0);
        a.created_at = Some(now() - Duration::seconds(6 * 3600) - Duration::milliseconds(900));
        assert!(!is_eligible(&a, now(), &t));

        a.created_at = Some(now() - Duration::seconds(6 * 3600));
        assert!(is_eligible(&a, now(), &t));
    }

    #[test]
    fn missing_fields_fail_closed() {
        let t = FilterThresholds::default();

        let mut a = asset("a", 60_000.0, 800_000.0, 60);
        a.liquidity_usd = None;
        assert!(!is_eligible(&a, now(), &t));

        let mut b = asset("b", 60_000.0, 800_000.0, 60);
        b.valuation_usd = None;
        assert!(!is_eligible(&b, now(), &t));

        let mut c = asset("c", 60_000.0, 800_000.0, 60);
        c.created_at = None;
        assert!(!is_eligible(&c, now(), &t));
    }

    #[test]
    fn future_creation_time_is_disqualifying() {
        let t = FilterThresholds::default();
        let a = asset("future", 60_000.0, 800_000.0, -120);
        assert!(!is_eligible(&a, now(), &t));
    }

    #[test]
    fn output_is_ordered_subset_truncated_to_max() {
        let snapshot = vec![
            asset("a", 60_000.0, 500_000.0, 60),
            asset("thin", 10.0, 500_000.0, 60),
            asset("b", 70_000.0, 400_000.0, 60),
            asset("c", 80_000.0, 300_000.0, 60),
            asset("d", 90_000.0, 200_000.0, 60),
        ];
        let t = FilterThresholds {
            max_candidates: 3,
            ..FilterThresholds::default()
        };

        let ids: Vec<&str> = eligible(&snapshot, now(), &t)
            .map(|a| a.asset_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(eligible(&snapshot, now(), &t).all(|a| is_eligible(a, now(), &t)));
    }

    #[test]
    fn momentum_gate_requires_change_and_surge() {
        let gate = MomentumGate {
            min_price_change_pct: 5.0,
            min_volume_surge: 1.5,
        };
        let t = FilterThresholds {
            momentum: Some(gate),
            ..FilterThresholds::default()
        };

        // valuation 800k at 0.1 => 8M share proxy; 13M volume => surge 1.625.
        let mut hot = asset("hot", 60_000.0, 800_000.0, 60);
        hot.price_change_24h_pct = Some(8.0);
        hot.volume_24h_usd = Some(13_000_000.0);
        assert!(is_eligible(&hot, now(), &t));

        let mut flat = hot.clone();
        flat.price_change_24h_pct = Some(1.0);
        assert!(!is_eligible(&flat, now(), &t));

        let mut quiet = hot.clone();
        quiet.volume_24h_usd = Some(1_000_000.0);
        assert!(!is_eligible(&quiet, now(), &t));

        let mut unknown = hot.clone();
        unknown.volume_24h_usd = None;
        assert!(!is_eligible(&unknown, now(), &t));
    }

    #[test]
    fn volume_surge_rejects_degenerate_inputs() {
        assert_eq!(volume_surge(100.0, 0.0, 1.0), None);
        assert_eq!(volume_surge(100.0, 1000.0, 0.0), None);
        assert_eq!(volume_surge(100.0, 1000.0, 1.0), Some(0.1));
    }

    #[test]
    fn risk_tiers() {
        let mut a = asset("a", 60_000.0, 800_000.0, 60);
        assert_eq!(RiskTier::classify(&a), RiskTier::High);

        a.valuation_usd = Some(2_000_000.0);
        a.price_change_24h_pct = Some(-10.0);
        assert_eq!(RiskTier::classify(&a), RiskTier::Medium);

        a.price_change_24h_pct = Some(-75.0);
        assert_eq!(RiskTier::classify(&a), RiskTier::High);

        a.valuation_usd = Some(4_000_000.0);
        a.price_change_24h_pct = Some(3.0);
        assert_eq!(RiskTier::classify(&a), RiskTier::Low);
    }
}
