// =============================================================================
// Position Sizer — fixed-spend allocations bounded by slots and budget
// =============================================================================
//
// count = min(max_concurrent - open, floor(budget / spend), candidates)
//
// Running out of budget is not an error to the caller: the plan is simply
// empty and `limit` says why.
// =============================================================================

use tracing::{debug, warn};

use crate::error::InsufficientBudget;
use crate::types::AssetSnapshot;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingRequest {
    pub budget_usd: f64,
    pub spend_per_asset_usd: f64,
    pub open_positions: usize,
    pub max_concurrent_positions: usize,
}

/// Which constraint capped the plan.
#[derive(Debug, Clone, PartialEq)]
pub enum SizingLimit {
    /// Every candidate got an allocation.
    Candidates,
    /// No more concurrent-position slots.
    Slots,
    /// Budget covers fewer assets than there are candidates.
    Budget,
    /// Spend exceeds what is left in the budget.
    InsufficientBudget(InsufficientBudget),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation<'a> {
    pub asset: &'a AssetSnapshot,
    pub spend_usd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizingPlan<'a> {
    pub allocations: Vec<Allocation<'a>>,
    pub limit: SizingLimit,
}

impl SizingPlan<'_> {
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn total_spend(&self) -> f64 {
        self.allocations.iter().map(|a| a.spend_usd).sum()
    }
}

/// Number of whole spends the budget covers: the largest `n` with
/// `n * spend <= budget`.
fn affordable(budget_usd: f64, spend_usd: f64) -> usize {
    if spend_usd <= 0.0 || budget_usd <= 0.0 {
        return 0;
    }
    let mut count = (budget_usd / spend_usd).floor();
    // The division can round across a whole number in either direction.
    if count * spend_usd > budget_usd {
        count -= 1.0;
    } else if (count + 1.0) * spend_usd <= budget_usd {
        count += 1.0;
    }
    count as usize
}

/// Allocate `spend_per_asset_usd` to the leading candidates, in order.
pub fn allocate<'a, I>(candidates: I, request: &SizingRequest) -> SizingPlan<'a>
where
    I: IntoIterator<Item = &'a AssetSnapshot>,
{
    let candidates: Vec<&'a AssetSnapshot> = candidates.into_iter().collect();
    let spend = request.spend_per_asset_usd;

    if !(spend > 0.0) {
        warn!(spend, "non-positive spend per asset, no allocations");
        return SizingPlan {
            allocations: Vec::new(),
            limit: SizingLimit::Budget,
        };
    }

    let slots = request
        .max_concurrent_positions
        .saturating_sub(request.open_positions);
    let budget_slots = affordable(request.budget_usd, spend);

    if budget_slots == 0 && slots > 0 && !candidates.is_empty() {
        let shortfall = InsufficientBudget {
            required: spend,
            available: request.budget_usd.max(0.0),
        };
        warn!(error = %shortfall, candidates = candidates.len(), "sizing skipped");
        return SizingPlan {
            allocations: Vec::new(),
            limit: SizingLimit::InsufficientBudget(shortfall),
        };
    }

    let count = slots.min(budget_slots).min(candidates.len());
    let limit = if count == candidates.len() {
        SizingLimit::Candidates
    } else if count == slots {
        SizingLimit::Slots
    } else {
        SizingLimit::Budget
    };

    let allocations: Vec<Allocation<'a>> = candidates
        .into_iter()
        .take(count)
        .map(|asset| Allocation {
            asset,
            spend_usd: spend,
        })
        .collect();

    debug!(
        count,
        slots,
        budget_slots,
        budget = request.budget_usd,
        limit = ?limit,
        "sizing plan built"
    );

    SizingPlan { allocations, limit }
}
