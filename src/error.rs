// =============================================================================
// Error taxonomy
// =============================================================================
//
// Every per-item failure is isolated and reported; the only fatal variant is
// `InvariantViolation`, which signals ledger corruption.
//
//   DataFetchError      snapshot unavailable, cycle aborted, nothing mutated
//   ExecutionError      one open/close failed, no ledger mutation for it
//   PriceLookupError    one position skipped for this cycle's evaluation
//   InsufficientBudget  not an error to the caller: zero allocations
//   InvariantViolation  fatal, the process halts
// =============================================================================

use thiserror::Error;
use uuid::Uuid;

/// The market snapshot (or a price refresh) could not be obtained.
#[derive(Debug, Clone, Error)]
pub enum DataFetchError {
    #[error("market data request failed: {0}")]
    Request(String),

    #[error("market data returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed market data: {0}")]
    Decode(String),

    #[error("market data request timed out after {after_secs}s")]
    Timeout { after_secs: u64 },
}

/// An open or close could not be completed at the venue.
///
/// A rejected or timed-out call is assumed to have performed no state change.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("venue rejected order: {reason}")]
    Rejected { reason: String },

    #[error("venue call timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("network error: {0}")]
    NetworkError(String),
}

impl ExecutionError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Transient failures the scheduler may retry on close.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::NetworkError(_))
    }
}

/// No usable current price for a held asset.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PriceLookupError {
    #[error("no price available for {asset_id}")]
    NoQuote { asset_id: String },

    #[error("invalid price {price} for {asset_id}")]
    InvalidPrice { asset_id: String, price: f64 },
}

/// The configured per-asset spend exceeds what is left in the budget.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("insufficient budget: {required:.2} USD per asset, {available:.2} USD available")]
pub struct InsufficientBudget {
    pub required: f64,
    pub available: f64,
}

/// The ledger reached a state correct operation can never produce.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("position {0} is already present in the ledger")]
    DuplicatePosition(Uuid),

    #[error("closed position {0} was not in the ledger")]
    UnknownPosition(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_execution_errors_are_retryable() {
        assert!(ExecutionError::Timeout { after_secs: 30 }.is_retryable());
        assert!(ExecutionError::NetworkError("reset".into()).is_retryable());
        assert!(!ExecutionError::rejected("slippage").is_retryable());
    }

    #[test]
    fn insufficient_budget_message_carries_amounts() {
        let err = InsufficientBudget {
            required: 10.0,
            available: 4.5,
        };
        assert_eq!(
            err.to_string(),
            "insufficient budget: 10.00 USD per asset, 4.50 USD available"
        );
    }
}
