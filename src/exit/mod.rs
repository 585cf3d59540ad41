// =============================================================================
// Exit Management Module
// =============================================================================
//
// Stop-loss / take-profit evaluation over a ledger snapshot. The scheduler
// closes whatever this module flags.

pub mod evaluator;
