//! Typed command rejections
//!
//! Every player command is acknowledged with either a success payload or
//! one of these reasons. They are wagering outcomes or input errors, not
//! faults; ledger and reconciliation failures are operator-visible only.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Command not valid in the current round phase (bet while flying,
    /// cash out while waiting).
    #[error("command not valid in the current round phase")]
    InvalidState,
    /// The wallet refused the escrow debit.
    #[error("insufficient balance")]
    InsufficientBalance,
    /// Cash-out arrived at or after the authoritative crash instant. A
    /// normal outcome: the slot is swept as lost.
    #[error("round crashed before the cash-out was received")]
    RaceRejected,
    #[error("slot index outside the configured per-player limit")]
    SlotIndexOutOfRange,
    #[error("a bet is already held in that slot")]
    SlotOccupied,
    #[error("no open bet in that slot")]
    NoOpenBet,
    #[error("stake must be a positive amount")]
    InvalidStake,
    /// The wallet ledger did not answer. Bets fail closed.
    #[error("wallet ledger unavailable")]
    LedgerUnavailable,
}
