//! Settlement ledger contract
//!
//! Debit/credit interface owned by the wallet subsystem. The round engine
//! never assumes success without a returned confirmation, and this is the
//! one surface shared with the external variant games (wheel, fixed-odds
//! board): they settle through the same trait with their own outcome
//! generators.

pub mod memory;
pub mod wallet_db;

pub use memory::InMemoryLedger;
pub use wallet_db::WalletDb;

use async_trait::async_trait;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// The wallet subsystem's authority over player balances.
///
/// `debit` escrows a stake before a slot may open; `credit` pays out a
/// settled win or returns escrow. Both are authoritative: the caller acts
/// only on the returned outcome.
#[async_trait]
pub trait SettlementLedger: Send + Sync {
    async fn debit(&self, player_id: &str, amount: f64) -> Result<(), LedgerError>;

    async fn credit(&self, player_id: &str, amount: f64) -> Result<(), LedgerError>;

    async fn balance(&self, player_id: &str) -> Result<f64, LedgerError>;

    /// A payout credit could not be confirmed before round close. The
    /// default records the failure for operators; durable implementations
    /// persist it so nothing is silently lost.
    async fn flag_credit_reconciliation(&self, player_id: &str, slot_id: Uuid, amount: f64) {
        error!(
            player_id,
            %slot_id,
            amount,
            "🛑 unresolved payout credit queued for reconciliation"
        );
    }

    /// A retried payout credit landed after its round had already closed.
    /// The money is in the wallet; durable implementations clear the
    /// reconciliation entry for `slot_id` so it is never paid a second
    /// time by hand.
    async fn resolve_credit_reconciliation(&self, player_id: &str, slot_id: Uuid, amount: f64) {
        warn!(
            player_id,
            %slot_id,
            amount,
            "late payout credit landed after round close"
        );
    }
}
