//! In-memory ledger
//!
//! Backing store for tests and fun-mode play. Supports failure injection
//! so the engine's fail-closed and reconciliation paths can be exercised
//! without a broken database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{LedgerError, SettlementLedger};

#[derive(Default)]
pub struct InMemoryLedger {
    balances: Mutex<HashMap<String, f64>>,
    fail_debits: AtomicBool,
    fail_credits: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, player_id: &str, amount: f64) -> Self {
        self.balances.lock().insert(player_id.to_string(), amount);
        self
    }

    /// Simulate an unavailable wallet for debits.
    pub fn set_fail_debits(&self, fail: bool) {
        self.fail_debits.store(fail, Ordering::SeqCst);
    }

    /// Simulate an unavailable wallet for credits.
    pub fn set_fail_credits(&self, fail: bool) {
        self.fail_credits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettlementLedger for InMemoryLedger {
    async fn debit(&self, player_id: &str, amount: f64) -> Result<(), LedgerError> {
        if self.fail_debits.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("injected failure".into()));
        }
        let mut balances = self.balances.lock();
        let balance = balances.entry(player_id.to_string()).or_insert(0.0);
        if *balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        *balance -= amount;
        Ok(())
    }

    async fn credit(&self, player_id: &str, amount: f64) -> Result<(), LedgerError> {
        if self.fail_credits.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("injected failure".into()));
        }
        let mut balances = self.balances.lock();
        *balances.entry(player_id.to_string()).or_insert(0.0) += amount;
        Ok(())
    }

    async fn balance(&self, player_id: &str) -> Result<f64, LedgerError> {
        Ok(self
            .balances
            .lock()
            .get(player_id)
            .copied()
            .unwrap_or(0.0))
    }
}
