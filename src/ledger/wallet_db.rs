//! Wallet Ledger Database
//!
//! Durable balances behind sqlite. Debits are conditional updates so an
//! escrow can never overdraw a balance, and unresolved payout credits are
//! persisted in a reconciliation table instead of being dropped.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use tracing::{error, warn};
use uuid::Uuid;

use super::{LedgerError, SettlementLedger};

pub struct WalletDb {
    conn: Arc<Mutex<Connection>>,
}

impl WalletDb {
    /// Open (or create) the wallet database and initialize tables.
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS wallets (
                player_id TEXT PRIMARY KEY,
                balance REAL NOT NULL DEFAULT 0.0,
                total_wagered REAL NOT NULL DEFAULT 0.0,
                total_paid_out REAL NOT NULL DEFAULT 0.0,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS credit_reconciliation (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player_id TEXT NOT NULL,
                slot_id TEXT NOT NULL UNIQUE,
                amount REAL NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_reconciliation_unresolved
             ON credit_reconciliation(resolved)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Fund a wallet (deposit confirmation is an external collaborator;
    /// this is the entry point it calls).
    pub async fn deposit(&self, player_id: &str, amount: f64) -> Result<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO wallets (player_id, balance, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(player_id) DO UPDATE SET
                balance = balance + excluded.balance,
                updated_at = excluded.updated_at",
            params![player_id, amount, &now],
        )?;
        Ok(())
    }

    /// Unresolved reconciliation entries, oldest first.
    pub async fn unresolved_reconciliations(&self) -> Result<Vec<(String, String, f64)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT player_id, slot_id, amount FROM credit_reconciliation
             WHERE resolved = 0 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl SettlementLedger for WalletDb {
    async fn debit(&self, player_id: &str, amount: f64) -> Result<(), LedgerError> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        let changed = conn
            .execute(
                "UPDATE wallets
                 SET balance = balance - ?1,
                     total_wagered = total_wagered + ?1,
                     updated_at = ?2
                 WHERE player_id = ?3 AND balance >= ?1",
                params![amount, &now, player_id],
            )
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        if changed == 0 {
            return Err(LedgerError::InsufficientFunds);
        }
        Ok(())
    }

    async fn credit(&self, player_id: &str, amount: f64) -> Result<(), LedgerError> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO wallets (player_id, balance, total_paid_out, updated_at)
             VALUES (?1, ?2, ?2, ?3)
             ON CONFLICT(player_id) DO UPDATE SET
                balance = balance + ?2,
                total_paid_out = total_paid_out + ?2,
                updated_at = ?3",
            params![player_id, amount, &now],
        )
        .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn balance(&self, player_id: &str) -> Result<f64, LedgerError> {
        let conn = self.conn.lock().await;
        let balance = conn
            .query_row(
                "SELECT balance FROM wallets WHERE player_id = ?",
                [player_id],
                |row| row.get(0),
            )
            .unwrap_or(0.0);
        Ok(balance)
    }

    async fn flag_credit_reconciliation(&self, player_id: &str, slot_id: Uuid, amount: f64) {
        error!(
            player_id,
            %slot_id,
            amount,
            "🛑 unresolved payout credit queued for reconciliation"
        );
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        // Keyed by slot_id: if the late-landing credit already marked this
        // slot resolved, the flag must not reopen it.
        if let Err(e) = conn.execute(
            "INSERT INTO credit_reconciliation (player_id, slot_id, amount, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(slot_id) DO NOTHING",
            params![player_id, slot_id.to_string(), amount, &now],
        ) {
            error!("failed to persist reconciliation entry: {e}");
        }
    }

    async fn resolve_credit_reconciliation(&self, player_id: &str, slot_id: Uuid, amount: f64) {
        warn!(
            player_id,
            %slot_id,
            amount,
            "late payout credit landed after round close, clearing reconciliation"
        );
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        // Upsert so the outcome is the same whether the flag or the late
        // credit reaches the database first.
        if let Err(e) = conn.execute(
            "INSERT INTO credit_reconciliation (player_id, slot_id, amount, resolved, created_at)
             VALUES (?, ?, ?, 1, ?)
             ON CONFLICT(slot_id) DO UPDATE SET resolved = 1",
            params![player_id, slot_id.to_string(), amount, &now],
        ) {
            error!("failed to resolve reconciliation entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, WalletDb) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.db");
        let db = WalletDb::new(path.to_str().unwrap()).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn debit_never_overdraws() {
        let (_dir, db) = temp_db();
        db.deposit("p1", 50.0).await.unwrap();
        db.debit("p1", 30.0).await.unwrap();
        assert_eq!(
            db.debit("p1", 30.0).await,
            Err(LedgerError::InsufficientFunds)
        );
        assert_eq!(db.balance("p1").await.unwrap(), 20.0);
    }

    #[tokio::test]
    async fn unknown_player_cannot_debit() {
        let (_dir, db) = temp_db();
        assert_eq!(
            db.debit("ghost", 1.0).await,
            Err(LedgerError::InsufficientFunds)
        );
    }

    #[tokio::test]
    async fn credit_creates_wallet_if_missing() {
        let (_dir, db) = temp_db();
        db.credit("p1", 15.0).await.unwrap();
        assert_eq!(db.balance("p1").await.unwrap(), 15.0);
    }

    #[tokio::test]
    async fn reconciliation_entries_are_persisted() {
        let (_dir, db) = temp_db();
        let slot_id = Uuid::new_v4();
        db.flag_credit_reconciliation("p1", slot_id, 42.0).await;
        let entries = db.unresolved_reconciliations().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "p1");
        assert_eq!(entries[0].1, slot_id.to_string());
        assert_eq!(entries[0].2, 42.0);
    }

    async fn audit_columns(db: &WalletDb, player_id: &str) -> (f64, f64) {
        let conn = db.conn.lock().await;
        conn.query_row(
            "SELECT total_wagered, total_paid_out FROM wallets WHERE player_id = ?",
            [player_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn deposit_is_funding_not_a_payout() {
        let (_dir, db) = temp_db();
        db.deposit("p1", 100.0).await.unwrap();
        assert_eq!(db.balance("p1").await.unwrap(), 100.0);
        // Funding leaves the game accounting untouched.
        assert_eq!(audit_columns(&db, "p1").await, (0.0, 0.0));

        // Settlement paths book wagered/paid-out as before.
        db.debit("p1", 10.0).await.unwrap();
        db.credit("p1", 25.0).await.unwrap();
        assert_eq!(audit_columns(&db, "p1").await, (10.0, 25.0));
        assert_eq!(db.balance("p1").await.unwrap(), 115.0);
    }

    #[tokio::test]
    async fn late_credit_clears_reconciliation_in_either_order() {
        let (_dir, db) = temp_db();

        // Flag first, credit lands later.
        let first = Uuid::new_v4();
        db.flag_credit_reconciliation("p1", first, 42.0).await;
        db.resolve_credit_reconciliation("p1", first, 42.0).await;
        assert!(db.unresolved_reconciliations().await.unwrap().is_empty());

        // Credit lands before the close sweep writes the flag.
        let second = Uuid::new_v4();
        db.resolve_credit_reconciliation("p1", second, 17.0).await;
        db.flag_credit_reconciliation("p1", second, 17.0).await;
        assert!(db.unresolved_reconciliations().await.unwrap().is_empty());
    }
}
