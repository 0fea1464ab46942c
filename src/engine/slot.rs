//! Wager slots
//!
//! One slot per player bet, held in a bounded indexable arena keyed by
//! `(player_id, slot_index)` so the per-player concurrency limit is
//! configuration rather than a pair of hardcoded fields. Status moves one
//! direction only and a slot leaves OPEN exactly once; every transition is
//! guarded here so settlement stays idempotent no matter how many commands
//! arrive.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

/// PENDING_DEBIT -> OPEN -> CASHED_OUT | LOST | VOID.
/// PENDING_DEBIT -> VOID when the escrow debit fails or lands too late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// Escrow debit dispatched, not yet confirmed. Not a live bet.
    PendingDebit,
    Open,
    CashedOut,
    Lost,
    Void,
}

/// Attempted transition on a slot that already left OPEN. Logged and
/// ignored by callers; never re-paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("slot already settled as {0:?}")]
pub struct DuplicateSettlement(pub SlotStatus);

#[derive(Debug, Clone, Serialize)]
pub struct WagerSlot {
    pub slot_id: Uuid,
    pub player_id: String,
    pub round_id: Uuid,
    pub slot_index: usize,
    pub stake: f64,
    pub placed_at_ms: u64,
    pub status: SlotStatus,
    pub cash_out_multiplier: Option<f64>,
    pub payout: f64,
    /// CASHED_OUT but the ledger credit has not confirmed yet.
    pub pending_credit: bool,
}

impl WagerSlot {
    fn new(player_id: &str, round_id: Uuid, slot_index: usize, stake: f64, now_ms: u64) -> Self {
        Self {
            slot_id: Uuid::new_v4(),
            player_id: player_id.to_string(),
            round_id,
            slot_index,
            stake,
            placed_at_ms: now_ms,
            status: SlotStatus::PendingDebit,
            cash_out_multiplier: None,
            payout: 0.0,
            pending_credit: false,
        }
    }

    /// Escrow debit confirmed while the round still accepts it.
    pub fn open(&mut self) -> Result<(), DuplicateSettlement> {
        match self.status {
            SlotStatus::PendingDebit => {
                self.status = SlotStatus::Open;
                Ok(())
            }
            other => Err(DuplicateSettlement(other)),
        }
    }

    /// Settle as a win at `multiplier`. The payout is authorized by this
    /// transition and by nothing else.
    pub fn cash_out(&mut self, multiplier: f64) -> Result<f64, DuplicateSettlement> {
        match self.status {
            SlotStatus::Open => {
                self.status = SlotStatus::CashedOut;
                self.cash_out_multiplier = Some(multiplier);
                self.payout = self.stake * multiplier;
                self.pending_credit = true;
                Ok(self.payout)
            }
            other => Err(DuplicateSettlement(other)),
        }
    }

    /// Swept at crash time: stake forfeited, payout zero.
    pub fn lose(&mut self) -> Result<(), DuplicateSettlement> {
        match self.status {
            SlotStatus::Open => {
                self.status = SlotStatus::Lost;
                self.payout = 0.0;
                Ok(())
            }
            other => Err(DuplicateSettlement(other)),
        }
    }

    /// Cancelled before flight, or a debit that resolved after the round
    /// moved on. Payout zero; any held escrow is refunded by the caller.
    pub fn void(&mut self) -> Result<(), DuplicateSettlement> {
        match self.status {
            SlotStatus::PendingDebit | SlotStatus::Open => {
                self.status = SlotStatus::Void;
                self.payout = 0.0;
                Ok(())
            }
            other => Err(DuplicateSettlement(other)),
        }
    }

    pub fn confirm_credit(&mut self) {
        self.pending_credit = false;
    }
}

/// Stable handle into the arena for the lifetime of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotKey(usize);

/// Per-round slot storage. Owned exclusively by the round engine; all
/// mutation is serialized through it.
#[derive(Debug)]
pub struct SlotArena {
    max_per_player: usize,
    slots: Vec<WagerSlot>,
    by_player: HashMap<(String, usize), usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceError {
    IndexOutOfRange,
    Occupied,
}

impl SlotArena {
    pub fn new(max_per_player: usize) -> Self {
        Self {
            max_per_player,
            slots: Vec::new(),
            by_player: HashMap::new(),
        }
    }

    /// Register a new pending slot for `(player_id, slot_index)`. A key is
    /// reusable only if its previous slot was voided (cancelled bet).
    pub fn place(
        &mut self,
        player_id: &str,
        slot_index: usize,
        round_id: Uuid,
        stake: f64,
        now_ms: u64,
    ) -> Result<SlotKey, PlaceError> {
        if slot_index >= self.max_per_player {
            return Err(PlaceError::IndexOutOfRange);
        }
        let key = (player_id.to_string(), slot_index);
        if let Some(&existing) = self.by_player.get(&key) {
            if self.slots[existing].status != SlotStatus::Void {
                return Err(PlaceError::Occupied);
            }
        }
        let idx = self.slots.len();
        self.slots
            .push(WagerSlot::new(player_id, round_id, slot_index, stake, now_ms));
        self.by_player.insert(key, idx);
        Ok(SlotKey(idx))
    }

    pub fn get(&self, key: SlotKey) -> Option<&WagerSlot> {
        self.slots.get(key.0)
    }

    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut WagerSlot> {
        self.slots.get_mut(key.0)
    }

    pub fn lookup(&self, player_id: &str, slot_index: usize) -> Option<SlotKey> {
        self.by_player
            .get(&(player_id.to_string(), slot_index))
            .map(|&idx| SlotKey(idx))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotKey, &mut WagerSlot)> {
        self.slots
            .iter_mut()
            .enumerate()
            .map(|(i, s)| (SlotKey(i), s))
    }
}
