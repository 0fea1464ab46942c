//! Round engine
//!
//! The authoritative round state machine. Synchronous and single-writer:
//! the supervisor task feeds it ticks and commands in strict arrival
//! order, each stamped with the server clock, and nothing else mutates
//! round or slot state. Ledger I/O never happens in here; the engine
//! reports what must be debited, credited, or reconciled and the
//! supervisor carries it out off the tick path.

use tracing::{debug, warn};
use uuid::Uuid;

use super::clock::GrowthCurve;
use super::error::Rejection;
use super::history::{OutcomeHistory, OutcomeRecord};
use super::messages::{RoundSnapshot, WsServerEvent};
use super::oracle::{CrashParams, CrashPointOracle};
use super::round::{Round, RoundPhase};
use super::slot::{PlaceError, SlotArena, SlotKey, SlotStatus, WagerSlot};

/// Engine tuning. Every number here is deliberate configuration; none of
/// it is baked into the code.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub waiting_ms: u64,
    pub cooldown_ms: u64,
    pub tick_ms: u64,
    pub growth_rate: f64,
    pub growth_exponent: f64,
    pub crash: CrashParams,
    pub max_slots_per_player: usize,
    pub history_depth: usize,
    /// Tolerance for cash-outs that arrive just after the crash instant
    /// (network jitter). 0 means strict.
    pub cashout_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            waiting_ms: 3_000,
            cooldown_ms: 3_000,
            tick_ms: 50,
            growth_rate: 0.006,
            growth_exponent: 1.15,
            crash: CrashParams::default(),
            max_slots_per_player: 2,
            history_depth: 15,
            cashout_grace_ms: 0,
        }
    }
}

/// Side effects the supervisor must carry out after an engine call.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Broadcast(WsServerEvent),
    /// Return escrowed stake to the wallet (cancelled bet, or a debit that
    /// confirmed after the round had moved on).
    Refund {
        player_id: String,
        slot_id: Uuid,
        amount: f64,
    },
    /// A cash-out credit was still unconfirmed when the round closed.
    /// Queued for reconciliation; operationally fatal, never user-visible.
    ReconcileCredit {
        player_id: String,
        slot_id: Uuid,
        amount: f64,
    },
}

/// Handle for an in-flight bet between `begin_bet` and `commit_bet`,
/// while the escrow debit is out with the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct BetTicket {
    pub key: SlotKey,
    pub slot_id: Uuid,
    pub player_id: String,
    pub slot_index: usize,
    pub stake: f64,
}

/// A bet that became OPEN after its debit confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct BetOpened {
    pub slot_id: Uuid,
    pub player_id: String,
    pub slot_index: usize,
    pub stake: f64,
}

/// A successful cash-out settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct CashOutOk {
    pub key: SlotKey,
    pub slot_id: Uuid,
    pub player_id: String,
    pub slot_index: usize,
    pub multiplier: f64,
    pub payout: f64,
}

/// A bet withdrawn during WAITING.
#[derive(Debug, Clone, PartialEq)]
pub struct BetCancelled {
    pub slot_id: Uuid,
    pub player_id: String,
    pub slot_index: usize,
    pub refund: f64,
}

pub struct RoundEngine {
    cfg: EngineConfig,
    curve: GrowthCurve,
    oracle: CrashPointOracle,
    round: Round,
    slots: SlotArena,
    history: OutcomeHistory,
}

impl RoundEngine {
    pub fn new(cfg: EngineConfig, mut oracle: CrashPointOracle, now_ms: u64) -> Self {
        let curve = GrowthCurve {
            tick_ms: cfg.tick_ms,
            rate: cfg.growth_rate,
            exponent: cfg.growth_exponent,
        };
        let round = Round::create(oracle.draw(), &curve, now_ms, cfg.waiting_ms);
        let slots = SlotArena::new(cfg.max_slots_per_player);
        let history = OutcomeHistory::new(cfg.history_depth);
        Self {
            cfg,
            curve,
            oracle,
            round,
            slots,
            history,
        }
    }

    /// WAITING announcement for the current round (initial broadcast and
    /// reconnect replay).
    pub fn waiting_event(&self) -> WsServerEvent {
        WsServerEvent::RoundWaiting {
            round_id: self.round.round_id,
            opens_at_ms: self.round.opens_at_ms,
            commitment: self.round.commitment.clone(),
        }
    }

    /// Advance the round timeline to `now_ms`. Called once per tick.
    pub fn tick(&mut self, now_ms: u64) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        match self.round.phase {
            RoundPhase::Waiting => {
                if now_ms >= self.round.opens_at_ms {
                    self.round.phase = RoundPhase::Flying;
                    self.round.started_at_ms = Some(self.round.opens_at_ms);
                    debug!(round_id = %self.round.round_id, "round flying");
                    if self.round.crashed_by(now_ms) {
                        self.crash(&mut events);
                    } else {
                        events.push(self.tick_broadcast(now_ms));
                    }
                }
            }
            RoundPhase::Flying => {
                if self.round.crashed_by(now_ms) {
                    self.crash(&mut events);
                } else {
                    events.push(self.tick_broadcast(now_ms));
                }
            }
            RoundPhase::Crashed => {
                let ended = self.round.ended_at_ms.unwrap_or(now_ms);
                if now_ms >= ended + self.cfg.cooldown_ms {
                    self.rotate(now_ms, &mut events);
                }
            }
        }
        events
    }

    fn tick_broadcast(&self, now_ms: u64) -> EngineEvent {
        let started = self.round.started_at_ms.unwrap_or(now_ms);
        EngineEvent::Broadcast(WsServerEvent::RoundTick {
            round_id: self.round.round_id,
            multiplier: self.round.multiplier_at(&self.curve, now_ms),
            elapsed_ms: now_ms.saturating_sub(started),
            server_ts_ms: now_ms,
        })
    }

    /// FLYING -> CRASHED: reveal, sweep, archive. The crash instant is the
    /// clock-derived crossing, not the tick that observed it.
    fn crash(&mut self, events: &mut Vec<EngineEvent>) {
        let crash_at = self
            .round
            .crash_at_ms()
            .unwrap_or(self.round.opens_at_ms);
        self.round.phase = RoundPhase::Crashed;
        self.round.ended_at_ms = Some(crash_at);

        // Settlement sweep: every still-open slot lost, exactly once.
        for (_, slot) in self.slots.iter_mut() {
            if slot.status == SlotStatus::Open {
                if let Err(dup) = slot.lose() {
                    warn!(slot_id = %slot.slot_id, ?dup, "duplicate settlement ignored");
                }
            }
        }

        let (crash_point, seed_hex, nonce) = self
            .round
            .reveal()
            .expect("reveal is defined in the crashed phase");
        self.history.record(OutcomeRecord {
            round_id: self.round.round_id,
            crash_point,
            ended_at_ms: crash_at,
            seed_hex: seed_hex.clone(),
            nonce,
        });
        debug!(round_id = %self.round.round_id, crash_point, "round crashed");
        events.push(EngineEvent::Broadcast(WsServerEvent::RoundCrashed {
            round_id: self.round.round_id,
            crash_point,
            seed_hex,
            nonce,
        }));
    }

    /// CRASHED -> next WAITING: flag unfinished ledger work, then start a
    /// fresh round with a fresh arena.
    fn rotate(&mut self, now_ms: u64, events: &mut Vec<EngineEvent>) {
        for (_, slot) in self.slots.iter_mut() {
            match slot.status {
                SlotStatus::CashedOut if slot.pending_credit => {
                    events.push(EngineEvent::ReconcileCredit {
                        player_id: slot.player_id.clone(),
                        slot_id: slot.slot_id,
                        amount: slot.payout,
                    });
                }
                SlotStatus::PendingDebit => {
                    // Debit never confirmed before close; void the slot.
                    // If the confirmation straggles in, commit_bet refunds.
                    warn!(slot_id = %slot.slot_id, "debit unconfirmed at round close");
                    let _ = slot.void();
                }
                _ => {}
            }
        }

        self.round = Round::create(
            self.oracle.draw(),
            &self.curve,
            now_ms,
            self.cfg.waiting_ms,
        );
        self.slots = SlotArena::new(self.cfg.max_slots_per_player);
        events.push(EngineEvent::Broadcast(self.waiting_event()));
    }

    /// First half of bet placement: validate and reserve the slot. No
    /// escrow is held yet; the slot only becomes OPEN in `commit_bet`
    /// after the ledger debit confirms.
    pub fn begin_bet(
        &mut self,
        player_id: &str,
        slot_index: usize,
        stake: f64,
        now_ms: u64,
    ) -> Result<BetTicket, Rejection> {
        if !(stake > 0.0) || !stake.is_finite() {
            return Err(Rejection::InvalidStake);
        }
        if self.round.phase != RoundPhase::Waiting {
            return Err(Rejection::InvalidState);
        }
        let key = self
            .slots
            .place(player_id, slot_index, self.round.round_id, stake, now_ms)
            .map_err(|e| match e {
                PlaceError::IndexOutOfRange => Rejection::SlotIndexOutOfRange,
                PlaceError::Occupied => Rejection::SlotOccupied,
            })?;
        let slot = self.slots.get(key).expect("slot just placed");
        Ok(BetTicket {
            key,
            slot_id: slot.slot_id,
            player_id: slot.player_id.clone(),
            slot_index,
            stake,
        })
    }

    /// Second half: apply the debit outcome. A slot must never be OPEN
    /// without a successful debit, and a debit that lands after the round
    /// moved on is refunded rather than opened.
    pub fn commit_bet(
        &mut self,
        ticket: &BetTicket,
        debit: Result<(), Rejection>,
        _now_ms: u64,
    ) -> (Result<BetOpened, Rejection>, Vec<EngineEvent>) {
        let mut events = Vec::new();

        let Some(slot) = self.slots.get_mut(ticket.key) else {
            // Arena already rotated. Escrow was taken: hand it back.
            return (Err(Rejection::InvalidState), refund_events(ticket, debit));
        };
        if slot.slot_id != ticket.slot_id {
            return (Err(Rejection::InvalidState), refund_events(ticket, debit));
        }

        match debit {
            Err(reason) => {
                // Fail closed: nothing was escrowed, nothing to refund.
                let _ = slot.void();
                (Err(reason), events)
            }
            Ok(()) => {
                let in_window = self.round.phase == RoundPhase::Waiting
                    && slot.round_id == self.round.round_id;
                if in_window && slot.status == SlotStatus::PendingDebit {
                    slot.open().expect("pending slot opens once");
                    (
                        Ok(BetOpened {
                            slot_id: slot.slot_id,
                            player_id: slot.player_id.clone(),
                            slot_index: slot.slot_index,
                            stake: slot.stake,
                        }),
                        events,
                    )
                } else {
                    // Debit confirmed too late (flight started or the slot
                    // was voided at close). Void and return the escrow.
                    let _ = slot.void();
                    events.push(EngineEvent::Refund {
                        player_id: ticket.player_id.clone(),
                        slot_id: ticket.slot_id,
                        amount: ticket.stake,
                    });
                    (Err(Rejection::InvalidState), events)
                }
            }
        }
    }

    /// Resolve a cash-out against the authoritative clock at the moment
    /// the command was received. Racing the crash is a normal loss, not a
    /// fault.
    pub fn cash_out(
        &mut self,
        player_id: &str,
        slot_index: usize,
        now_ms: u64,
    ) -> Result<CashOutOk, Rejection> {
        if self.round.phase == RoundPhase::Waiting {
            return Err(Rejection::InvalidState);
        }
        let key = self
            .slots
            .lookup(player_id, slot_index)
            .ok_or(Rejection::NoOpenBet)?;
        let crash_at = self
            .round
            .crash_at_ms()
            .ok_or(Rejection::InvalidState)?;
        let crash_point = self.round.crash_point();

        let slot = self.slots.get_mut(key).ok_or(Rejection::NoOpenBet)?;
        match slot.status {
            SlotStatus::Open => {}
            SlotStatus::Lost => return Err(Rejection::RaceRejected),
            SlotStatus::CashedOut => {
                // Duplicate settlement command: no-op, never re-paid.
                warn!(slot_id = %slot.slot_id, "duplicate cash-out ignored");
                return Err(Rejection::NoOpenBet);
            }
            _ => return Err(Rejection::NoOpenBet),
        }

        let multiplier = if now_ms < crash_at {
            self.round.multiplier_at(&self.curve, now_ms)
        } else if self.cfg.cashout_grace_ms > 0
            && now_ms <= crash_at + self.cfg.cashout_grace_ms
        {
            // Jitter grace: settle at the last tick strictly below the
            // crash point. A round that crashed on tick zero has none.
            let crossing = self.curve.crossing_tick(crash_point);
            if crossing == 0 {
                return Err(Rejection::RaceRejected);
            }
            self.curve.multiplier_at_tick(crossing - 1)
        } else {
            return Err(Rejection::RaceRejected);
        };

        debug_assert!(multiplier < crash_point);
        let payout = slot
            .cash_out(multiplier)
            .expect("open slot settles once");
        Ok(CashOutOk {
            key,
            slot_id: slot.slot_id,
            player_id: slot.player_id.clone(),
            slot_index,
            multiplier,
            payout,
        })
    }

    /// Withdraw an open bet before the flight starts.
    pub fn cancel_bet(
        &mut self,
        player_id: &str,
        slot_index: usize,
        _now_ms: u64,
    ) -> Result<BetCancelled, Rejection> {
        if self.round.phase != RoundPhase::Waiting {
            return Err(Rejection::InvalidState);
        }
        let key = self
            .slots
            .lookup(player_id, slot_index)
            .ok_or(Rejection::NoOpenBet)?;
        let slot = self.slots.get_mut(key).ok_or(Rejection::NoOpenBet)?;
        if slot.status != SlotStatus::Open {
            return Err(Rejection::NoOpenBet);
        }
        slot.void().expect("open slot voids once");
        Ok(BetCancelled {
            slot_id: slot.slot_id,
            player_id: slot.player_id.clone(),
            slot_index,
            refund: slot.stake,
        })
    }

    /// Ledger credit outcome for a cashed-out slot. Returns whether the
    /// confirmation applied to a live slot; the slot id guards against
    /// confirmations that straggle in after the arena rotated, and the
    /// caller settles a successful straggler against the reconciliation
    /// queue instead.
    pub fn confirm_credit(&mut self, key: SlotKey, slot_id: Uuid, ok: bool) -> bool {
        let Some(slot) = self.slots.get_mut(key) else {
            return false;
        };
        if slot.slot_id != slot_id {
            return false;
        }
        if ok {
            slot.confirm_credit();
        } else {
            warn!(
                slot_id = %slot.slot_id,
                payout = slot.payout,
                "credit unresolved, slot held pending reconciliation"
            );
        }
        true
    }

    pub fn snapshot(&self, now_ms: u64) -> RoundSnapshot {
        let (multiplier, crash_point) = match self.round.phase {
            RoundPhase::Waiting => (1.0, None),
            RoundPhase::Flying => (self.round.multiplier_at(&self.curve, now_ms), None),
            RoundPhase::Crashed => {
                let (cp, _, _) = self.round.reveal().expect("crashed round reveals");
                (cp, Some(cp))
            }
        };
        RoundSnapshot {
            round_id: self.round.round_id,
            phase: self.round.phase,
            multiplier,
            elapsed_ms: self
                .round
                .started_at_ms
                .map(|s| now_ms.saturating_sub(s))
                .unwrap_or(0),
            opens_at_ms: self.round.opens_at_ms,
            commitment: self.round.commitment.clone(),
            crash_point,
            server_ts_ms: now_ms,
        }
    }

    pub fn history(&self) -> Vec<OutcomeRecord> {
        self.history.recent()
    }

    pub fn phase(&self) -> RoundPhase {
        self.round.phase
    }

    pub fn curve(&self) -> &GrowthCurve {
        &self.curve
    }

    pub fn slot(&self, player_id: &str, slot_index: usize) -> Option<&WagerSlot> {
        self.slots
            .lookup(player_id, slot_index)
            .and_then(|key| self.slots.get(key))
    }

    #[cfg(test)]
    fn set_crash_point(&mut self, crash_point: f64) {
        self.round.force_crash_point(&self.curve, crash_point);
    }
}

fn refund_events(ticket: &BetTicket, debit: Result<(), Rejection>) -> Vec<EngineEvent> {
    match debit {
        Ok(()) => vec![EngineEvent::Refund {
            player_id: ticket.player_id.clone(),
            slot_id: ticket.slot_id,
            amount: ticket.stake,
        }],
        Err(_) => Vec::new(),
    }
}
