//! Round supervisor
//!
//! The single serialized execution path for the round timeline. One tokio
//! task owns the engine, advances the tick, and drains the command queue
//! in strict arrival order; every command is timestamped when it enters
//! the queue. Ledger calls never run on the tick path: they are spawned
//! per command and their completions re-enter the queue as internal
//! messages gating only the affected slot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::{LedgerError, SettlementLedger};

use super::core::{BetTicket, EngineConfig, EngineEvent, RoundEngine};
use super::error::Rejection;
use super::history::OutcomeRecord;
use super::messages::{RoundSnapshot, WsServerEvent};
use super::now_ms;
use super::oracle::CrashPointOracle;
use super::slot::SlotKey;

const COMMAND_QUEUE_DEPTH: usize = 1024;
const CREDIT_RETRY_ATTEMPTS: u32 = 3;
const CREDIT_RETRY_BASE_MS: u64 = 100;

enum Command {
    PlaceBet {
        player_id: String,
        slot_index: usize,
        amount: f64,
        at_ms: u64,
        reply: oneshot::Sender<WsServerEvent>,
    },
    CashOut {
        player_id: String,
        slot_index: usize,
        at_ms: u64,
        reply: oneshot::Sender<WsServerEvent>,
    },
    CancelBet {
        player_id: String,
        slot_index: usize,
        at_ms: u64,
        reply: oneshot::Sender<WsServerEvent>,
    },
    Snapshot {
        reply: oneshot::Sender<RoundSnapshot>,
    },
    History {
        reply: oneshot::Sender<Vec<OutcomeRecord>>,
    },
    /// Escrow debit completed for an in-flight bet.
    DebitSettled {
        ticket: BetTicket,
        result: Result<(), Rejection>,
        reply: oneshot::Sender<WsServerEvent>,
    },
    /// Payout credit completed (or gave up) for a cashed-out slot.
    CreditSettled {
        key: SlotKey,
        slot_id: Uuid,
        player_id: String,
        amount: f64,
        ok: bool,
    },
}

/// Cloneable front door to the supervisor task.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Command>,
}

impl SupervisorHandle {
    /// Spawn the supervisor task. Broadcast events fan out on `events`;
    /// per-command acknowledgements come back through the handle.
    pub fn spawn(
        cfg: EngineConfig,
        ledger: Arc<dyn SettlementLedger>,
        events: broadcast::Sender<WsServerEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let oracle = CrashPointOracle::new(cfg.crash);
        let engine = RoundEngine::new(cfg.clone(), oracle, now_ms());
        let _ = events.send(engine.waiting_event());

        let task = SupervisorTask {
            engine,
            ledger,
            events,
            tx: tx.clone(),
            tick_ms: cfg.tick_ms,
        };
        tokio::spawn(task.run(rx));
        Self { tx }
    }

    pub async fn place_bet(
        &self,
        player_id: String,
        slot_index: usize,
        amount: f64,
    ) -> WsServerEvent {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::PlaceBet {
            player_id: player_id.clone(),
            slot_index,
            amount,
            at_ms: now_ms(),
            reply,
        };
        if self.tx.send(cmd).await.is_err() {
            return WsServerEvent::BetRejected {
                player_id,
                slot_index,
                reason: Rejection::LedgerUnavailable,
            };
        }
        rx.await.unwrap_or(WsServerEvent::BetRejected {
            player_id,
            slot_index,
            reason: Rejection::LedgerUnavailable,
        })
    }

    pub async fn cash_out(&self, player_id: String, slot_index: usize) -> WsServerEvent {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::CashOut {
            player_id: player_id.clone(),
            slot_index,
            at_ms: now_ms(),
            reply,
        };
        if self.tx.send(cmd).await.is_err() {
            return WsServerEvent::CashOutRejected {
                player_id,
                slot_index,
                reason: Rejection::LedgerUnavailable,
            };
        }
        rx.await.unwrap_or(WsServerEvent::CashOutRejected {
            player_id,
            slot_index,
            reason: Rejection::LedgerUnavailable,
        })
    }

    pub async fn cancel_bet(&self, player_id: String, slot_index: usize) -> WsServerEvent {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::CancelBet {
            player_id: player_id.clone(),
            slot_index,
            at_ms: now_ms(),
            reply,
        };
        if self.tx.send(cmd).await.is_err() {
            return WsServerEvent::BetRejected {
                player_id,
                slot_index,
                reason: Rejection::LedgerUnavailable,
            };
        }
        rx.await.unwrap_or(WsServerEvent::BetRejected {
            player_id,
            slot_index,
            reason: Rejection::LedgerUnavailable,
        })
    }

    pub async fn snapshot(&self) -> Option<RoundSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn history(&self) -> Vec<OutcomeRecord> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::History { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

struct SupervisorTask {
    engine: RoundEngine,
    ledger: Arc<dyn SettlementLedger>,
    events: broadcast::Sender<WsServerEvent>,
    tx: mpsc::Sender<Command>,
    tick_ms: u64,
}

impl SupervisorTask {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let mut ticker = interval(Duration::from_millis(self.tick_ms.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let events = self.engine.tick(now_ms());
                    self.dispatch(events);
                }
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle(cmd);
                }
            }
        }
        info!("round supervisor stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::PlaceBet {
                player_id,
                slot_index,
                amount,
                at_ms,
                reply,
            } => match self.engine.begin_bet(&player_id, slot_index, amount, at_ms) {
                Err(reason) => {
                    let _ = reply.send(WsServerEvent::BetRejected {
                        player_id,
                        slot_index,
                        reason,
                    });
                }
                Ok(ticket) => {
                    // Escrow off the tick path; the completion re-enters
                    // the queue and gates only this slot.
                    let ledger = self.ledger.clone();
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let result = match ledger.debit(&ticket.player_id, ticket.stake).await {
                            Ok(()) => Ok(()),
                            Err(LedgerError::InsufficientFunds) => {
                                Err(Rejection::InsufficientBalance)
                            }
                            Err(LedgerError::Unavailable(e)) => {
                                warn!(player_id = %ticket.player_id, "debit failed: {e}");
                                Err(Rejection::LedgerUnavailable)
                            }
                        };
                        let _ = tx
                            .send(Command::DebitSettled {
                                ticket,
                                result,
                                reply,
                            })
                            .await;
                    });
                }
            },
            Command::DebitSettled {
                ticket,
                result,
                reply,
            } => {
                let (outcome, events) = self.engine.commit_bet(&ticket, result, now_ms());
                self.dispatch(events);
                match outcome {
                    Ok(opened) => {
                        let event = WsServerEvent::BetAccepted {
                            slot_id: opened.slot_id,
                            player_id: opened.player_id,
                            slot_index: opened.slot_index,
                            stake: opened.stake,
                        };
                        let _ = self.events.send(event.clone());
                        let _ = reply.send(event);
                    }
                    Err(reason) => {
                        let _ = reply.send(WsServerEvent::BetRejected {
                            player_id: ticket.player_id,
                            slot_index: ticket.slot_index,
                            reason,
                        });
                    }
                }
            }
            Command::CashOut {
                player_id,
                slot_index,
                at_ms,
                reply,
            } => match self.engine.cash_out(&player_id, slot_index, at_ms) {
                Ok(ok) => {
                    let event = WsServerEvent::CashOutAccepted {
                        slot_id: ok.slot_id,
                        player_id: ok.player_id.clone(),
                        slot_index: ok.slot_index,
                        multiplier: ok.multiplier,
                        payout: ok.payout,
                    };
                    let _ = self.events.send(event.clone());
                    let _ = reply.send(event);
                    self.spawn_payout_credit(ok.key, ok.slot_id, ok.player_id, ok.payout);
                }
                Err(reason) => {
                    let _ = reply.send(WsServerEvent::CashOutRejected {
                        player_id,
                        slot_index,
                        reason,
                    });
                }
            },
            Command::CreditSettled {
                key,
                slot_id,
                player_id,
                amount,
                ok,
            } => {
                let applied = self.engine.confirm_credit(key, slot_id, ok);
                if !applied && ok {
                    // The round closed and flagged this slot while the
                    // credit was still retrying; the money did land, so
                    // clear the queued reconciliation entry.
                    let ledger = self.ledger.clone();
                    tokio::spawn(async move {
                        ledger
                            .resolve_credit_reconciliation(&player_id, slot_id, amount)
                            .await;
                    });
                }
            }
            Command::CancelBet {
                player_id,
                slot_index,
                at_ms,
                reply,
            } => match self.engine.cancel_bet(&player_id, slot_index, at_ms) {
                Ok(cancelled) => {
                    let event = WsServerEvent::BetCancelled {
                        slot_id: cancelled.slot_id,
                        player_id: cancelled.player_id.clone(),
                        slot_index: cancelled.slot_index,
                        refund: cancelled.refund,
                    };
                    let _ = self.events.send(event.clone());
                    let _ = reply.send(event);
                    self.spawn_refund(cancelled.player_id, cancelled.slot_id, cancelled.refund);
                }
                Err(reason) => {
                    let _ = reply.send(WsServerEvent::BetRejected {
                        player_id,
                        slot_index,
                        reason,
                    });
                }
            },
            Command::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot(now_ms()));
            }
            Command::History { reply } => {
                let _ = reply.send(self.engine.history());
            }
        }
    }

    fn dispatch(&mut self, events: Vec<EngineEvent>) {
        for event in events {
            match event {
                EngineEvent::Broadcast(evt) => {
                    // No receivers is fine (nobody connected yet).
                    let _ = self.events.send(evt);
                }
                EngineEvent::Refund {
                    player_id,
                    slot_id,
                    amount,
                } => {
                    self.spawn_refund(player_id, slot_id, amount);
                }
                EngineEvent::ReconcileCredit {
                    player_id,
                    slot_id,
                    amount,
                } => {
                    let ledger = self.ledger.clone();
                    tokio::spawn(async move {
                        ledger
                            .flag_credit_reconciliation(&player_id, slot_id, amount)
                            .await;
                    });
                }
            }
        }
    }

    /// Credit a settled payout with backoff. The outcome re-enters the
    /// command queue; on give-up the slot stays flagged and is swept into
    /// reconciliation at round close.
    fn spawn_payout_credit(&self, key: SlotKey, slot_id: Uuid, player_id: String, amount: f64) {
        let ledger = self.ledger.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let ok = credit_with_backoff(ledger.as_ref(), &player_id, amount).await;
            let _ = tx
                .send(Command::CreditSettled {
                    key,
                    slot_id,
                    player_id,
                    amount,
                    ok,
                })
                .await;
        });
    }

    /// Return escrow with backoff; an escrow we cannot return is the same
    /// operational failure as an unpaid payout.
    fn spawn_refund(&self, player_id: String, slot_id: Uuid, amount: f64) {
        let ledger = self.ledger.clone();
        tokio::spawn(async move {
            if !credit_with_backoff(ledger.as_ref(), &player_id, amount).await {
                ledger
                    .flag_credit_reconciliation(&player_id, slot_id, amount)
                    .await;
            }
        });
    }
}

async fn credit_with_backoff(
    ledger: &dyn SettlementLedger,
    player_id: &str,
    amount: f64,
) -> bool {
    for attempt in 0..CREDIT_RETRY_ATTEMPTS {
        match ledger.credit(player_id, amount).await {
            Ok(()) => return true,
            Err(e) => {
                warn!(player_id, amount, attempt, "credit failed: {e}");
                tokio::time::sleep(Duration::from_millis(
                    CREDIT_RETRY_BASE_MS << attempt,
                ))
                .await;
            }
        }
    }
    false
}
