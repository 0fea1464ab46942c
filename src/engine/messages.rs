//! Wire contracts
//!
//! Server push events, client commands, and the read-only round snapshot.
//! Everything the UI knows about a round comes from these payloads; the
//! client is a pure renderer of broadcast state and its local timer is
//! never trusted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::Rejection;
use super::history::OutcomeRecord;
use super::round::RoundPhase;

/// Events pushed to every connected client (tagged JSON).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerEvent {
    /// WAITING entry. The commitment hash is published before any bet can
    /// be influenced by the outcome.
    RoundWaiting {
        round_id: Uuid,
        opens_at_ms: u64,
        commitment: String,
    },
    /// Every tick while FLYING.
    RoundTick {
        round_id: Uuid,
        multiplier: f64,
        elapsed_ms: u64,
        server_ts_ms: u64,
    },
    /// CRASHED entry: outcome and secret revealed.
    RoundCrashed {
        round_id: Uuid,
        crash_point: f64,
        seed_hex: String,
        nonce: u64,
    },
    BetAccepted {
        slot_id: Uuid,
        player_id: String,
        slot_index: usize,
        stake: f64,
    },
    BetRejected {
        player_id: String,
        slot_index: usize,
        reason: Rejection,
    },
    CashOutAccepted {
        slot_id: Uuid,
        player_id: String,
        slot_index: usize,
        multiplier: f64,
        payout: f64,
    },
    CashOutRejected {
        player_id: String,
        slot_index: usize,
        reason: Rejection,
    },
    BetCancelled {
        slot_id: Uuid,
        player_id: String,
        slot_index: usize,
        refund: f64,
    },
    /// Replayed to a freshly connected client so the UI is never empty.
    Snapshot { snapshot: RoundSnapshot },
    History { outcomes: Vec<OutcomeRecord> },
}

/// Commands consumed from clients (tagged JSON). Each is acknowledged on
/// the issuing socket with a success or rejection event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientCommand {
    PlaceBet {
        player_id: String,
        slot_index: usize,
        amount: f64,
    },
    CashOut {
        player_id: String,
        slot_index: usize,
    },
    CancelBet {
        player_id: String,
        slot_index: usize,
    },
}

/// Read-only view of the current round for REST and reconnect replay.
#[derive(Debug, Clone, Serialize)]
pub struct RoundSnapshot {
    pub round_id: Uuid,
    pub phase: RoundPhase,
    pub multiplier: f64,
    pub elapsed_ms: u64,
    pub opens_at_ms: u64,
    pub commitment: String,
    /// Present only once the round has crashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_point: Option<f64>,
    pub server_ts_ms: u64,
}
