//! Crash round engine
//!
//! Server-authoritative multiplier wagering: one shared round advances on
//! a fixed tick, every connected player bets against it, and the outcome
//! is committed (hashed) before betting closes and revealed after the
//! crash. The supervisor task is the only writer; everything else reads
//! broadcasts and snapshots.

pub mod clock;
pub mod core;
pub mod error;
pub mod history;
pub mod messages;
pub mod oracle;
pub mod round;
pub mod slot;
pub mod supervisor;

pub use self::core::{EngineConfig, RoundEngine};
pub use clock::GrowthCurve;
pub use error::Rejection;
pub use history::OutcomeRecord;
pub use messages::{RoundSnapshot, WsClientCommand, WsServerEvent};
pub use oracle::{crash_point, CrashParams, CrashPointOracle};
pub use round::RoundPhase;
pub use slot::{SlotStatus, WagerSlot};
pub use supervisor::SupervisorHandle;

/// Server clock in unix milliseconds; the only notion of "now" the round
/// timeline ever uses.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
