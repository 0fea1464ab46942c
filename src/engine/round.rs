//! Round value object
//!
//! One instance per play cycle. Only the round engine mutates it; the rest
//! of the system sees read-only snapshots. The crash point is fixed at
//! creation from the oracle draw and never changes afterwards; it leaves
//! this module only at reveal time.

use serde::Serialize;
use uuid::Uuid;

use super::clock::GrowthCurve;
use super::oracle::{Draw, RoundSeed};

/// WAITING -> FLYING -> CRASHED, strictly in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Waiting,
    Flying,
    Crashed,
}

#[derive(Debug)]
pub struct Round {
    pub round_id: Uuid,
    pub phase: RoundPhase,
    /// When betting opened (WAITING entry).
    pub created_at_ms: u64,
    /// Scheduled flight start (WAITING expiry).
    pub opens_at_ms: u64,
    /// Actual flight start; set on the WAITING -> FLYING transition.
    pub started_at_ms: Option<u64>,
    /// Set on the FLYING -> CRASHED transition.
    pub ended_at_ms: Option<u64>,
    /// Published commitment hash for the secret seed.
    pub commitment: String,
    /// Crash secret. Revealed only after the crash.
    seed: RoundSeed,
    crash_point: f64,
    /// Flight duration to the crash, pinned from the growth curve at
    /// creation so the crash instant is a single authoritative timestamp.
    crash_after_ms: u64,
}

impl Round {
    pub fn create(draw: Draw, curve: &GrowthCurve, now_ms: u64, waiting_ms: u64) -> Self {
        let crash_after_ms = curve.crossing_ms(draw.crash_point);
        Self {
            round_id: Uuid::new_v4(),
            phase: RoundPhase::Waiting,
            created_at_ms: now_ms,
            opens_at_ms: now_ms + waiting_ms,
            started_at_ms: None,
            ended_at_ms: None,
            commitment: draw.seed.commitment(),
            seed: draw.seed,
            crash_point: draw.crash_point,
            crash_after_ms,
        }
    }

    /// Authoritative crash instant, defined once the flight has started.
    pub fn crash_at_ms(&self) -> Option<u64> {
        self.started_at_ms.map(|s| s + self.crash_after_ms)
    }

    /// Server-side multiplier at `now_ms`, derived from elapsed flight
    /// time. 1.00 before the flight starts. Never reaches the crash point:
    /// the caller must have handled the crash transition first.
    pub fn multiplier_at(&self, curve: &GrowthCurve, now_ms: u64) -> f64 {
        match self.started_at_ms {
            Some(started) if now_ms > started => {
                curve.multiplier_at(now_ms - started).min(self.crash_point)
            }
            _ => 1.0,
        }
    }

    /// Whether the authoritative clock has passed the crash instant.
    pub fn crashed_by(&self, now_ms: u64) -> bool {
        matches!(self.crash_at_ms(), Some(at) if now_ms >= at)
    }

    /// Crash point, readable by the engine only. Callers outside the
    /// engine must go through the reveal.
    pub(super) fn crash_point(&self) -> f64 {
        self.crash_point
    }

    /// Reveal the secret once the round has crashed.
    pub fn reveal(&self) -> Option<(f64, String, u64)> {
        match self.phase {
            RoundPhase::Crashed => Some((
                self.crash_point,
                self.seed.seed_hex(),
                self.seed.nonce,
            )),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(super) fn force_crash_point(&mut self, curve: &GrowthCurve, crash_point: f64) {
        self.crash_point = crash_point;
        self.crash_after_ms = curve.crossing_ms(crash_point);
    }
}
