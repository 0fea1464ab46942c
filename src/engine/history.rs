//! Outcome history
//!
//! Bounded, newest-first record of past crash points, appended once per
//! round at the crash boundary and never mutated afterwards. Consumers
//! (history bar, statistical audits, the fairness verifier) read clones.

use std::collections::VecDeque;

use serde::Serialize;
use uuid::Uuid;

/// Immutable record of one finished round.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRecord {
    pub round_id: Uuid,
    pub crash_point: f64,
    pub ended_at_ms: u64,
    /// Revealed commit-reveal secret, kept with the outcome so past rounds
    /// stay verifiable.
    pub seed_hex: String,
    pub nonce: u64,
}

#[derive(Debug)]
pub struct OutcomeHistory {
    depth: usize,
    records: VecDeque<OutcomeRecord>,
}

impl OutcomeHistory {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            records: VecDeque::with_capacity(depth.max(1)),
        }
    }

    /// Append the latest outcome, evicting the oldest past the depth.
    pub fn record(&mut self, record: OutcomeRecord) {
        self.records.push_front(record);
        self.records.truncate(self.depth);
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<OutcomeRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(crash_point: f64, ended_at_ms: u64) -> OutcomeRecord {
        OutcomeRecord {
            round_id: Uuid::new_v4(),
            crash_point,
            ended_at_ms,
            seed_hex: String::new(),
            nonce: 0,
        }
    }

    #[test]
    fn bounded_and_newest_first() {
        let mut history = OutcomeHistory::new(3);
        for i in 0..5 {
            history.record(record(1.0 + i as f64, i));
        }
        let recent = history.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].crash_point, 5.0);
        assert_eq!(recent[2].crash_point, 3.0);
    }
}
