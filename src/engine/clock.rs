//! Multiplier growth clock
//!
//! A stateless projection of elapsed round time onto the payout multiplier.
//! The curve is evaluated on whole ticks so the server, a reconnecting
//! client, and the fairness verifier all compute the same value for the
//! same elapsed time.

/// Growth configuration: `m(k+1) = m(k) + rate * m(k)^exponent`, one step
/// per `tick_ms` of elapsed time, starting from 1.00.
#[derive(Debug, Clone, Copy)]
pub struct GrowthCurve {
    pub tick_ms: u64,
    pub rate: f64,
    pub exponent: f64,
}

/// Upper bound on curve iterations so a misconfigured (near-zero) rate
/// cannot spin forever while searching for a crossing tick.
const MAX_CURVE_TICKS: u64 = 10_000_000;

impl GrowthCurve {
    /// Multiplier after `elapsed_ms` of flight. Partial ticks do not count;
    /// the value only moves on tick boundaries.
    pub fn multiplier_at(&self, elapsed_ms: u64) -> f64 {
        self.multiplier_at_tick(elapsed_ms / self.tick_ms.max(1))
    }

    /// Multiplier after `ticks` whole ticks.
    pub fn multiplier_at_tick(&self, ticks: u64) -> f64 {
        let mut m = 1.0_f64;
        for _ in 0..ticks.min(MAX_CURVE_TICKS) {
            m += self.rate * m.powf(self.exponent);
        }
        m
    }

    /// First tick index at which the curve reaches `target`. Returns 0 for
    /// targets at or below 1.00 (the round crashes before the first tick).
    pub fn crossing_tick(&self, target: f64) -> u64 {
        let mut m = 1.0_f64;
        let mut tick = 0_u64;
        while m < target && tick < MAX_CURVE_TICKS {
            m += self.rate * m.powf(self.exponent);
            tick += 1;
        }
        tick
    }

    /// Elapsed flight time at which the curve reaches `target`.
    pub fn crossing_ms(&self, target: f64) -> u64 {
        self.crossing_tick(target) * self.tick_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> GrowthCurve {
        GrowthCurve {
            tick_ms: 50,
            rate: 0.006,
            exponent: 1.15,
        }
    }

    #[test]
    fn starts_at_one() {
        assert_eq!(curve().multiplier_at(0), 1.0);
        // Partial tick: still 1.0
        assert_eq!(curve().multiplier_at(49), 1.0);
    }

    #[test]
    fn monotonically_non_decreasing() {
        let c = curve();
        let mut prev = 0.0;
        for elapsed in (0..20_000).step_by(50) {
            let m = c.multiplier_at(elapsed);
            assert!(m >= prev, "multiplier decreased at {}ms", elapsed);
            prev = m;
        }
    }

    #[test]
    fn deterministic_for_same_elapsed() {
        let c = curve();
        assert_eq!(c.multiplier_at(4_321), c.multiplier_at(4_321));
        assert_eq!(c.multiplier_at_tick(777), c.multiplier_at_tick(777));
    }

    #[test]
    fn restartable_from_offset() {
        // Evaluating at an absolute tick equals evaluating tick-by-tick,
        // so a reconnecting client can resume from any elapsed offset.
        let c = curve();
        let direct = c.multiplier_at_tick(120);
        let mut m = 1.0_f64;
        for _ in 0..120 {
            m += c.rate * m.powf(c.exponent);
        }
        assert!((direct - m).abs() < 1e-12);
    }

    #[test]
    fn crossing_tick_is_first_at_or_above_target() {
        let c = curve();
        let target = 2.5;
        let k = c.crossing_tick(target);
        assert!(c.multiplier_at_tick(k) >= target);
        assert!(c.multiplier_at_tick(k - 1) < target);
    }

    #[test]
    fn crossing_tick_zero_for_degenerate_target() {
        assert_eq!(curve().crossing_tick(1.0), 0);
        assert_eq!(curve().crossing_tick(0.5), 0);
    }
}
