//! Three-segment emission schedule and its closed-form integral.

use serde::{Deserialize, Serialize};

use trellis_core::scale::mul_div;
use trellis_core::types::{Amount, BlockNumber};
use trellis_core::{LedgerError, Result};

/// Piecewise emission curve over block height.
///
/// | Segment | Blocks | Rate per block |
/// |---------|--------|----------------|
/// | bootstrap | `[0, phase1_end]` | `phase1_rate` |
/// | taper | `(phase1_end, phase2_start)` | linear between the two rates |
/// | tail | `[phase2_start, ∞)` | `phase2_rate` |
///
/// Construction validates the shape once; a schedule value is immutable
/// afterwards. Swapping the live schedule is the mint stream's job, which
/// settles accrued rewards up to the swap block first so past blocks keep
/// the rates they were emitted under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionSchedule {
    phase1_end: BlockNumber,
    phase2_start: BlockNumber,
    phase1_rate: Amount,
    phase2_rate: Amount,
}

impl EmissionSchedule {
    /// Builds a schedule, rejecting shapes the integral cannot handle:
    /// an empty taper window or a rate that rises instead of decaying.
    pub fn new(
        phase1_end: BlockNumber,
        phase2_start: BlockNumber,
        phase1_rate: Amount,
        phase2_rate: Amount,
    ) -> Result<Self> {
        if phase2_start <= phase1_end {
            return Err(LedgerError::ScheduleInvalid(format!(
                "phase2 start {phase2_start} must come after phase1 end {phase1_end}"
            )));
        }
        if phase2_rate > phase1_rate {
            return Err(LedgerError::ScheduleInvalid(format!(
                "emission must decay: tail rate {phase2_rate} exceeds bootstrap rate {phase1_rate}"
            )));
        }
        Ok(Self { phase1_end, phase2_start, phase1_rate, phase2_rate })
    }

    pub fn phase1_end(&self) -> BlockNumber {
        self.phase1_end
    }

    pub fn phase2_start(&self) -> BlockNumber {
        self.phase2_start
    }

    pub fn phase1_rate(&self) -> Amount {
        self.phase1_rate
    }

    pub fn phase2_rate(&self) -> Amount {
        self.phase2_rate
    }

    /// Per-block emission rate at `block`, truncating on the taper.
    pub fn rate_at(&self, block: BlockNumber) -> Result<Amount> {
        if block <= self.phase1_end {
            return Ok(self.phase1_rate);
        }
        if block >= self.phase2_start {
            return Ok(self.phase2_rate);
        }
        let span = (self.phase2_start - self.phase1_end) as u128;
        let into = (block - self.phase1_end) as u128;
        let drop = mul_div(into, self.phase1_rate - self.phase2_rate, span)?;
        Ok(self.phase1_rate - drop)
    }

    /// Total emission over the half-open block range `[from, to)`.
    ///
    /// The two flat segments contribute `width * rate` exactly; the taper
    /// contributes a trapezoid, `width * (rate(start) + rate(end)) / 2`,
    /// truncating toward zero. Splitting a query at a segment boundary is
    /// exact; splitting inside the taper can differ from the direct query
    /// by truncation dust bounded by the taper width.
    pub fn rewards_in_range(&self, from: BlockNumber, to: BlockNumber) -> Result<Amount> {
        if to <= from {
            return Ok(0);
        }
        let mut total: Amount = 0;

        // Bootstrap segment.
        if self.phase1_end > from {
            let seg_end = to.min(self.phase1_end);
            let width = (seg_end - from) as u128;
            let part = width.checked_mul(self.phase1_rate).ok_or(LedgerError::AmountOverflow)?;
            total = total.checked_add(part).ok_or(LedgerError::AmountOverflow)?;
        }

        // Taper segment.
        let ramp_from = from.max(self.phase1_end);
        let ramp_to = to.min(self.phase2_start);
        if ramp_to > ramp_from {
            let width = (ramp_to - ramp_from) as u128;
            let edges = self
                .rate_at(ramp_from)?
                .checked_add(self.rate_at(ramp_to)?)
                .ok_or(LedgerError::AmountOverflow)?;
            let part = width.checked_mul(edges).ok_or(LedgerError::AmountOverflow)? / 2;
            total = total.checked_add(part).ok_or(LedgerError::AmountOverflow)?;
        }

        // Tail segment.
        if self.phase2_start < to {
            let seg_start = from.max(self.phase2_start);
            let width = (to - seg_start) as u128;
            let part = width.checked_mul(self.phase2_rate).ok_or(LedgerError::AmountOverflow)?;
            total = total.checked_add(part).ok_or(LedgerError::AmountOverflow)?;
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EmissionSchedule {
        // 10/block until 100, tapering to 2/block from 200 on.
        EmissionSchedule::new(100, 200, 10, 2).unwrap()
    }

    #[test]
    fn rejects_empty_taper_window() {
        assert!(matches!(
            EmissionSchedule::new(200, 200, 10, 2),
            Err(LedgerError::ScheduleInvalid(_))
        ));
        assert!(matches!(
            EmissionSchedule::new(200, 100, 10, 2),
            Err(LedgerError::ScheduleInvalid(_))
        ));
    }

    #[test]
    fn rejects_rising_emission() {
        assert!(matches!(
            EmissionSchedule::new(100, 200, 2, 10),
            Err(LedgerError::ScheduleInvalid(_))
        ));
        // A flat curve is a legal degenerate taper.
        assert!(EmissionSchedule::new(100, 200, 5, 5).is_ok());
    }

    #[test]
    fn rate_is_flat_then_linear_then_flat() {
        let s = sample();
        assert_eq!(s.rate_at(0).unwrap(), 10);
        assert_eq!(s.rate_at(100).unwrap(), 10);
        assert_eq!(s.rate_at(150).unwrap(), 6);
        assert_eq!(s.rate_at(125).unwrap(), 8);
        assert_eq!(s.rate_at(200).unwrap(), 2);
        assert_eq!(s.rate_at(1_000_000).unwrap(), 2);
    }

    #[test]
    fn segment_integrals_match_hand_computation() {
        let s = sample();
        assert_eq!(s.rewards_in_range(0, 100).unwrap(), 1_000); // 100 blocks * 10
        assert_eq!(s.rewards_in_range(100, 200).unwrap(), 600); // trapezoid (10+2)/2 * 100
        assert_eq!(s.rewards_in_range(200, 300).unwrap(), 200); // 100 blocks * 2
        assert_eq!(s.rewards_in_range(0, 300).unwrap(), 1_800);
    }

    #[test]
    fn empty_and_inverted_ranges_emit_nothing() {
        let s = sample();
        assert_eq!(s.rewards_in_range(50, 50).unwrap(), 0);
        assert_eq!(s.rewards_in_range(300, 250).unwrap(), 0);
    }

    #[test]
    fn splitting_at_segment_boundaries_is_exact() {
        let s = sample();
        let whole = s.rewards_in_range(0, 300).unwrap();
        let parts = s.rewards_in_range(0, 100).unwrap()
            + s.rewards_in_range(100, 200).unwrap()
            + s.rewards_in_range(200, 300).unwrap();
        assert_eq!(whole, parts);
    }

    #[test]
    fn splitting_inside_the_taper_drifts_by_truncation_only() {
        let s = sample();
        // The integer rate at 101 is still 10 (the 0.08 drop truncates away),
        // so two trapezoids overcount the direct one by a few units.
        let direct = s.rewards_in_range(100, 200).unwrap();
        let split = s.rewards_in_range(100, 101).unwrap() + s.rewards_in_range(101, 200).unwrap();
        assert_eq!(direct, 600);
        assert_eq!(split, 10 + 594);
        assert!(split.abs_diff(direct) <= 100); // bounded by taper width
    }

    #[test]
    fn ranges_straddling_all_segments_accumulate_each_piece() {
        let s = sample();
        // [50, 250) = 50 bootstrap blocks + full taper + 50 tail blocks.
        assert_eq!(s.rewards_in_range(50, 250).unwrap(), 500 + 600 + 100);
        // Entirely inside the tail.
        assert_eq!(s.rewards_in_range(400, 500).unwrap(), 200);
        // Entirely inside the bootstrap.
        assert_eq!(s.rewards_in_range(10, 20).unwrap(), 100);
    }

    proptest::proptest! {
        #[test]
        fn integral_is_monotone_in_range_width(to_a in 0u64..10_000, extra in 0u64..10_000) {
            let s = sample();
            let near = s.rewards_in_range(0, to_a).unwrap();
            let far = s.rewards_in_range(0, to_a + extra).unwrap();
            proptest::prop_assert!(far >= near);
        }

        #[test]
        fn cursor_advance_never_over_emits(split in 0u64..400, end in 0u64..400) {
            // Advancing a cursor in two hops never emits more than the
            // taper-width truncation bound allows versus one hop.
            let s = sample();
            let (lo, hi) = if split <= end { (split, end) } else { (end, split) };
            let direct = s.rewards_in_range(0, hi).unwrap();
            let hops = s.rewards_in_range(0, lo).unwrap() + s.rewards_in_range(lo, hi).unwrap();
            proptest::prop_assert!(hops.abs_diff(direct) <= 100);
        }
    }
}
