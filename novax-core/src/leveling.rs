//! Mapping between cumulative experience and levels.
//!
//! Level 1 needs `base_exp` points to clear; every following level needs
//! `step_exp` more than the one before it. So clearing level `n` costs
//! `base_exp + (n - 1) * step_exp`, and reaching level `L` costs the sum of
//! those thresholds for every level below `L`.

use crate::config::LevelingConfig;
use crate::error::{Error, Result};
use serde::Serialize;

/// Threshold schedule for levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelSchedule {
    base_exp: u64,
    step_exp: u64,
}

/// Where a total falls within the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelProgress {
    pub level: u32,
    pub total_exp: u64,
    /// Cumulative experience at which the current level starts
    pub level_floor_exp: u64,
    /// Cumulative experience at which the next level starts
    pub next_level_exp: u64,
    pub exp_into_level: u64,
    pub exp_to_next_level: u64,
}

impl Default for LevelSchedule {
    fn default() -> Self {
        Self {
            base_exp: 500,
            step_exp: 300,
        }
    }
}

impl LevelSchedule {
    /// Build a schedule. `base_exp` must be positive or every total
    /// would map to an unbounded level.
    pub fn new(base_exp: u64, step_exp: u64) -> Result<Self> {
        if base_exp == 0 {
            return Err(Error::Config(
                "leveling.base_exp must be greater than zero".to_string(),
            ));
        }
        Ok(Self { base_exp, step_exp })
    }

    pub fn from_config(config: &LevelingConfig) -> Result<Self> {
        Self::new(config.base_exp, config.step_exp)
    }

    pub fn base_exp(&self) -> u64 {
        self.base_exp
    }

    pub fn step_exp(&self) -> u64 {
        self.step_exp
    }

    /// Points needed to clear `level` once it has been reached.
    pub fn threshold(&self, level: u32) -> u64 {
        let n = u64::from(level.max(1) - 1);
        self.base_exp
            .saturating_add(n.saturating_mul(self.step_exp))
    }

    /// Cumulative experience required to reach the start of `level`.
    ///
    /// `level_to_exp(1) == 0`; levels below 1 are treated as 1. Levels
    /// above [`max_level`](Self::max_level) cost more than any `u64` total
    /// and report `u64::MAX`.
    pub fn level_to_exp(&self, level: u32) -> u64 {
        u64::try_from(self.floor_exp(level)).unwrap_or(u64::MAX)
    }

    /// Highest level any `u64` total can reach. `exp_to_level` never
    /// returns more, and `exp_to_level(level_to_exp(l)) == l` holds for
    /// every level up to it.
    pub fn max_level(&self) -> u32 {
        self.exp_to_level(u64::MAX)
    }

    /// Highest level whose cumulative requirement `total` covers.
    ///
    /// Never returns less than 1.
    pub fn exp_to_level(&self, total: u64) -> u32 {
        // floor_exp is strictly increasing while base_exp > 0, so the
        // answer is the last level whose floor is <= total.
        let total = u128::from(total);
        let (mut lo, mut hi) = (1u32, u32::MAX);
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if self.floor_exp(mid) <= total {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        lo
    }

    /// Exact cumulative requirement. Fits: base and step are below 2^64
    /// and `level - 1` below 2^32.
    fn floor_exp(&self, level: u32) -> u128 {
        if level <= 1 {
            return 0;
        }
        let n = u128::from(level - 1);
        u128::from(self.base_exp) * n + u128::from(self.step_exp) * (n * (n - 1) / 2)
    }

    pub fn progress(&self, total_exp: u64) -> LevelProgress {
        let level = self.exp_to_level(total_exp);
        let level_floor_exp = self.level_to_exp(level);
        let next_level_exp = self.level_to_exp(level.saturating_add(1));
        LevelProgress {
            level,
            total_exp,
            level_floor_exp,
            next_level_exp,
            exp_into_level: total_exp - level_floor_exp,
            exp_to_next_level: next_level_exp.saturating_sub(total_exp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Subtract thresholds one level at a time.
    fn stepwise_level(schedule: &LevelSchedule, mut total: u64) -> u32 {
        let mut level = 1;
        let mut required = schedule.base_exp;
        while total >= required {
            total -= required;
            level += 1;
            required += schedule.step_exp;
        }
        level
    }

    #[test]
    fn zero_exp_is_level_one() {
        let schedule = LevelSchedule::default();
        assert_eq!(schedule.exp_to_level(0), 1);
        assert_eq!(schedule.level_to_exp(1), 0);
        assert_eq!(schedule.level_to_exp(0), 0);
    }

    #[test]
    fn default_schedule_thresholds() {
        let schedule = LevelSchedule::default();
        assert_eq!(schedule.level_to_exp(2), 500);
        assert_eq!(schedule.level_to_exp(3), 1300);
        assert_eq!(schedule.level_to_exp(4), 2400);
        assert_eq!(schedule.exp_to_level(499), 1);
        assert_eq!(schedule.exp_to_level(500), 2);
        assert_eq!(schedule.exp_to_level(1299), 2);
        assert_eq!(schedule.exp_to_level(1300), 3);
        assert_eq!(schedule.threshold(3), 1100);
    }

    #[test]
    fn matches_stepwise_subtraction() {
        for schedule in [
            LevelSchedule::default(),
            LevelSchedule::new(1, 0).unwrap(),
            LevelSchedule::new(7, 3).unwrap(),
        ] {
            for total in (0..20_000).step_by(37) {
                assert_eq!(
                    schedule.exp_to_level(total),
                    stepwise_level(&schedule, total),
                    "total {total} with {schedule:?}"
                );
            }
        }
    }

    #[test]
    fn round_trips_from_level() {
        let schedule = LevelSchedule::new(120, 45).unwrap();
        for level in 1..500 {
            assert_eq!(schedule.exp_to_level(schedule.level_to_exp(level)), level);
        }
    }

    #[test]
    fn total_lies_within_its_level_band() {
        let schedule = LevelSchedule::default();
        for total in (0..100_000).step_by(113) {
            let level = schedule.exp_to_level(total);
            assert!(schedule.level_to_exp(level) <= total);
            assert!(total < schedule.level_to_exp(level + 1));
        }
    }

    #[test]
    fn exp_to_level_is_non_decreasing() {
        let schedule = LevelSchedule::default();
        let mut previous = 1;
        for total in 0..10_000 {
            let level = schedule.exp_to_level(total);
            assert!(level >= previous);
            previous = level;
        }
    }

    #[test]
    fn huge_totals_do_not_overflow() {
        let schedule = LevelSchedule::default();
        let max = schedule.max_level();
        assert!(max > 1 && max < u32::MAX);
        assert_eq!(schedule.exp_to_level(u64::MAX), max);
        assert!(schedule.level_to_exp(max) < u64::MAX);
        assert_eq!(schedule.level_to_exp(max + 1), u64::MAX);
        assert_eq!(schedule.level_to_exp(u32::MAX), u64::MAX);
    }

    #[test]
    fn round_trips_up_to_the_max_level() {
        let schedule = LevelSchedule::default();
        let max = schedule.max_level();
        for level in [max - 1_000_000, max - 1, max, 400_000_000.min(max)] {
            assert_eq!(schedule.exp_to_level(schedule.level_to_exp(level)), level);
        }
        // Past the max, totals stop at the max level
        assert_eq!(
            schedule.exp_to_level(schedule.level_to_exp(400_000_000)),
            max
        );
    }

    #[test]
    fn tiny_schedules_reach_every_level() {
        let schedule = LevelSchedule::new(1, 0).unwrap();
        assert_eq!(schedule.max_level(), u32::MAX);
        assert_eq!(
            schedule.exp_to_level(schedule.level_to_exp(u32::MAX)),
            u32::MAX
        );
    }

    #[test]
    fn progress_reports_band() {
        let schedule = LevelSchedule::default();
        let progress = schedule.progress(800);
        assert_eq!(progress.level, 2);
        assert_eq!(progress.level_floor_exp, 500);
        assert_eq!(progress.next_level_exp, 1300);
        assert_eq!(progress.exp_into_level, 300);
        assert_eq!(progress.exp_to_next_level, 500);
    }

    #[test]
    fn zero_base_is_rejected() {
        assert!(matches!(LevelSchedule::new(0, 300), Err(Error::Config(_))));
    }
}
