use serde::{Deserialize, Serialize};

/// Counter snapshot: cumulative page counts for one machine at one point in time.
///
/// Four categories: monochrome A4, color A4, monochrome A3, color A3.
///
/// Invariants:
/// - All fields are non-negative (u64)
/// - Counts are monotonically non-decreasing across a machine's life,
///   except across a meter reset (not modeled; see `regressions`)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Monochrome A4 count
    pub bw: u64,

    /// Color A4 count
    pub col: u64,

    /// Monochrome A3 count
    pub bw_a3: u64,

    /// Color A3 count
    pub col_a3: u64,
}

impl CounterSnapshot {
    pub fn new(bw: u64, col: u64, bw_a3: u64, col_a3: u64) -> Self {
        CounterSnapshot {
            bw,
            col,
            bw_a3,
            col_a3,
        }
    }

    /// All-zero snapshot (machine fresh from acquisition)
    pub fn zero() -> Self {
        CounterSnapshot::default()
    }

    pub fn is_zero(&self) -> bool {
        self.bw == 0 && self.col == 0 && self.bw_a3 == 0 && self.col_a3 == 0
    }
}

/// Per-field meter regression flags.
///
/// A regression means the current reading is below the previous one
/// (meter rollback or operator error). The clamped usage for that field
/// is zero; these flags keep the bad reading visible to operators instead
/// of silently masking it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegressionFlags {
    pub bw: bool,
    pub col: bool,
    pub bw_a3: bool,
    pub col_a3: bool,
}

impl RegressionFlags {
    pub fn any(&self) -> bool {
        self.bw || self.col || self.bw_a3 || self.col_a3
    }
}

/// A3-normalized usage: A4-equivalent page counts per color channel.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConvertedUsage {
    pub bw: u64,
    pub col: u64,
}

/// Compute per-category raw usage from a previous/current counter pair.
///
/// Each field is `max(0, curr - prev)`: negative deltas are clamped to zero.
/// Pure and total. Callers that need visibility into clamping must use
/// `regressions` on the same pair.
pub fn compute_usage(prev: &CounterSnapshot, curr: &CounterSnapshot) -> CounterSnapshot {
    CounterSnapshot {
        bw: curr.bw.saturating_sub(prev.bw),
        col: curr.col.saturating_sub(prev.col),
        bw_a3: curr.bw_a3.saturating_sub(prev.bw_a3),
        col_a3: curr.col_a3.saturating_sub(prev.col_a3),
    }
}

/// Detect meter regressions in a previous/current counter pair.
///
/// A field is flagged when `curr < prev`. Advisory: never blocks billing.
pub fn regressions(prev: &CounterSnapshot, curr: &CounterSnapshot) -> RegressionFlags {
    RegressionFlags {
        bw: curr.bw < prev.bw,
        col: curr.col < prev.col,
        bw_a3: curr.bw_a3 < prev.bw_a3,
        col_a3: curr.col_a3 < prev.col_a3,
    }
}

/// Convert A3 page counts into A4-equivalent units per color channel.
///
/// `converted = usage + usage_a3 * weight`; a weight of zero is treated
/// as 1. A3 and A4 are never billed as separate tiers.
pub fn normalize_a3(usage: &CounterSnapshot, weight_bw: u64, weight_col: u64) -> ConvertedUsage {
    let w_bw = if weight_bw == 0 { 1 } else { weight_bw };
    let w_col = if weight_col == 0 { 1 } else { weight_col };
    ConvertedUsage {
        bw: usage.bw.saturating_add(usage.bw_a3.saturating_mul(w_bw)),
        col: usage.col.saturating_add(usage.col_a3.saturating_mul(w_col)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_usage_basic() {
        let prev = CounterSnapshot::new(100, 20, 0, 0);
        let curr = CounterSnapshot::new(150, 25, 3, 1);
        let usage = compute_usage(&prev, &curr);
        assert_eq!(usage, CounterSnapshot::new(50, 5, 3, 1));
    }

    #[test]
    fn test_compute_usage_clamps_negative_delta() {
        let prev = CounterSnapshot::new(200, 50, 10, 5);
        let curr = CounterSnapshot::new(190, 60, 10, 4);
        let usage = compute_usage(&prev, &curr);
        assert_eq!(usage.bw, 0);
        assert_eq!(usage.col, 10);
        assert_eq!(usage.bw_a3, 0);
        assert_eq!(usage.col_a3, 0);
    }

    #[test]
    fn test_regressions_flag_clamped_fields() {
        let prev = CounterSnapshot::new(200, 50, 10, 5);
        let curr = CounterSnapshot::new(190, 60, 10, 4);
        let flags = regressions(&prev, &curr);
        assert!(flags.bw);
        assert!(!flags.col);
        assert!(!flags.bw_a3);
        assert!(flags.col_a3);
        assert!(flags.any());
    }

    #[test]
    fn test_regressions_none_on_monotonic_pair() {
        let prev = CounterSnapshot::new(100, 20, 0, 0);
        let curr = CounterSnapshot::new(150, 25, 3, 1);
        assert!(!regressions(&prev, &curr).any());
    }

    #[test]
    fn test_normalize_a3_applies_weight() {
        let usage = CounterSnapshot::new(100, 10, 5, 2);
        let converted = normalize_a3(&usage, 2, 2);
        assert_eq!(converted.bw, 110);
        assert_eq!(converted.col, 14);
    }

    #[test]
    fn test_normalize_a3_zero_weight_treated_as_one() {
        let usage = CounterSnapshot::new(100, 10, 5, 2);
        let converted = normalize_a3(&usage, 0, 0);
        assert_eq!(converted.bw, 105);
        assert_eq!(converted.col, 12);
    }
}
