// 📊 Capacity Accountant
//
// Byte accounting for a chip. The byte budget is advisory: going over it is
// reported (negative availability), never enforced. Only the entry-count bound
// of the history buffer evicts.

use crate::chip::{ChipLayout, PatientChip};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StorageUsage {
    pub critical_bytes: usize,
    pub history_bytes: usize,
    /// Negative when over budget
    pub available_bytes: i64,
    /// One decimal place, rounded half away from zero
    pub percent_used: f64,
}

impl StorageUsage {
    /// Usage for a layout and a given history size
    pub fn compute(layout: ChipLayout, history_bytes: usize) -> Self {
        let critical = layout.critical_block_bytes();
        let total = layout.total_capacity_bytes();
        let used = critical + history_bytes;

        StorageUsage {
            critical_bytes: critical,
            history_bytes,
            available_bytes: total as i64 - used as i64,
            percent_used: percent_tenths(used, total) as f64 / 10.0,
        }
    }

    /// Usage of a chip with no visits (shown before any card is read)
    pub fn empty(layout: ChipLayout) -> Self {
        Self::compute(layout, 0)
    }

    pub fn used_bytes(&self) -> usize {
        self.critical_bytes + self.history_bytes
    }

    pub fn is_over_budget(&self) -> bool {
        self.available_bytes < 0
    }

    /// Gauge ratio in [0, 1]
    pub fn ratio(&self) -> f64 {
        (self.percent_used / 100.0).clamp(0.0, 1.0)
    }
}

/// Pure usage report for a chip
pub fn usage(chip: &PatientChip) -> StorageUsage {
    StorageUsage::compute(chip.layout(), chip.history().encoded_bytes())
}

// used / total * 1000, rounded half away from zero, in integers so that
// exact halves are not lost to binary floating point
fn percent_tenths(used: usize, total: usize) -> u64 {
    if total == 0 {
        return 0;
    }
    let numerator = used as u128 * 1000;
    let total = total as u128;
    let quotient = numerator / total;
    let remainder = numerator % total;
    let rounded = if remainder * 2 >= total {
        quotient + 1
    } else {
        quotient
    };
    rounded as u64
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::CriticalBlock;
    use crate::codec::VisitCodec;
    use crate::dictionary::CodeBook;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_history_usage() {
        let layout = ChipLayout::default();
        let chip = PatientChip::new(CriticalBlock::new("x", "x", "O+"), layout);
        let usage = usage(&chip);

        assert_eq!(usage.history_bytes, 0);
        assert_eq!(usage.critical_bytes, 1024);
        assert_eq!(usage.available_bytes, 29696);
        // 1024 / 30720 * 100 = 3.333..
        assert_eq!(usage.percent_used, 3.3);
        assert_eq!(usage, StorageUsage::empty(layout));
    }

    #[test]
    fn test_usage_with_visits() {
        let codec = VisitCodec::new(CodeBook::standard());
        let chip = PatientChip::with_visits(
            CriticalBlock::new("x", "x", "O+"),
            ChipLayout::default(),
            vec![
                codec.record("251105", "E11", "A10BA02").unwrap(),
                codec.record("251120", "I10", "C09AA02").unwrap(),
                codec.record("251201", "R50", "N02BE01").unwrap(),
            ],
        );
        let usage = chip.usage();

        assert_eq!(usage.history_bytes, 54);
        assert_eq!(usage.used_bytes(), 1078);
        assert_eq!(usage.available_bytes, 30720 - 1078);
        assert_eq!(usage.percent_used, 3.5);
    }

    #[test]
    fn test_round_half_away_from_zero() {
        // 1 / 8 = 12.5% -> 125 tenths exactly
        assert_eq!(percent_tenths(1, 8), 125);
        // 1 / 16 = 6.25% -> 62.5 tenths -> 63
        assert_eq!(percent_tenths(1, 16), 63);
        // 1 / 3 = 33.33% -> 333
        assert_eq!(percent_tenths(1, 3), 333);
        // 2 / 3 = 66.67% -> 667
        assert_eq!(percent_tenths(2, 3), 667);
        assert_eq!(percent_tenths(0, 100), 0);
    }

    #[test]
    fn test_over_budget_is_reported_not_clamped() {
        let layout = ChipLayout::new(90, 100, 200).unwrap();
        let usage = StorageUsage::compute(layout, 30);

        assert_eq!(usage.available_bytes, -20);
        assert!(usage.is_over_budget());
        assert_eq!(usage.percent_used, 120.0);
        assert_eq!(usage.ratio(), 1.0);
    }
}
