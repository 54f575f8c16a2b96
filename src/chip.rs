// 💳 Patient Chip - the storage region embedded in an identity card
//
// Two regions share a fixed byte budget:
// - Critical block: identity, blood type, allergies, chronic conditions (never evicted)
// - Visit history: circular buffer of encoded visits (bounded by entry count)

use crate::capacity::{self, StorageUsage};
use crate::history::{HistoryBuffer, DEFAULT_MAX_VISITS};
use crate::record::VisitRecord;
use serde::{Deserialize, Serialize};

pub const CRITICAL_BLOCK_BYTES: usize = 1024;
pub const TOTAL_CAPACITY_BYTES: usize = 30720;

// ============================================================================
// CHIP LAYOUT
// ============================================================================

/// Fixed geometry of a chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChipLayout {
    critical_block_bytes: usize,
    total_capacity_bytes: usize,
    max_visit_count: usize,
}

impl ChipLayout {
    /// None when the total is zero, cannot hold the critical block, or no
    /// visit slot exists
    pub fn new(
        critical_block_bytes: usize,
        total_capacity_bytes: usize,
        max_visit_count: usize,
    ) -> Option<Self> {
        if total_capacity_bytes == 0
            || critical_block_bytes > total_capacity_bytes
            || max_visit_count == 0
        {
            return None;
        }
        Some(ChipLayout {
            critical_block_bytes,
            total_capacity_bytes,
            max_visit_count,
        })
    }

    pub fn critical_block_bytes(&self) -> usize {
        self.critical_block_bytes
    }

    pub fn total_capacity_bytes(&self) -> usize {
        self.total_capacity_bytes
    }

    pub fn max_visit_count(&self) -> usize {
        self.max_visit_count
    }
}

impl Default for ChipLayout {
    fn default() -> Self {
        ChipLayout {
            critical_block_bytes: CRITICAL_BLOCK_BYTES,
            total_capacity_bytes: TOTAL_CAPACITY_BYTES,
            max_visit_count: DEFAULT_MAX_VISITS,
        }
    }
}

// ============================================================================
// CRITICAL BLOCK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalBlock {
    /// Identity-card number, the lookup key
    pub identity: String,
    pub name: String,
    pub blood_type: String,
    #[serde(default)]
    pub allergies: Vec<String>,
    /// Diagnosis codes of chronic conditions
    #[serde(default)]
    pub chronic_conditions: Vec<String>,
}

impl CriticalBlock {
    pub fn new(identity: impl Into<String>, name: impl Into<String>, blood_type: impl Into<String>) -> Self {
        CriticalBlock {
            identity: identity.into(),
            name: name.into(),
            blood_type: blood_type.into(),
            allergies: Vec::new(),
            chronic_conditions: Vec::new(),
        }
    }

    pub fn with_allergy(mut self, allergy: impl Into<String>) -> Self {
        self.allergies.push(allergy.into());
        self
    }

    pub fn with_chronic(mut self, code: impl Into<String>) -> Self {
        self.chronic_conditions.push(code.into());
        self
    }
}

// ============================================================================
// PATIENT CHIP
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PatientChip {
    critical: CriticalBlock,
    layout: ChipLayout,
    history: HistoryBuffer,
}

impl PatientChip {
    pub fn new(critical: CriticalBlock, layout: ChipLayout) -> Self {
        PatientChip {
            critical,
            layout,
            history: HistoryBuffer::new(layout.max_visit_count()),
        }
    }

    /// Chip with an existing visit sequence, oldest first
    pub fn with_visits<I>(critical: CriticalBlock, layout: ChipLayout, visits: I) -> Self
    where
        I: IntoIterator<Item = VisitRecord>,
    {
        PatientChip {
            critical,
            layout,
            history: HistoryBuffer::from_records(layout.max_visit_count(), visits),
        }
    }

    pub fn identity(&self) -> &str {
        &self.critical.identity
    }

    pub fn critical(&self) -> &CriticalBlock {
        &self.critical
    }

    pub fn layout(&self) -> ChipLayout {
        self.layout
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    /// Append through the circular buffer; returns the evicted record, if any
    pub fn append_visit(&mut self, record: VisitRecord) -> Option<VisitRecord> {
        self.history.append(record)
    }

    pub fn visit_count(&self) -> usize {
        self.history.len()
    }

    pub fn usage(&self) -> StorageUsage {
        capacity::usage(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::VisitCodec;
    use crate::dictionary::CodeBook;

    #[test]
    fn test_layout_validation() {
        assert!(ChipLayout::new(1024, 30720, 200).is_some());
        assert!(ChipLayout::new(0, 0, 200).is_none());
        assert!(ChipLayout::new(2048, 1024, 200).is_none());
        assert!(ChipLayout::new(1024, 30720, 0).is_none());
        assert!(ChipLayout::new(1024, 30720, 1).is_some());
        assert_eq!(ChipLayout::default(), ChipLayout::new(1024, 30720, 200).unwrap());
    }

    #[test]
    fn test_chip_respects_layout_bound() {
        let codec = VisitCodec::new(CodeBook::standard());
        let layout = ChipLayout::new(1024, 30720, 2).unwrap();
        let critical = CriticalBlock::new("750310-03-4521", "Kumar a/l Ramasamy", "B+");

        let mut chip = PatientChip::new(critical, layout);
        chip.append_visit(codec.record("260101", "R51", "N02BA01").unwrap());
        chip.append_visit(codec.record("260102", "J00", "R06AE07").unwrap());
        let evicted = chip.append_visit(codec.record("260103", "R50", "N02BE01").unwrap());

        assert_eq!(evicted.map(|r| r.date().to_string()), Some("260101".to_string()));
        assert_eq!(chip.visit_count(), 2);
        assert_eq!(chip.identity(), "750310-03-4521");
    }

    #[test]
    fn test_critical_block_builder() {
        let block = CriticalBlock::new("920815-01-5234", "Ahmad bin Abdullah", "O+")
            .with_allergy("Penicillin")
            .with_chronic("E11")
            .with_chronic("I10");

        assert_eq!(block.allergies, vec!["Penicillin".to_string()]);
        assert_eq!(block.chronic_conditions.len(), 2);
    }
}
