// 🔁 Circular History Buffer
//
// Bounded, chronological sequence of visit records. Appending past the bound
// evicts exactly one record: the oldest.

use crate::record::VisitRecord;
use std::collections::VecDeque;
use tracing::debug;

/// Default entry bound for a chip's visit history
pub const DEFAULT_MAX_VISITS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer {
    max_entries: usize,
    entries: VecDeque<VisitRecord>,
}

impl HistoryBuffer {
    /// A bound of zero is raised to one so an append always keeps its record
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        HistoryBuffer {
            max_entries,
            entries: VecDeque::with_capacity(max_entries.min(DEFAULT_MAX_VISITS)),
        }
    }

    /// Replay existing records oldest-first through `append`
    pub fn from_records<I>(max_entries: usize, records: I) -> Self
    where
        I: IntoIterator<Item = VisitRecord>,
    {
        let mut buffer = HistoryBuffer::new(max_entries);
        for record in records {
            buffer.append(record);
        }
        buffer
    }

    /// Append a record, returning the evicted oldest record if the bound was exceeded
    pub fn append(&mut self, record: VisitRecord) -> Option<VisitRecord> {
        self.entries.push_back(record);

        if self.entries.len() > self.max_entries {
            let evicted = self.entries.pop_front();
            if let Some(old) = &evicted {
                debug!(
                    date = old.date(),
                    diagnosis = old.diagnosis_code(),
                    bound = self.max_entries,
                    "history full, evicted oldest visit"
                );
            }
            evicted
        } else {
            None
        }
    }

    /// Oldest to newest
    pub fn chronological(&self) -> impl DoubleEndedIterator<Item = &VisitRecord> + ExactSizeIterator {
        self.entries.iter()
    }

    /// Newest to oldest, for display
    pub fn reverse_chronological(&self) -> impl Iterator<Item = &VisitRecord> + ExactSizeIterator {
        self.entries.iter().rev()
    }

    /// The newest `limit` records, newest first
    pub fn latest(&self, limit: usize) -> Vec<&VisitRecord> {
        self.reverse_chronological().take(limit).collect()
    }

    pub fn oldest(&self) -> Option<&VisitRecord> {
        self.entries.front()
    }

    pub fn newest(&self) -> Option<&VisitRecord> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_entries
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Sum of encoded sizes over every stored record
    pub fn encoded_bytes(&self) -> usize {
        self.entries.iter().map(VisitRecord::encoded_size).sum()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VISITS)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::VisitCodec;
    use crate::dictionary::CodeBook;
    use pretty_assertions::assert_eq;

    /// Distinct record per index: the date carries the sequence number
    fn visit(codec: &VisitCodec, n: usize) -> VisitRecord {
        codec
            .record(&format!("{:06}", n), "R50", "N02BE01")
            .unwrap()
    }

    fn dates<'a>(iter: impl Iterator<Item = &'a VisitRecord>) -> Vec<String> {
        iter.map(|r| r.date().to_string()).collect()
    }

    #[test]
    fn test_append_to_empty_does_not_evict() {
        let codec = VisitCodec::new(CodeBook::standard());
        let mut buffer = HistoryBuffer::default();

        assert!(buffer.append(visit(&codec, 1)).is_none());
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.oldest(), buffer.newest());
    }

    #[test]
    fn test_eviction_bound_at_200() {
        let codec = VisitCodec::new(CodeBook::standard());
        let mut buffer = HistoryBuffer::new(DEFAULT_MAX_VISITS);

        for n in 1..=200 {
            assert!(buffer.append(visit(&codec, n)).is_none());
        }
        assert!(buffer.is_full());

        let evicted = buffer.append(visit(&codec, 201)).unwrap();
        assert_eq!(evicted.date(), "000001");
        assert_eq!(buffer.len(), 200);

        let expected: Vec<String> = (2..=201).map(|n| format!("{:06}", n)).collect();
        assert_eq!(dates(buffer.chronological()), expected);
    }

    #[test]
    fn test_append_at_bound_keeps_length() {
        let codec = VisitCodec::new(CodeBook::standard());
        let mut buffer = HistoryBuffer::from_records(3, (1..=3).map(|n| visit(&codec, n)));

        for n in 4..=10 {
            let evicted = buffer.append(visit(&codec, n));
            assert_eq!(evicted.map(|r| r.date().to_string()), Some(format!("{:06}", n - 3)));
            assert_eq!(buffer.len(), 3);
        }
        assert_eq!(
            dates(buffer.chronological()),
            vec!["000008", "000009", "000010"]
        );
    }

    #[test]
    fn test_reverse_chronological_and_latest() {
        let codec = VisitCodec::new(CodeBook::standard());
        let buffer = HistoryBuffer::from_records(10, (1..=4).map(|n| visit(&codec, n)));

        assert_eq!(
            dates(buffer.reverse_chronological()),
            vec!["000004", "000003", "000002", "000001"]
        );
        assert_eq!(dates(buffer.latest(2).into_iter()), vec!["000004", "000003"]);
        assert_eq!(buffer.latest(99).len(), 4);

        // Projections never mutate
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.newest().map(|r| r.date()), Some("000004"));
    }

    #[test]
    fn test_from_records_over_bound_keeps_newest() {
        let codec = VisitCodec::new(CodeBook::standard());
        let buffer = HistoryBuffer::from_records(2, (1..=5).map(|n| visit(&codec, n)));
        assert_eq!(dates(buffer.chronological()), vec!["000004", "000005"]);
    }

    #[test]
    fn test_zero_bound_still_keeps_newest() {
        let codec = VisitCodec::new(CodeBook::standard());
        let mut buffer = HistoryBuffer::new(0);
        assert_eq!(buffer.max_entries(), 1);

        assert!(buffer.append(visit(&codec, 1)).is_none());
        let evicted = buffer.append(visit(&codec, 2)).unwrap();
        assert_eq!(evicted.date(), "000001");
        assert_eq!(dates(buffer.chronological()), vec!["000002"]);
    }

    #[test]
    fn test_encoded_bytes() {
        let codec = VisitCodec::new(CodeBook::standard());
        let mut buffer = HistoryBuffer::default();
        assert_eq!(buffer.encoded_bytes(), 0);

        buffer.append(codec.record("251105", "E11", "A10BA02").unwrap());
        buffer.append(codec.record("251015", "J06.9", "J01CA04").unwrap());
        assert_eq!(buffer.encoded_bytes(), 18 + 20);
    }
}
