// Simulated card reader/writer
//
// Wraps any store and adds the physical read/write latency of a card
// terminal. Latency has no bearing on engine correctness; tests use zero.

use crate::chip::PatientChip;
use crate::directory::{ChipStore, IdentityLookup};
use anyhow::Result;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardLatency {
    pub read: Duration,
    pub write: Duration,
}

impl CardLatency {
    pub const INSTANT: CardLatency = CardLatency {
        read: Duration::ZERO,
        write: Duration::ZERO,
    };

    pub fn from_millis(read_ms: u64, write_ms: u64) -> Self {
        CardLatency {
            read: Duration::from_millis(read_ms),
            write: Duration::from_millis(write_ms),
        }
    }
}

impl Default for CardLatency {
    /// A contact reader: 1.5s to read, 2s to write
    fn default() -> Self {
        CardLatency::from_millis(1500, 2000)
    }
}

#[derive(Debug)]
pub struct SimulatedCard<S> {
    store: S,
    latency: CardLatency,
}

impl<S> SimulatedCard<S> {
    pub fn new(store: S, latency: CardLatency) -> Self {
        SimulatedCard { store, latency }
    }

    pub fn latency(&self) -> CardLatency {
        self.latency
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

fn pause(delay: Duration, what: &str) {
    if !delay.is_zero() {
        debug!(delay_ms = delay.as_millis() as u64, "{}", what);
        std::thread::sleep(delay);
    }
}

impl<S: IdentityLookup> IdentityLookup for SimulatedCard<S> {
    fn lookup(&self, identity: &str) -> Result<Option<PatientChip>> {
        pause(self.latency.read, "reading card");
        self.store.lookup(identity)
    }
}

impl<S: ChipStore> ChipStore for SimulatedCard<S> {
    fn persist(&mut self, chip: &PatientChip) -> Result<()> {
        pause(self.latency.write, "writing card");
        self.store.persist(chip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::ChipLayout;
    use crate::codec::VisitCodec;
    use crate::dictionary::CodeBook;
    use crate::directory::PatientDirectory;
    use std::time::Instant;

    fn directory() -> PatientDirectory {
        let codec = VisitCodec::new(CodeBook::standard());
        PatientDirectory::demo(&codec, ChipLayout::default()).unwrap()
    }

    #[test]
    fn test_instant_card_delegates() {
        let mut card = SimulatedCard::new(directory(), CardLatency::INSTANT);

        let chip = card.lookup("880523-14-6789").unwrap().unwrap();
        assert_eq!(chip.visit_count(), 2);
        assert!(card.lookup("000000-00-0000").unwrap().is_none());

        card.persist(&chip).unwrap();
        assert_eq!(card.into_inner().len(), 3);
    }

    #[test]
    fn test_read_latency_is_applied() {
        let card = SimulatedCard::new(directory(), CardLatency::from_millis(20, 0));

        let started = Instant::now();
        card.lookup("920815-01-5234").unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_default_latency() {
        let latency = CardLatency::default();
        assert_eq!(latency.read, Duration::from_millis(1500));
        assert_eq!(latency.write, Duration::from_millis(2000));
    }
}
