// 🔐 Card Session - stage-gated interaction with one chip
//
//   NoCard --load--> Loaded --stage_diagnosis--> Pending --commit--> Committed
//      ^                                                                 |
//      +---------------------------- reset -------------------------------+
//
// `commit` is the only transition that mutates the chip. Every failed
// transition leaves both the stage and the chip untouched.

use crate::capacity::StorageUsage;
use crate::chip::{ChipLayout, PatientChip};
use crate::codec::VisitCodec;
use crate::dictionary::CodeBook;
use crate::directory::IdentityLookup;
use crate::error::{ChipError, ChipResult};
use crate::record::VisitRecord;
use chrono::Local;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// SESSION STAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    /// No card on the reader
    NoCard,

    /// Chip read, history on display
    Loaded,

    /// Diagnosis staged, awaiting medication
    Pending,

    /// Visit written to the chip
    Committed,
}

impl SessionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStage::NoCard => "no card",
            SessionStage::Loaded => "loaded",
            SessionStage::Pending => "pending",
            SessionStage::Committed => "committed",
        }
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful commit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitReceipt {
    pub record: VisitRecord,
    /// Oldest visit pushed out by the history bound, if any
    pub evicted: Option<VisitRecord>,
    pub usage: StorageUsage,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    NoCard,
    Loaded {
        chip: PatientChip,
    },
    Pending {
        chip: PatientChip,
        diagnosis: String,
    },
    Committed {
        chip: PatientChip,
        receipt: CommitReceipt,
    },
}

impl State {
    fn stage(&self) -> SessionStage {
        match self {
            State::NoCard => SessionStage::NoCard,
            State::Loaded { .. } => SessionStage::Loaded,
            State::Pending { .. } => SessionStage::Pending,
            State::Committed { .. } => SessionStage::Committed,
        }
    }

    fn chip(&self) -> Option<&PatientChip> {
        match self {
            State::NoCard => None,
            State::Loaded { chip } | State::Pending { chip, .. } | State::Committed { chip, .. } => {
                Some(chip)
            }
        }
    }
}

// ============================================================================
// CARD SESSION
// ============================================================================

#[derive(Debug)]
pub struct CardSession {
    id: Uuid,
    codec: VisitCodec,
    state: State,
}

impl CardSession {
    pub fn new(book: Arc<CodeBook>) -> Self {
        CardSession {
            id: Uuid::new_v4(),
            codec: VisitCodec::new(book),
            state: State::NoCard,
        }
    }

    /// Identifier of this terminal session, for the audit trail
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stage(&self) -> SessionStage {
        self.state.stage()
    }

    pub fn book(&self) -> &Arc<CodeBook> {
        self.codec.book()
    }

    pub fn codec(&self) -> &VisitCodec {
        &self.codec
    }

    /// The loaded chip, in every stage but `NoCard`
    pub fn chip(&self) -> Option<&PatientChip> {
        self.state.chip()
    }

    pub fn staged_diagnosis(&self) -> Option<&str> {
        match &self.state {
            State::Pending { diagnosis, .. } => Some(diagnosis),
            _ => None,
        }
    }

    pub fn last_commit(&self) -> Option<&CommitReceipt> {
        match &self.state {
            State::Committed { receipt, .. } => Some(receipt),
            _ => None,
        }
    }

    /// Usage of the loaded chip, or of an empty default chip when none is loaded
    pub fn usage(&self) -> StorageUsage {
        match self.chip() {
            Some(chip) => chip.usage(),
            None => StorageUsage::empty(ChipLayout::default()),
        }
    }

    fn illegal(&self, action: &'static str) -> ChipError {
        let stage = self.stage();
        warn!(session = %self.id, %stage, action, "rejected session transition");
        ChipError::IllegalTransition { stage, action }
    }

    /// NoCard -> Loaded. The chip is then available through `chip()`.
    pub fn load<L>(&mut self, identity: &str, directory: &L) -> ChipResult<()>
    where
        L: IdentityLookup + ?Sized,
    {
        if !matches!(self.state, State::NoCard) {
            return Err(self.illegal("load a card"));
        }

        let identity = identity.trim();
        if identity.is_empty() {
            return Err(ChipError::NotFound(String::new()));
        }

        let chip = directory
            .lookup(identity)
            .map_err(ChipError::Lookup)?
            .ok_or_else(|| ChipError::NotFound(identity.to_string()))?;

        debug!(
            session = %self.id,
            identity,
            visits = chip.visit_count(),
            "card loaded"
        );
        self.state = State::Loaded { chip };
        Ok(())
    }

    /// Loaded -> Pending, or Pending -> Pending to change the staged diagnosis
    pub fn stage_diagnosis(&mut self, diagnosis_code: &str) -> ChipResult<()> {
        if !matches!(self.state, State::Loaded { .. } | State::Pending { .. }) {
            return Err(self.illegal("stage a diagnosis"));
        }
        self.codec.book().diagnoses().check(diagnosis_code)?;

        self.state = match std::mem::take(&mut self.state) {
            State::Loaded { chip } | State::Pending { chip, .. } => State::Pending {
                chip,
                diagnosis: diagnosis_code.to_string(),
            },
            other => other,
        };
        Ok(())
    }

    /// Pending -> Committed: encode the visit and append it to the chip
    pub fn commit(&mut self, medication_code: &str, date: &str) -> ChipResult<CommitReceipt> {
        let (mut chip, diagnosis) = match std::mem::take(&mut self.state) {
            State::Pending { chip, diagnosis } => (chip, diagnosis),
            other => {
                self.state = other;
                return Err(self.illegal("commit a visit"));
            }
        };

        // Validation happens before the chip is touched
        let record = if diagnosis.is_empty() {
            Err(ChipError::IncompleteVisit("no diagnosis staged"))
        } else if medication_code.trim().is_empty() {
            Err(ChipError::IncompleteVisit("no medication selected"))
        } else {
            self.codec.record(date, &diagnosis, medication_code)
        };
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                self.state = State::Pending { chip, diagnosis };
                return Err(e);
            }
        };

        let evicted = chip.append_visit(record.clone());
        let receipt = CommitReceipt {
            record,
            evicted,
            usage: chip.usage(),
        };

        info!(
            session = %self.id,
            identity = chip.identity(),
            date = receipt.record.date(),
            diagnosis = receipt.record.diagnosis_code(),
            medication = receipt.record.medication_code(),
            size = receipt.record.encoded_size(),
            evicted = receipt.evicted.is_some(),
            "visit committed to chip"
        );

        self.state = State::Committed {
            chip,
            receipt: receipt.clone(),
        };
        Ok(receipt)
    }

    /// Commit stamped with today's local date (YYMMDD)
    pub fn commit_today(&mut self, medication_code: &str) -> ChipResult<CommitReceipt> {
        let today = Local::now().format("%y%m%d").to_string();
        self.commit(medication_code, &today)
    }

    /// Any stage -> NoCard. Returns the chip so the caller can hand it back
    /// to its store.
    pub fn reset(&mut self) -> Option<PatientChip> {
        let previous = std::mem::take(&mut self.state);
        debug!(session = %self.id, from = %previous.stage(), "session reset");
        match previous {
            State::NoCard => None,
            State::Loaded { chip } | State::Pending { chip, .. } | State::Committed { chip, .. } => {
                Some(chip)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::PatientDirectory;
    use pretty_assertions::assert_eq;

    const AHMAD: &str = "920815-01-5234";

    fn setup() -> (CardSession, PatientDirectory) {
        let book = CodeBook::standard();
        let directory =
            PatientDirectory::demo(&VisitCodec::new(book.clone()), ChipLayout::default()).unwrap();
        (CardSession::new(book), directory)
    }

    #[test]
    fn test_full_visit_scenario() {
        let (mut session, directory) = setup();
        assert_eq!(session.stage(), SessionStage::NoCard);
        assert_eq!(session.usage().percent_used, 3.3);

        session.load(AHMAD, &directory).unwrap();
        assert_eq!(session.stage(), SessionStage::Loaded);
        let usage = session.usage();
        assert_eq!(usage.history_bytes, 54);
        assert_eq!(usage.percent_used, 3.5);

        session.stage_diagnosis("R51").unwrap();
        assert_eq!(session.stage(), SessionStage::Pending);
        assert_eq!(session.staged_diagnosis(), Some("R51"));

        let receipt = session.commit("N02BA01", "260101").unwrap();
        assert_eq!(session.stage(), SessionStage::Committed);
        assert_eq!(receipt.record.encoded_size(), 18);
        assert!(receipt.evicted.is_none());
        assert_eq!(receipt.usage.history_bytes, 72);

        let chip = session.chip().unwrap();
        assert_eq!(chip.visit_count(), 4);
        assert_eq!(chip.history().newest(), Some(&receipt.record));
        assert_eq!(session.usage().history_bytes, 72);
    }

    #[test]
    fn test_unknown_identity_stays_no_card() {
        let (mut session, directory) = setup();
        let err = session.load("000000-00-0000", &directory).unwrap_err();
        assert!(matches!(err, ChipError::NotFound(ref id) if id == "000000-00-0000"));
        assert_eq!(session.stage(), SessionStage::NoCard);
        assert!(session.chip().is_none());

        assert!(matches!(
            session.load("   ", &directory),
            Err(ChipError::NotFound(_))
        ));
    }

    #[test]
    fn test_commit_without_diagnosis_is_illegal() {
        let (mut session, directory) = setup();
        session.load(AHMAD, &directory).unwrap();
        let before: Vec<VisitRecord> = session.chip().unwrap().history().chronological().cloned().collect();

        let err = session.commit("N02BA01", "260101").unwrap_err();
        assert!(matches!(
            err,
            ChipError::IllegalTransition { stage: SessionStage::Loaded, .. }
        ));

        let after: Vec<VisitRecord> = session.chip().unwrap().history().chronological().cloned().collect();
        assert_eq!(before, after);
        assert_eq!(session.stage(), SessionStage::Loaded);
    }

    #[test]
    fn test_failed_commit_leaves_state_unchanged() {
        let (mut session, directory) = setup();
        session.load(AHMAD, &directory).unwrap();
        session.stage_diagnosis("E11").unwrap();

        assert!(matches!(
            session.commit("", "260101"),
            Err(ChipError::IncompleteVisit(_))
        ));
        assert!(matches!(
            session.commit("E11", "260101"),
            Err(ChipError::InvalidCode { .. })
        ));
        assert!(matches!(
            session.commit("A10BA02", "26-01-01"),
            Err(ChipError::InvalidDate(_))
        ));

        assert_eq!(session.stage(), SessionStage::Pending);
        assert_eq!(session.staged_diagnosis(), Some("E11"));
        assert_eq!(session.chip().unwrap().visit_count(), 3);

        // Corrected input goes through
        session.commit("A10BA02", "260101").unwrap();
        assert_eq!(session.chip().unwrap().visit_count(), 4);
    }

    #[test]
    fn test_stage_invalid_diagnosis() {
        let (mut session, directory) = setup();
        session.load(AHMAD, &directory).unwrap();

        assert!(matches!(
            session.stage_diagnosis("XX99"),
            Err(ChipError::InvalidCode { .. })
        ));
        assert_eq!(session.stage(), SessionStage::Loaded);

        session.stage_diagnosis("R50").unwrap();
        session.stage_diagnosis("J00").unwrap();
        assert_eq!(session.staged_diagnosis(), Some("J00"));
    }

    #[test]
    fn test_load_requires_reset() {
        let (mut session, directory) = setup();
        session.load(AHMAD, &directory).unwrap();

        assert!(matches!(
            session.load("880523-14-6789", &directory),
            Err(ChipError::IllegalTransition { stage: SessionStage::Loaded, .. })
        ));
        assert_eq!(session.chip().unwrap().identity(), AHMAD);

        let chip = session.reset().unwrap();
        assert_eq!(chip.identity(), AHMAD);
        assert_eq!(session.stage(), SessionStage::NoCard);

        session.load("880523-14-6789", &directory).unwrap();
        assert_eq!(session.chip().unwrap().identity(), "880523-14-6789");
    }

    #[test]
    fn test_no_transitions_after_commit_except_reset() {
        let (mut session, directory) = setup();
        session.load(AHMAD, &directory).unwrap();
        session.stage_diagnosis("R51").unwrap();
        session.commit("N02BA01", "260101").unwrap();

        assert!(matches!(
            session.stage_diagnosis("R50"),
            Err(ChipError::IllegalTransition { stage: SessionStage::Committed, .. })
        ));
        assert!(matches!(
            session.commit("N02BA01", "260102"),
            Err(ChipError::IllegalTransition { .. })
        ));
        assert!(matches!(
            session.load(AHMAD, &directory),
            Err(ChipError::IllegalTransition { .. })
        ));
        assert_eq!(session.chip().unwrap().visit_count(), 4);

        let chip = session.reset().unwrap();
        assert_eq!(chip.visit_count(), 4);
        assert!(session.reset().is_none());
    }

    #[test]
    fn test_stage_without_card_is_illegal() {
        let (mut session, _) = setup();
        assert!(matches!(
            session.stage_diagnosis("R50"),
            Err(ChipError::IllegalTransition { stage: SessionStage::NoCard, .. })
        ));
        assert!(matches!(
            session.commit("N02BA01", "260101"),
            Err(ChipError::IllegalTransition { stage: SessionStage::NoCard, .. })
        ));
    }

    #[test]
    fn test_commit_at_bound_reports_eviction() {
        let book = CodeBook::standard();
        let codec = VisitCodec::new(book.clone());
        let layout = ChipLayout::new(1024, 30720, 3).unwrap();
        let directory = PatientDirectory::demo(&codec, layout).unwrap();

        let mut session = CardSession::new(book);
        session.load(AHMAD, &directory).unwrap();
        session.stage_diagnosis("R51").unwrap();
        let receipt = session.commit("N02BA01", "260101").unwrap();

        let evicted = receipt.evicted.as_ref().unwrap();
        assert_eq!(evicted.date(), "251105");
        assert_eq!(session.chip().unwrap().visit_count(), 3);
    }

    #[test]
    fn test_commit_at_smallest_bound_keeps_new_visit() {
        let book = CodeBook::standard();
        let codec = VisitCodec::new(book.clone());
        let layout = ChipLayout::new(1024, 30720, 1).unwrap();
        let directory = PatientDirectory::demo(&codec, layout).unwrap();

        let mut session = CardSession::new(book);
        session.load(AHMAD, &directory).unwrap();
        assert_eq!(session.chip().unwrap().visit_count(), 1);
        session.stage_diagnosis("R51").unwrap();
        let receipt = session.commit("N02BA01", "260101").unwrap();

        let chip = session.chip().unwrap();
        assert_eq!(chip.visit_count(), 1);
        assert_eq!(chip.history().newest(), Some(&receipt.record));
        let evicted = receipt.evicted.as_ref().unwrap();
        assert_ne!(evicted, &receipt.record);
        assert_eq!(session.last_commit(), Some(&receipt));
    }

    #[test]
    fn test_failed_commit_keeps_staged_diagnosis() {
        let (mut session, directory) = setup();
        session.load(AHMAD, &directory).unwrap();
        session.stage_diagnosis("E11").unwrap();

        assert!(session.commit("XX99", "260101").is_err());
        assert_eq!(session.stage(), SessionStage::Pending);
        assert_eq!(session.staged_diagnosis(), Some("E11"));
        assert_eq!(session.chip().unwrap().visit_count(), 3);
    }

    #[test]
    fn test_commit_today_uses_six_digit_date() {
        let (mut session, directory) = setup();
        session.load("750310-03-4521", &directory).unwrap();
        session.stage_diagnosis("J00").unwrap();

        let receipt = session.commit_today("R06AE07").unwrap();
        assert_eq!(receipt.record.date().len(), 6);
        assert_eq!(receipt.record.encoded_size(), 6 + 3 + 7 + 2);
    }

    #[test]
    fn test_lookup_failure_is_reported() {
        struct Broken;
        impl IdentityLookup for Broken {
            fn lookup(&self, _identity: &str) -> anyhow::Result<Option<PatientChip>> {
                anyhow::bail!("reader unplugged")
            }
        }

        let (mut session, _) = setup();
        let err = session.load(AHMAD, &Broken).unwrap_err();
        assert!(matches!(err, ChipError::Lookup(_)));
        assert_eq!(session.stage(), SessionStage::NoCard);
    }
}
