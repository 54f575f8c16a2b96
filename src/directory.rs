// 🗂️ Identity directory - the external keyed store behind a card read
//
// The engine only sees the two traits below. The in-memory directory holds
// the demo patients; `db::SqliteChipStore` is the persistent implementation.

use crate::chip::{ChipLayout, CriticalBlock, PatientChip};
use crate::codec::VisitCodec;
use crate::error::ChipResult;
use anyhow::Result;
use std::collections::BTreeMap;

/// Keyed lookup of a chip by identity-card number
pub trait IdentityLookup {
    /// `Ok(None)` when the identity is unknown; `Err` only when the store fails
    fn lookup(&self, identity: &str) -> Result<Option<PatientChip>>;
}

/// A lookup that can also take back a chip after a write
pub trait ChipStore: IdentityLookup {
    fn persist(&mut self, chip: &PatientChip) -> Result<()>;
}

impl<T: IdentityLookup + ?Sized> IdentityLookup for &T {
    fn lookup(&self, identity: &str) -> Result<Option<PatientChip>> {
        (**self).lookup(identity)
    }
}

impl<T: IdentityLookup + ?Sized> IdentityLookup for &mut T {
    fn lookup(&self, identity: &str) -> Result<Option<PatientChip>> {
        (**self).lookup(identity)
    }
}

impl<T: IdentityLookup + ?Sized> IdentityLookup for Box<T> {
    fn lookup(&self, identity: &str) -> Result<Option<PatientChip>> {
        (**self).lookup(identity)
    }
}

impl<T: ChipStore + ?Sized> ChipStore for Box<T> {
    fn persist(&mut self, chip: &PatientChip) -> Result<()> {
        (**self).persist(chip)
    }
}

// ============================================================================
// DEMO PATIENTS
// ============================================================================

struct DemoVisit {
    date: &'static str,
    diagnosis: &'static str,
    medication: &'static str,
}

struct DemoPatient {
    identity: &'static str,
    name: &'static str,
    blood_type: &'static str,
    allergies: &'static [&'static str],
    chronic: &'static [&'static str],
    visits: &'static [DemoVisit],
}

const DEMO_PATIENTS: &[DemoPatient] = &[
    DemoPatient {
        identity: "920815-01-5234",
        name: "Ahmad bin Abdullah",
        blood_type: "O+",
        allergies: &["Penicillin"],
        chronic: &["E11", "I10"],
        visits: &[
            DemoVisit { date: "251105", diagnosis: "E11", medication: "A10BA02" },
            DemoVisit { date: "251120", diagnosis: "I10", medication: "C09AA02" },
            DemoVisit { date: "251201", diagnosis: "R50", medication: "N02BE01" },
        ],
    },
    DemoPatient {
        identity: "880523-14-6789",
        name: "Siti binti Hassan",
        blood_type: "A+",
        allergies: &["Sulfa drugs"],
        chronic: &["E78.5"],
        visits: &[
            DemoVisit { date: "251015", diagnosis: "J06.9", medication: "J01CA04" },
            DemoVisit { date: "251110", diagnosis: "E78.5", medication: "C10AA01" },
        ],
    },
    DemoPatient {
        identity: "750310-03-4521",
        name: "Kumar a/l Ramasamy",
        blood_type: "B+",
        allergies: &[],
        chronic: &[],
        visits: &[],
    },
];

/// Identity numbers of the demo patients, with a short label for quick-pick menus
pub fn demo_identities() -> Vec<(&'static str, &'static str)> {
    DEMO_PATIENTS
        .iter()
        .map(|p| (p.identity, p.name))
        .collect()
}

/// Build the demo chips; visit sizes come from the codec
pub fn demo_chips(codec: &VisitCodec, layout: ChipLayout) -> ChipResult<Vec<PatientChip>> {
    DEMO_PATIENTS
        .iter()
        .map(|patient| {
            let mut critical = CriticalBlock::new(patient.identity, patient.name, patient.blood_type);
            critical.allergies = patient.allergies.iter().map(|a| a.to_string()).collect();
            critical.chronic_conditions = patient.chronic.iter().map(|c| c.to_string()).collect();

            let visits = patient
                .visits
                .iter()
                .map(|v| codec.record(v.date, v.diagnosis, v.medication))
                .collect::<ChipResult<Vec<_>>>()?;

            Ok(PatientChip::with_visits(critical, layout, visits))
        })
        .collect()
}

// ============================================================================
// IN-MEMORY DIRECTORY
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct PatientDirectory {
    chips: BTreeMap<String, PatientChip>,
}

impl PatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory preloaded with the demo patients
    pub fn demo(codec: &VisitCodec, layout: ChipLayout) -> ChipResult<Self> {
        let mut directory = Self::new();
        for chip in demo_chips(codec, layout)? {
            directory.insert(chip);
        }
        Ok(directory)
    }

    pub fn insert(&mut self, chip: PatientChip) {
        self.chips.insert(chip.identity().to_string(), chip);
    }

    pub fn get(&self, identity: &str) -> Option<&PatientChip> {
        self.chips.get(identity)
    }

    pub fn identities(&self) -> Vec<&str> {
        self.chips.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.chips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }
}

impl IdentityLookup for PatientDirectory {
    fn lookup(&self, identity: &str) -> Result<Option<PatientChip>> {
        Ok(self.chips.get(identity).cloned())
    }
}

impl ChipStore for PatientDirectory {
    fn persist(&mut self, chip: &PatientChip) -> Result<()> {
        self.insert(chip.clone());
        Ok(())
    }
}
