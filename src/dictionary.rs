// 📖 Code Dictionary - closed clinical vocabularies
//
// Two disjoint, read-only vocabularies:
// - Diagnosis codes (ICD-10, simplified)
// - Medication codes (ATC)
//
// Loaded once per process and shared by reference; nothing mutates them.

use crate::codec::FIELD_SEPARATOR;
use crate::error::{ChipError, ChipResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

// ============================================================================
// CODE KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    /// ICD-10 diagnosis
    Diagnosis,

    /// ATC medication
    Medication,
}

impl CodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeKind::Diagnosis => "diagnosis",
            CodeKind::Medication => "medication",
        }
    }

    /// Coding system the vocabulary is drawn from
    pub fn system(&self) -> &'static str {
        match self {
            CodeKind::Diagnosis => "ICD-10",
            CodeKind::Medication => "ATC",
        }
    }

    pub fn parse(s: &str) -> Option<CodeKind> {
        match s.to_ascii_lowercase().as_str() {
            "diagnosis" | "icd10" | "icd-10" => Some(CodeKind::Diagnosis),
            "medication" | "atc" => Some(CodeKind::Medication),
            _ => None,
        }
    }
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CODE ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEntry {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DictionaryError {
    #[error("{kind} dictionary contains an empty code")]
    EmptyCode { kind: CodeKind },

    #[error("{kind} code {code:?} is listed twice")]
    DuplicateCode { kind: CodeKind, code: String },

    #[error("{kind} code {code:?} contains the field separator")]
    ReservedByte { kind: CodeKind, code: String },

    #[error("code {0:?} appears in both the diagnosis and medication dictionaries")]
    Overlap(String),
}

// ============================================================================
// CODE DICTIONARY
// ============================================================================

/// One closed vocabulary, enumerated in registration order
#[derive(Debug, Clone)]
pub struct CodeDictionary {
    kind: CodeKind,
    entries: Vec<CodeEntry>,
    index: HashMap<String, usize>,
}

impl CodeDictionary {
    /// Build a dictionary, rejecting empty, duplicate or separator-bearing codes
    pub fn from_entries<I, C, N>(kind: CodeKind, entries: I) -> Result<Self, DictionaryError>
    where
        I: IntoIterator<Item = (C, N)>,
        C: Into<String>,
        N: Into<String>,
    {
        let mut dictionary = CodeDictionary {
            kind,
            entries: Vec::new(),
            index: HashMap::new(),
        };

        for (code, name) in entries {
            let code = code.into();
            if code.is_empty() {
                return Err(DictionaryError::EmptyCode { kind });
            }
            if code.as_bytes().contains(&FIELD_SEPARATOR) {
                return Err(DictionaryError::ReservedByte { kind, code });
            }
            if dictionary.index.contains_key(&code) {
                return Err(DictionaryError::DuplicateCode { kind, code });
            }

            dictionary.index.insert(code.clone(), dictionary.entries.len());
            dictionary.entries.push(CodeEntry {
                code,
                name: name.into(),
            });
        }

        Ok(dictionary)
    }

    pub fn kind(&self) -> CodeKind {
        self.kind
    }

    /// Human-readable name for a code
    pub fn resolve(&self, code: &str) -> Option<&str> {
        self.index
            .get(code)
            .map(|&i| self.entries[i].name.as_str())
    }

    pub fn is_valid(&self, code: &str) -> bool {
        self.index.contains_key(code)
    }

    /// Every entry, in the fixed order used for selection lists
    pub fn all_codes(&self) -> &[CodeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate a code, reporting `InvalidCode` with this dictionary's kind
    pub fn check(&self, code: &str) -> ChipResult<()> {
        if self.is_valid(code) {
            Ok(())
        } else {
            Err(ChipError::InvalidCode {
                kind: self.kind,
                code: code.to_string(),
            })
        }
    }
}

// ============================================================================
// CODE BOOK (both vocabularies)
// ============================================================================

const ICD10_CODES: &[(&str, &str)] = &[
    ("R50", "Fever"),
    ("E11", "Type 2 Diabetes Mellitus"),
    ("I10", "Essential Hypertension"),
    ("J06.9", "Upper Respiratory Infection"),
    ("M79.3", "Myalgia"),
    ("K21.9", "GERD"),
    ("E78.5", "Hyperlipidemia"),
    ("R51", "Headache"),
    ("J00", "Common Cold"),
];

const ATC_CODES: &[(&str, &str)] = &[
    ("N02BE01", "Paracetamol"),
    ("A10BA02", "Metformin"),
    ("C09AA02", "Enalapril"),
    ("J01CA04", "Amoxicillin"),
    ("A02BC01", "Omeprazole"),
    ("C10AA01", "Simvastatin"),
    ("R06AE07", "Cetirizine"),
    ("N02BA01", "Aspirin"),
];

static STANDARD: OnceLock<Arc<CodeBook>> = OnceLock::new();

/// Diagnosis and medication dictionaries, guaranteed disjoint
#[derive(Debug, Clone)]
pub struct CodeBook {
    diagnoses: CodeDictionary,
    medications: CodeDictionary,
}

impl CodeBook {
    pub fn new(
        diagnoses: CodeDictionary,
        medications: CodeDictionary,
    ) -> Result<Self, DictionaryError> {
        if let Some(shared) = diagnoses
            .all_codes()
            .iter()
            .find(|entry| medications.is_valid(&entry.code))
        {
            return Err(DictionaryError::Overlap(shared.code.clone()));
        }

        Ok(CodeBook {
            diagnoses,
            medications,
        })
    }

    /// The built-in ICD-10 / ATC vocabularies, initialised once per process
    pub fn standard() -> Arc<CodeBook> {
        STANDARD.get_or_init(|| Arc::new(Self::builtin())).clone()
    }

    // The static tables are covered by test_builtin_tables_validate
    fn builtin() -> CodeBook {
        let table = |kind: CodeKind, rows: &[(&str, &str)]| {
            let entries: Vec<CodeEntry> = rows
                .iter()
                .map(|(code, name)| CodeEntry {
                    code: code.to_string(),
                    name: name.to_string(),
                })
                .collect();
            let index = entries
                .iter()
                .enumerate()
                .map(|(i, entry)| (entry.code.clone(), i))
                .collect();
            CodeDictionary {
                kind,
                entries,
                index,
            }
        };

        CodeBook {
            diagnoses: table(CodeKind::Diagnosis, ICD10_CODES),
            medications: table(CodeKind::Medication, ATC_CODES),
        }
    }

    pub fn diagnoses(&self) -> &CodeDictionary {
        &self.diagnoses
    }

    pub fn medications(&self) -> &CodeDictionary {
        &self.medications
    }

    pub fn dictionary(&self, kind: CodeKind) -> &CodeDictionary {
        match kind {
            CodeKind::Diagnosis => &self.diagnoses,
            CodeKind::Medication => &self.medications,
        }
    }

    /// Name for a diagnosis code, or the code itself when unknown (display only)
    pub fn diagnosis_label<'a>(&'a self, code: &'a str) -> &'a str {
        self.diagnoses.resolve(code).unwrap_or(code)
    }

    pub fn medication_label<'a>(&'a self, code: &'a str) -> &'a str {
        self.medications.resolve(code).unwrap_or(code)
    }
}

// ============================================================================
// TESTS
// ============================================================================
