// 🗜️ Visit Codec - compact wire form of a clinical visit
//
// Wire format (bit-exact):
//   date | diagnosisCode | medicationCode
// Three ASCII fields joined by a single separator byte, so
//   encoded_size = len(date) + len(diagnosis) + len(medication) + 2

use crate::dictionary::CodeBook;
use crate::error::{ChipError, ChipResult};
use crate::record::VisitRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Separator byte between adjacent fields
pub const FIELD_SEPARATOR: u8 = b'|';

/// YYMMDD
pub const DATE_LEN: usize = 6;

const FIELD_COUNT: usize = 3;

/// Exact encoded size of a visit, in bytes
pub fn encoded_size(date: &str, diagnosis_code: &str, medication_code: &str) -> usize {
    date.len() + diagnosis_code.len() + medication_code.len() + (FIELD_COUNT - 1)
}

pub fn is_valid_date(date: &str) -> bool {
    date.len() == DATE_LEN && date.bytes().all(|b| b.is_ascii_digit())
}

pub(crate) fn join_fields(date: &str, diagnosis_code: &str, medication_code: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(encoded_size(date, diagnosis_code, medication_code));
    payload.extend_from_slice(date.as_bytes());
    payload.push(FIELD_SEPARATOR);
    payload.extend_from_slice(diagnosis_code.as_bytes());
    payload.push(FIELD_SEPARATOR);
    payload.extend_from_slice(medication_code.as_bytes());
    payload
}

/// Encoder output: the payload bytes and their size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedVisit {
    pub payload: Vec<u8>,
    pub encoded_size: usize,
}

/// The (date, diagnosis, medication) triple carried by a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitFields {
    pub date: String,
    pub diagnosis_code: String,
    pub medication_code: String,
}

// ============================================================================
// VISIT CODEC
// ============================================================================

#[derive(Debug, Clone)]
pub struct VisitCodec {
    book: Arc<CodeBook>,
}

impl VisitCodec {
    pub fn new(book: Arc<CodeBook>) -> Self {
        VisitCodec { book }
    }

    pub fn book(&self) -> &Arc<CodeBook> {
        &self.book
    }

    /// Validate and encode a visit
    ///
    /// Checks run date first, then diagnosis, then medication.
    pub fn encode(
        &self,
        date: &str,
        diagnosis_code: &str,
        medication_code: &str,
    ) -> ChipResult<EncodedVisit> {
        if !is_valid_date(date) {
            return Err(ChipError::InvalidDate(date.to_string()));
        }
        self.book.diagnoses().check(diagnosis_code)?;
        self.book.medications().check(medication_code)?;

        Ok(EncodedVisit {
            payload: join_fields(date, diagnosis_code, medication_code),
            encoded_size: encoded_size(date, diagnosis_code, medication_code),
        })
    }

    /// Parse a payload back into its fields
    ///
    /// Structural problems (bad UTF-8, wrong field count, empty field, bad
    /// date) are `MalformedPayload`; a well-formed payload naming a code
    /// outside the vocabularies is `InvalidCode`.
    pub fn decode(&self, payload: &[u8]) -> ChipResult<VisitFields> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| ChipError::MalformedPayload(format!("not UTF-8: {}", e)))?;

        let fields: Vec<&str> = text.split(FIELD_SEPARATOR as char).collect();
        let &[date, diagnosis_code, medication_code] = fields.as_slice() else {
            return Err(ChipError::MalformedPayload(format!(
                "expected {} fields, found {}",
                FIELD_COUNT,
                fields.len()
            )));
        };
        if !is_valid_date(date) {
            return Err(ChipError::MalformedPayload(format!(
                "date field {:?} is not YYMMDD",
                date
            )));
        }
        if diagnosis_code.is_empty() || medication_code.is_empty() {
            return Err(ChipError::MalformedPayload("empty code field".to_string()));
        }

        self.book.diagnoses().check(diagnosis_code)?;
        self.book.medications().check(medication_code)?;

        Ok(VisitFields {
            date: date.to_string(),
            diagnosis_code: diagnosis_code.to_string(),
            medication_code: medication_code.to_string(),
        })
    }

    /// Build an immutable record, sized by the codec
    pub fn record(
        &self,
        date: &str,
        diagnosis_code: &str,
        medication_code: &str,
    ) -> ChipResult<VisitRecord> {
        let encoded = self.encode(date, diagnosis_code, medication_code)?;
        Ok(VisitRecord::from_codec(
            date.to_string(),
            diagnosis_code.to_string(),
            medication_code.to_string(),
            encoded.encoded_size,
        ))
    }

    /// Rebuild a record from a stored payload
    pub fn record_from_payload(&self, payload: &[u8]) -> ChipResult<VisitRecord> {
        let fields = self.decode(payload)?;
        let size = encoded_size(&fields.date, &fields.diagnosis_code, &fields.medication_code);
        Ok(VisitRecord::from_codec(
            fields.date,
            fields.diagnosis_code,
            fields.medication_code,
            size,
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================
