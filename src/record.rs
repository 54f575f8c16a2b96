// Visit record - one encoded clinical encounter on the chip
//
// Immutable once built. Only the codec constructs records, so the stored
// size always matches the payload the record serializes to.

use crate::codec;
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitRecord {
    date: String,
    diagnosis_code: String,
    medication_code: String,
    encoded_size: usize,
}

impl VisitRecord {
    pub(crate) fn from_codec(
        date: String,
        diagnosis_code: String,
        medication_code: String,
        encoded_size: usize,
    ) -> Self {
        VisitRecord {
            date,
            diagnosis_code,
            medication_code,
            encoded_size,
        }
    }

    /// YYMMDD
    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn diagnosis_code(&self) -> &str {
        &self.diagnosis_code
    }

    pub fn medication_code(&self) -> &str {
        &self.medication_code
    }

    pub fn encoded_size(&self) -> usize {
        self.encoded_size
    }

    /// Wire form, byte-identical to what the codec produced
    pub fn to_payload(&self) -> Vec<u8> {
        codec::join_fields(&self.date, &self.diagnosis_code, &self.medication_code)
    }

    /// Calendar date, if the six digits name a real day (20YY)
    pub fn calendar_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&format!("20{}", self.date), "%Y%m%d").ok()
    }

    /// `DD/MM/YY` for display; falls back to the raw digits
    pub fn display_date(&self) -> String {
        match self.calendar_date() {
            Some(day) => day.format("%d/%m/%y").to_string(),
            None => self.date.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::VisitCodec;
    use crate::dictionary::CodeBook;

    #[test]
    fn test_calendar_date() {
        let codec = VisitCodec::new(CodeBook::standard());

        let record = codec.record("251105", "E11", "A10BA02").unwrap();
        assert_eq!(
            record.calendar_date(),
            chrono::NaiveDate::from_ymd_opt(2025, 11, 5)
        );
        assert_eq!(record.display_date(), "05/11/25");

        // Six digits is all the codec requires; impossible days still display
        let odd = codec.record("251399", "E11", "A10BA02").unwrap();
        assert_eq!(odd.calendar_date(), None);
        assert_eq!(odd.display_date(), "251399");
    }

    #[test]
    fn test_payload_matches_size() {
        let codec = VisitCodec::new(CodeBook::standard());
        let record = codec.record("251110", "E78.5", "C10AA01").unwrap();
        assert_eq!(record.to_payload(), b"251110|E78.5|C10AA01".to_vec());
        assert_eq!(record.to_payload().len(), record.encoded_size());
    }
}
