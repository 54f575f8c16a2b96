// Engine errors
// Every failure is a reported condition: the chip and the session stage are
// left exactly as they were before the failing call.

use crate::dictionary::CodeKind;
use crate::session::SessionStage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChipError {
    /// Identity key absent from the external store
    #[error("identity not found: {0}")]
    NotFound(String),

    /// Code outside the closed vocabulary
    #[error("invalid {kind} code: {code:?}")]
    InvalidCode { kind: CodeKind, code: String },

    /// Date is not exactly 6 ASCII digits (YYMMDD)
    #[error("invalid visit date {0:?}: expected YYMMDD")]
    InvalidDate(String),

    #[error("malformed visit payload: {0}")]
    MalformedPayload(String),

    #[error("incomplete visit: {0}")]
    IncompleteVisit(&'static str),

    #[error("illegal transition: cannot {action} while {stage}")]
    IllegalTransition {
        stage: SessionStage,
        action: &'static str,
    },

    /// The identity store itself failed (distinct from "identity absent")
    #[error("identity lookup failed: {0:#}")]
    Lookup(#[source] anyhow::Error),
}

pub type ChipResult<T> = std::result::Result<T, ChipError>;

impl ChipError {
    /// Short machine-readable kind, used by the API and audit trail
    pub fn kind(&self) -> &'static str {
        match self {
            ChipError::NotFound(_) => "not_found",
            ChipError::InvalidCode { .. } => "invalid_code",
            ChipError::InvalidDate(_) => "invalid_date",
            ChipError::MalformedPayload(_) => "malformed_payload",
            ChipError::IncompleteVisit(_) => "incomplete_visit",
            ChipError::IllegalTransition { .. } => "illegal_transition",
            ChipError::Lookup(_) => "lookup_failed",
        }
    }
}
