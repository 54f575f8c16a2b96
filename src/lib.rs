// Smart ID Chip Storage Engine - Core Library
// Exposes all modules for use in the clinic terminal, API server, and tests

pub mod error;
pub mod dictionary;  // Closed ICD-10 / ATC vocabularies
pub mod codec;       // Visit wire format
pub mod record;
pub mod history;     // Circular visit buffer
pub mod capacity;    // Byte accounting
pub mod chip;
pub mod session;     // Card interaction state machine
pub mod directory;   // Identity lookup seam + demo patients
pub mod card_io;     // Simulated reader latency
pub mod db;          // SQLite chip store + audit trail
pub mod config;
pub mod logging;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use error::{ChipError, ChipResult};
pub use dictionary::{CodeBook, CodeDictionary, CodeEntry, CodeKind, DictionaryError};
pub use codec::{encoded_size, EncodedVisit, VisitCodec, VisitFields, FIELD_SEPARATOR};
pub use record::VisitRecord;
pub use history::{HistoryBuffer, DEFAULT_MAX_VISITS};
pub use capacity::{usage, StorageUsage};
pub use chip::{ChipLayout, CriticalBlock, PatientChip};
pub use session::{CardSession, CommitReceipt, SessionStage};
pub use directory::{demo_identities, ChipStore, IdentityLookup, PatientDirectory};
pub use card_io::{CardLatency, SimulatedCard};
pub use db::{Event, ImportReport, SqliteChipStore};
pub use config::AppConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
