// 🗄️ SQLite chip store - persistent identity directory + audit trail
//
// One row per patient (critical block), one row per history slot holding the
// visit payload in its wire form, and an append-only events table.
// Each patient row carries a SHA-256 digest of its visit payloads, checked on
// every read.

use crate::chip::{ChipLayout, CriticalBlock, PatientChip};
use crate::codec::VisitCodec;
use crate::dictionary::CodeBook;
use crate::directory::{demo_chips, ChipStore, IdentityLookup};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// EVENTS (audit trail)
// ============================================================================

/// Event for audit trail - every chip write is recorded
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // ==========================================================================
    // Patients (critical block)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS patients (
            identity TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            blood_type TEXT NOT NULL,
            allergies TEXT NOT NULL,
            chronic TEXT NOT NULL,
            history_digest TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Visit history slots (chronological, slot 0 = oldest)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS visits (
            identity TEXT NOT NULL,
            slot INTEGER NOT NULL,
            payload BLOB NOT NULL,
            encoded_size INTEGER NOT NULL,
            PRIMARY KEY (identity, slot)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// SHA-256 over the length-prefixed payloads, in slot order
pub fn history_digest<'a, I>(payloads: I) -> String
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = Sha256::new();
    for payload in payloads {
        hasher.update((payload.len() as u32).to_le_bytes());
        hasher.update(payload);
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// One visit row: identity,date,diagnosis,medication
#[derive(Debug, Deserialize)]
struct VisitRow {
    identity: String,
    date: String,
    diagnosis: String,
    medication: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub evicted: usize,
    /// (line number, reason)
    pub rejected: Vec<(usize, String)>,
    pub chips_written: usize,
}

// ============================================================================
// SQLITE CHIP STORE
// ============================================================================

pub struct SqliteChipStore {
    conn: Connection,
    codec: VisitCodec,
    layout: ChipLayout,
    actor: String,
}

impl SqliteChipStore {
    /// Open (or create) an on-disk store in WAL mode
    pub fn open(path: &Path, book: Arc<CodeBook>, layout: ChipLayout) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open chip store at {}", path.display()))?;
        // Enable WAL mode for crash recovery
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::from_connection(conn, book, layout)
    }

    pub fn open_in_memory(book: Arc<CodeBook>, layout: ChipLayout) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, book, layout)
    }

    fn from_connection(conn: Connection, book: Arc<CodeBook>, layout: ChipLayout) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteChipStore {
            conn,
            codec: VisitCodec::new(book),
            layout,
            actor: "clinic_terminal".to_string(),
        })
    }

    /// Name recorded as the actor of audit events
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn layout(&self) -> ChipLayout {
        self.layout
    }

    pub fn identities(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT identity FROM patients ORDER BY identity")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn patient_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Audit trail of one chip, newest first
    pub fn events_for(&self, identity: &str) -> Result<Vec<Event>> {
        get_events_for_entity(&self.conn, "chip", identity)
    }

    /// Write the demo patients; returns how many chips were written
    pub fn seed_demo(&mut self) -> Result<usize> {
        let chips = demo_chips(&self.codec, self.layout).context("Failed to build demo chips")?;
        for chip in &chips {
            self.persist(chip)?;
        }
        Ok(chips.len())
    }

    pub fn import_visits_csv(&mut self, csv_path: &Path) -> Result<ImportReport> {
        let file = std::fs::File::open(csv_path)
            .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;
        self.import_visits(file)
    }

    /// Append visits from CSV rows through the codec and history bound.
    ///
    /// Rows naming unknown identities or invalid codes are rejected and
    /// reported; every touched chip is written back once at the end.
    pub fn import_visits<R: Read>(&mut self, reader: R) -> Result<ImportReport> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut report = ImportReport::default();
        let mut touched: BTreeMap<String, PatientChip> = BTreeMap::new();

        for (i, result) in rdr.deserialize::<VisitRow>().enumerate() {
            // Header occupies line 1
            let line = i + 2;
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    report.rejected.push((line, format!("unreadable row: {}", e)));
                    continue;
                }
            };

            if !touched.contains_key(&row.identity) {
                match self.lookup(&row.identity)? {
                    Some(chip) => {
                        touched.insert(row.identity.clone(), chip);
                    }
                    None => {
                        report
                            .rejected
                            .push((line, format!("identity not found: {}", row.identity)));
                        continue;
                    }
                }
            }

            let record = match self.codec.record(&row.date, &row.diagnosis, &row.medication) {
                Ok(record) => record,
                Err(e) => {
                    report.rejected.push((line, e.to_string()));
                    continue;
                }
            };

            if let Some(chip) = touched.get_mut(&row.identity) {
                if chip.append_visit(record).is_some() {
                    report.evicted += 1;
                }
                report.imported += 1;
            }
        }

        for chip in touched.values() {
            self.persist(chip)?;
            report.chips_written += 1;
        }

        if !report.rejected.is_empty() {
            warn!(rejected = report.rejected.len(), "CSV import skipped rows");
        }
        info!(
            imported = report.imported,
            evicted = report.evicted,
            chips = report.chips_written,
            "CSV import complete"
        );
        Ok(report)
    }

    fn load_visits(&self, identity: &str) -> Result<Vec<(Vec<u8>, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT payload, encoded_size FROM visits WHERE identity = ?1 ORDER BY slot",
        )?;
        let rows = stmt
            .query_map(params![identity], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(Vec<u8>, i64)>, _>>()?;
        Ok(rows)
    }
}

impl IdentityLookup for SqliteChipStore {
    fn lookup(&self, identity: &str) -> Result<Option<PatientChip>> {
        let patient = self
            .conn
            .query_row(
                "SELECT name, blood_type, allergies, chronic, history_digest
                 FROM patients WHERE identity = ?1",
                params![identity],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((name, blood_type, allergies_json, chronic_json, stored_digest)) = patient else {
            debug!(identity, "identity not in chip store");
            return Ok(None);
        };

        let mut critical = CriticalBlock::new(identity, name, blood_type);
        critical.allergies =
            serde_json::from_str(&allergies_json).context("Failed to parse allergies")?;
        critical.chronic_conditions =
            serde_json::from_str(&chronic_json).context("Failed to parse chronic conditions")?;

        let rows = self.load_visits(identity)?;
        let digest = history_digest(rows.iter().map(|(payload, _)| payload.as_slice()));
        if digest != stored_digest {
            bail!("chip image digest mismatch for {}", identity);
        }

        let mut visits = Vec::with_capacity(rows.len());
        for (slot, (payload, stored_size)) in rows.iter().enumerate() {
            let record = self
                .codec
                .record_from_payload(payload)
                .with_context(|| format!("Failed to decode visit slot {} of {}", slot, identity))?;
            if record.encoded_size() as i64 != *stored_size {
                bail!(
                    "visit slot {} of {}: stored size {} but payload encodes to {}",
                    slot,
                    identity,
                    stored_size,
                    record.encoded_size()
                );
            }
            visits.push(record);
        }

        Ok(Some(PatientChip::with_visits(critical, self.layout, visits)))
    }
}

impl ChipStore for SqliteChipStore {
    /// Rewrite the whole chip image in one transaction
    fn persist(&mut self, chip: &PatientChip) -> Result<()> {
        let critical = chip.critical();
        let payloads: Vec<Vec<u8>> = chip
            .history()
            .chronological()
            .map(|v| v.to_payload())
            .collect();
        let digest = history_digest(payloads.iter().map(Vec::as_slice));
        let usage = chip.usage();

        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO patients (
                identity, name, blood_type, allergies, chronic, history_digest, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(identity) DO UPDATE SET
                name = excluded.name,
                blood_type = excluded.blood_type,
                allergies = excluded.allergies,
                chronic = excluded.chronic,
                history_digest = excluded.history_digest,
                updated_at = excluded.updated_at",
            params![
                critical.identity,
                critical.name,
                critical.blood_type,
                serde_json::to_string(&critical.allergies)?,
                serde_json::to_string(&critical.chronic_conditions)?,
                digest,
                Utc::now().to_rfc3339(),
            ],
        )?;

        tx.execute("DELETE FROM visits WHERE identity = ?1", params![critical.identity])?;
        for (slot, payload) in payloads.iter().enumerate() {
            tx.execute(
                "INSERT INTO visits (identity, slot, payload, encoded_size) VALUES (?1, ?2, ?3, ?4)",
                params![critical.identity, slot as i64, payload, payload.len() as i64],
            )?;
        }

        let event = Event::new(
            "chip_written",
            "chip",
            &critical.identity,
            serde_json::json!({
                "visits": payloads.len(),
                "history_bytes": usage.history_bytes,
                "percent_used": usage.percent_used,
                "digest": digest,
            }),
            &self.actor,
        );
        insert_event(&tx, &event)?;

        tx.commit()?;

        info!(
            identity = critical.identity.as_str(),
            visits = payloads.len(),
            history_bytes = usage.history_bytes,
            "chip persisted"
        );
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
