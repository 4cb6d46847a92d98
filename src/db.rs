// 💾 Persistence - SQLite collaborator behind the in-memory store
//
// The pipeline and assignment engine never touch this module; the CLI and
// server load the store from it at startup and write back after commits
// and assignment changes.

use crate::assignment::{Agent, AgentRegistry};
use crate::record::{AssignmentStatus, CaseFileRecord, FieldValue};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// What an audit event names by its `entity_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Batch,
    CaseFile,
    Agent,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Batch => "batch",
            EntityKind::CaseFile => "case_file",
            EntityKind::Agent => "agent",
        }
    }
}

/// Everything the desk writes to the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A staged batch was committed; keyed by batch id
    CaseFilesImported,
    CaseFileAssigned,
    CaseFileUnassigned,
    /// An agent was created or its eligible banks changed
    AgentSaved,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CaseFilesImported => "case_files_imported",
            EventKind::CaseFileAssigned => "case_file_assigned",
            EventKind::CaseFileUnassigned => "case_file_unassigned",
            EventKind::AgentSaved => "agent_saved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "case_files_imported" => Some(EventKind::CaseFilesImported),
            "case_file_assigned" => Some(EventKind::CaseFileAssigned),
            "case_file_unassigned" => Some(EventKind::CaseFileUnassigned),
            "agent_saved" => Some(EventKind::AgentSaved),
            _ => None,
        }
    }

    pub fn entity(&self) -> EntityKind {
        match self {
            EventKind::CaseFilesImported => EntityKind::Batch,
            EventKind::CaseFileAssigned | EventKind::CaseFileUnassigned => EntityKind::CaseFile,
            EventKind::AgentSaved => EntityKind::Agent,
        }
    }
}

/// One audit trail entry; the entity type follows from `kind`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(kind: EventKind, entity_id: impl Into<String>, data: serde_json::Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            entity_id: entity_id.into(),
            data,
            actor: actor.to_string(),
        }
    }

    pub fn entity(&self) -> EntityKind {
        self.kind.entity()
    }
}

/// Open (creating if needed) the database at `path` with the schema in place
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    setup_database(&conn)?;
    debug!(path = %path.display(), "database ready");
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Case files (core columns + JSON attribute map)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS case_files (
            id TEXT PRIMARY KEY,
            file_no TEXT NOT NULL,
            client_id TEXT NOT NULL,
            client_name TEXT NOT NULL,
            bank TEXT NOT NULL,
            product_type TEXT NOT NULL,
            outstanding REAL NOT NULL DEFAULT 0,
            assigned_agent TEXT,
            status TEXT NOT NULL,
            attributes TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Agents directory
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            eligible_banks TEXT NOT NULL DEFAULT '[]'
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

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_case_files_bank ON case_files(bank, product_type)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_case_files_agent ON case_files(assigned_agent)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// CASE FILES
// ============================================================================

/// Upsert records by id inside one transaction
pub fn save_records(conn: &Connection, records: &[CaseFileRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;

    for record in records {
        let attributes_json = serde_json::to_string(&record.attributes)?;

        tx.execute(
            "INSERT INTO case_files (
                id, file_no, client_id, client_name, bank, product_type,
                outstanding, assigned_agent, status, attributes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                file_no = excluded.file_no,
                client_id = excluded.client_id,
                client_name = excluded.client_name,
                bank = excluded.bank,
                product_type = excluded.product_type,
                outstanding = excluded.outstanding,
                assigned_agent = excluded.assigned_agent,
                status = excluded.status,
                attributes = excluded.attributes,
                updated_at = CURRENT_TIMESTAMP",
            params![
                record.id,
                record.file_no,
                record.client_id,
                record.client_name,
                record.bank,
                record.product_type,
                record.outstanding,
                record.assigned_agent,
                record.status.as_str(),
                attributes_json,
            ],
        )
        .with_context(|| format!("Failed to save case file {}", record.id))?;
    }

    tx.commit()?;
    info!(saved = records.len(), "case files saved");
    Ok(records.len())
}

struct CaseFileRow {
    id: String,
    file_no: String,
    client_id: String,
    client_name: String,
    bank: String,
    product_type: String,
    outstanding: f64,
    assigned_agent: Option<String>,
    status: String,
    attributes: String,
}

impl CaseFileRow {
    fn into_record(self) -> Result<CaseFileRecord> {
        let status = AssignmentStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("Case file {} has unknown status '{}'", self.id, self.status))?;
        let attributes: BTreeMap<String, FieldValue> = serde_json::from_str(&self.attributes)
            .with_context(|| format!("Case file {} has malformed attributes", self.id))?;

        Ok(CaseFileRecord {
            id: self.id,
            file_no: self.file_no,
            client_id: self.client_id,
            client_name: self.client_name,
            bank: self.bank,
            product_type: self.product_type,
            outstanding: self.outstanding,
            assigned_agent: self.assigned_agent,
            status,
            attributes,
        })
    }
}

pub fn load_records(conn: &Connection) -> Result<Vec<CaseFileRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, file_no, client_id, client_name, bank, product_type,
                outstanding, assigned_agent, status, attributes
         FROM case_files
         ORDER BY created_at, id",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(CaseFileRow {
                id: row.get(0)?,
                file_no: row.get(1)?,
                client_id: row.get(2)?,
                client_name: row.get(3)?,
                bank: row.get(4)?,
                product_type: row.get(5)?,
                outstanding: row.get(6)?,
                assigned_agent: row.get(7)?,
                status: row.get(8)?,
                attributes: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(CaseFileRow::into_record).collect()
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM case_files", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// AGENTS
// ============================================================================

pub fn upsert_agent(conn: &Connection, agent: &Agent) -> Result<()> {
    let banks_json = serde_json::to_string(&agent.eligible_banks)?;

    conn.execute(
        "INSERT INTO agents (id, name, eligible_banks) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, eligible_banks = excluded.eligible_banks",
        params![agent.id, agent.name, banks_json],
    )?;

    Ok(())
}

pub fn load_agents(conn: &Connection) -> Result<AgentRegistry> {
    let mut stmt = conn.prepare("SELECT id, name, eligible_banks FROM agents ORDER BY id")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut registry = AgentRegistry::new();
    for (id, name, banks_json) in rows {
        let eligible_banks: BTreeSet<String> = serde_json::from_str(&banks_json)
            .with_context(|| format!("Agent {} has malformed eligible banks", id))?;
        registry.register(Agent {
            id,
            name,
            eligible_banks,
        });
    }

    Ok(registry)
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Append an event to the audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.kind.as_str(),
            event.entity().as_str(),
            event.entity_id,
            data_json,
            event.actor,
        ],
    )
    .with_context(|| format!("Failed to record {} for {}", event.kind.as_str(), event.entity_id))?;

    Ok(())
}

/// Audit trail of one batch, case file or agent, newest first
pub fn get_events_for_entity(conn: &Connection, entity: EntityKind, entity_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity.as_str(), entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let kind_str: String = row.get(2)?;
            let data_json: String = row.get(4)?;

            let kind = EventKind::parse(&kind_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    anyhow!("unknown event type '{}'", kind_str).into(),
                )
            })?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
                kind,
                entity_id: row.get(3)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?,
                actor: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// TESTS
// ============================================================================
