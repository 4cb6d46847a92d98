// Case File Desk - Core Library
// Multi-bank case file ingestion and agent assignment, shared by the CLI and API server

pub mod error;
pub mod config;
pub mod fields;         // Canonical field catalog
pub mod templates;      // Per bank × product upload schemas
pub mod sheet;          // Tabular rows + CSV/xlsx reading
pub mod validator;      // Structural validation
pub mod mapper;         // Header → canonical field mapping
pub mod record;
pub mod normalizer;
pub mod assignment;
pub mod ingest;
pub mod store;
pub mod export;
pub mod db;

// Re-export commonly used types
pub use error::{CaseFileError, CoercionReason, FieldCoercionWarning};
pub use config::{AppConfig, AssignmentConfig, IngestConfig, ServerConfig, StorageConfig};
pub use fields::{FieldDefinition, FieldKind, FieldRegistry, GenericSlot};
pub use templates::{Template, TemplateRegistry, TEMPLATES};
pub use sheet::{read_csv, read_csv_file, read_sheet_file, read_xlsx_file, Row};
pub use validator::{validate, StructuralValidator, ValidationReport};
pub use mapper::{map_columns, ColumnMapping, MappedColumn, MatchQuality};
pub use record::{AssignmentStatus, CaseFileRecord, FieldValue};
pub use normalizer::{coerce_number, IngestContext, NormalizedRow, RecordNormalizer};
pub use assignment::{
    Agent, AgentRegistry, AssignmentEngine, AssignmentOutcome, EligibilityPolicy,
};
pub use ingest::{spawn_ingest, BatchPreview, CancelFlag, IngestHandle, IngestPipeline, StagedBatch};
pub use store::CaseFileStore;
pub use export::{export_all, export_sample, SampleSheet, Workbook};
pub use db::{
    EntityKind, Event, EventKind,
    open_database, setup_database, save_records, load_records, verify_count,
    upsert_agent, load_agents, insert_event, get_events_for_entity,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
