// ⚠️ Error Taxonomy
// Terminal ingestion errors, assignment errors, and non-fatal coercion warnings

use serde::{Deserialize, Serialize};

// ============================================================================
// CASE FILE ERROR
// ============================================================================

/// Every failure the ingestion pipeline, assignment engine or record store
/// can report.
///
/// `EmptyInput`, `Structural` and `TemplateNotFound` end an ingestion attempt
/// with no records produced. `AgentNotFound` ends only the assignment call
/// that raised it; the store is left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "error_kind", rename_all = "snake_case")]
pub enum CaseFileError {
    #[error("The uploaded sheet contains no rows")]
    EmptyInput,

    #[error("Missing required columns: {}", missing_columns.join(", "))]
    Structural { missing_columns: Vec<String> },

    #[error("No template for bank '{bank_id}' and product '{product_id}'")]
    TemplateNotFound { bank_id: String, product_id: String },

    #[error("Unknown agent: {agent_id}")]
    AgentNotFound { agent_id: String },

    #[error("Ingestion was cancelled before the batch completed")]
    Cancelled,

    #[error("No staged batch with id {batch_id}")]
    BatchNotFound { batch_id: String },

    #[error("Record ids already present in the store: {}", ids.join(", "))]
    IdCollision { ids: Vec<String> },
}

impl CaseFileError {
    /// One line per problem, for presenting to the operator as a list.
    pub fn itemized(&self) -> Vec<String> {
        match self {
            CaseFileError::Structural { missing_columns } => missing_columns
                .iter()
                .map(|column| format!("Missing required column: {}", column))
                .collect(),
            CaseFileError::IdCollision { ids } => ids
                .iter()
                .map(|id| format!("Record id already exists: {}", id))
                .collect(),
            other => vec![other.to_string()],
        }
    }

    /// True for errors that abort an ingestion attempt entirely.
    pub fn is_terminal_for_ingest(&self) -> bool {
        matches!(
            self,
            CaseFileError::EmptyInput
                | CaseFileError::Structural { .. }
                | CaseFileError::TemplateNotFound { .. }
                | CaseFileError::Cancelled
        )
    }
}

// ============================================================================
// FIELD COERCION WARNING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoercionReason {
    /// Cell could not be read as a number
    NotANumber,
    /// Generic outstanding was negative and clamped to zero
    NegativeOutstanding,
}

/// A numeric cell that was defaulted instead of rejected.
///
/// The batch still imports; these are collected so the default-to-zero
/// policy is auditable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCoercionWarning {
    /// 0-based index of the data row (header excluded)
    pub row_index: usize,
    /// Header as it appeared in the uploaded sheet
    pub header: String,
    /// Canonical field the header maps to
    pub field: String,
    pub raw_value: String,
    pub reason: CoercionReason,
}

impl std::fmt::Display for FieldCoercionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let what = match self.reason {
            CoercionReason::NotANumber => "not a number",
            CoercionReason::NegativeOutstanding => "negative outstanding",
        };
        write!(
            f,
            "row {} column '{}' ({}): '{}' is {}, defaulted to 0",
            self.row_index + 1,
            self.header,
            self.field,
            self.raw_value,
            what
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
