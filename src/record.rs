// 🗂️ Case File Record - Canonical debtor case, independent of source sheet
//
// Fixed core + sparse attribute map keyed by canonical field name.
// Updates return new values; records are never mutated in place once shared.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// ASSIGNMENT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Unassigned,
    Assigned,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Unassigned => "unassigned",
            AssignmentStatus::Assigned => "assigned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "unassigned" => Some(AssignmentStatus::Unassigned),
            "assigned" => Some(AssignmentStatus::Assigned),
            _ => None,
        }
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// FIELD VALUE
// ============================================================================

/// Value of a template-specific attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Number(_) => None,
        }
    }

    /// Cell text for this value (what an export would write)
    pub fn to_cell(&self) -> String {
        match self {
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }
}

// ============================================================================
// CASE FILE RECORD
// ============================================================================

/// Invariants (held by every constructor and update in this crate):
/// - `status == Assigned` iff `assigned_agent` is present and non-empty
/// - `outstanding >= 0`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseFileRecord {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    pub id: String,
    pub file_no: String,
    pub client_id: String,

    // ========================================================================
    // DESCRIPTIVE
    // ========================================================================
    pub client_name: String,
    pub bank: String,
    pub product_type: String,

    // ========================================================================
    // FINANCIAL
    // ========================================================================
    pub outstanding: f64,

    // ========================================================================
    // ASSIGNMENT
    // ========================================================================
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    pub status: AssignmentStatus,

    // ========================================================================
    // TEMPLATE-SPECIFIC ATTRIBUTES (sparse)
    // ========================================================================
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, FieldValue>,
}

impl CaseFileRecord {
    /// New unassigned record with zero outstanding
    pub fn new(id: impl Into<String>, bank: impl Into<String>, product_type: impl Into<String>) -> Self {
        CaseFileRecord {
            id: id.into(),
            file_no: String::new(),
            client_id: String::new(),
            client_name: String::new(),
            bank: bank.into(),
            product_type: product_type.into(),
            outstanding: 0.0,
            assigned_agent: None,
            status: AssignmentStatus::Unassigned,
            attributes: BTreeMap::new(),
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.status == AssignmentStatus::Assigned
    }

    /// Copy of this record owned by `agent_name`.
    /// A blank name yields an unassigned copy so the invariant holds.
    pub fn with_agent(&self, agent_name: &str) -> CaseFileRecord {
        let mut next = self.clone();
        let name = agent_name.trim();
        if name.is_empty() {
            next.assigned_agent = None;
            next.status = AssignmentStatus::Unassigned;
        } else {
            next.assigned_agent = Some(name.to_string());
            next.status = AssignmentStatus::Assigned;
        }
        next
    }

    /// Copy of this record with no owning agent
    pub fn without_agent(&self) -> CaseFileRecord {
        let mut next = self.clone();
        next.assigned_agent = None;
        next.status = AssignmentStatus::Unassigned;
        next
    }

    pub fn attribute(&self, field: &str) -> Option<&FieldValue> {
        self.attributes.get(field)
    }

    pub fn attribute_text(&self, field: &str) -> Option<&str> {
        self.attributes.get(field).and_then(|v| v.as_str())
    }

    pub fn attribute_number(&self, field: &str) -> Option<f64> {
        self.attributes.get(field).and_then(|v| v.as_f64())
    }

    /// Check the record invariants
    pub fn is_consistent(&self) -> bool {
        let has_agent = self
            .assigned_agent
            .as_deref()
            .map(|a| !a.trim().is_empty())
            .unwrap_or(false);

        has_agent == self.is_assigned() && self.outstanding >= 0.0 && self.outstanding.is_finite()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_unassigned() {
        let record = CaseFileRecord::new("r1", "DBBL", "CreditCard");

        assert_eq!(record.status, AssignmentStatus::Unassigned);
        assert!(record.assigned_agent.is_none());
        assert_eq!(record.outstanding, 0.0);
        assert!(record.is_consistent());
    }

    #[test]
    fn test_with_agent_is_copy_on_write() {
        let original = CaseFileRecord::new("r1", "DBBL", "CreditCard");
        let assigned = original.with_agent("Jane");

        assert_eq!(original.status, AssignmentStatus::Unassigned);
        assert_eq!(assigned.status, AssignmentStatus::Assigned);
        assert_eq!(assigned.assigned_agent.as_deref(), Some("Jane"));
        assert!(assigned.is_consistent());
    }

    #[test]
    fn test_with_blank_agent_stays_unassigned() {
        let record = CaseFileRecord::new("r1", "DBBL", "CreditCard").with_agent("   ");
        assert_eq!(record.status, AssignmentStatus::Unassigned);
        assert!(record.is_consistent());
    }

    #[test]
    fn test_without_agent() {
        let record = CaseFileRecord::new("r1", "DBBL", "CreditCard")
            .with_agent("Jane")
            .without_agent();

        assert_eq!(record.status, AssignmentStatus::Unassigned);
        assert!(record.assigned_agent.is_none());
    }

    #[test]
    fn test_inconsistent_record_detected() {
        let mut record = CaseFileRecord::new("r1", "DBBL", "CreditCard");
        record.status = AssignmentStatus::Assigned;
        assert!(!record.is_consistent());

        let mut record = CaseFileRecord::new("r2", "DBBL", "CreditCard");
        record.outstanding = -1.0;
        assert!(!record.is_consistent());
    }

    #[test]
    fn test_serializes_camel_case_and_sparse() {
        let mut record = CaseFileRecord::new("r1", "DBBL", "Loan");
        record.attributes.insert("interestRate".to_string(), FieldValue::Number(9.5));
        record
            .attributes
            .insert("mobile".to_string(), FieldValue::Text("0171".to_string()));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["productType"], "Loan");
        assert_eq!(json["status"], "unassigned");
        assert!(json.get("assignedAgent").is_none());
        assert_eq!(json["attributes"]["interestRate"], 9.5);

        let back: CaseFileRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.attribute_number("interestRate"), Some(9.5));
        assert_eq!(back.attribute_text("mobile"), Some("0171"));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(AssignmentStatus::parse(" Assigned "), Some(AssignmentStatus::Assigned));
        assert_eq!(AssignmentStatus::parse("visited"), None);
    }
}
