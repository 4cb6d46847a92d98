// 🏛️ Field Catalog - Canonical field names and how each one is coerced
// Templates map headers onto these names; the normalizer asks the catalog what to do with them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// FIELD KINDS
// ============================================================================

/// Generic slots on the canonical record that every template converges on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenericSlot {
    FileNo,
    ClientId,
    ClientName,
    Outstanding,
    AssignedAgent,
}

impl GenericSlot {
    pub fn is_numeric(&self) -> bool {
        matches!(self, GenericSlot::Outstanding)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Writes straight into a generic slot (always wins over an alias)
    Core(GenericSlot),
    /// Floating-point value; unparseable cells default to 0
    Numeric,
    /// Owning agent's name; a non-empty value marks the file assigned
    AgentName,
    /// Kept as a template-specific attribute and also written into a generic slot
    Alias(GenericSlot),
    /// Serial/sequence column, used to synthesize a file number
    Serial,
    /// Copied unchanged into the attribute map
    Verbatim,
}

impl FieldKind {
    pub fn is_numeric(&self) -> bool {
        match self {
            FieldKind::Numeric => true,
            FieldKind::Core(slot) | FieldKind::Alias(slot) => slot.is_numeric(),
            _ => false,
        }
    }
}

// ============================================================================
// FIELD DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Canonical name (e.g., "totalOutstanding")
    pub name: String,
    pub kind: FieldKind,
    pub description: String,
    pub examples: Vec<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        FieldDefinition {
            name: name.into(),
            kind,
            description: String::new(),
            examples: Vec::new(),
        }
    }

    /// Builder: add description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: add example
    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }
}

// ============================================================================
// FIELD REGISTRY
// ============================================================================

/// Catalog of every canonical field any template can produce.
///
/// Names not in the catalog are treated as verbatim attributes, so a template
/// can introduce a new descriptive column without touching this file.
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    fields: HashMap<String, FieldDefinition>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        let mut registry = FieldRegistry {
            fields: HashMap::new(),
        };

        registry.register_core_fields();
        registry
    }

    fn register_core_fields(&mut self) {
        // ====================================================================
        // IDENTITY
        // ====================================================================

        self.register(
            FieldDefinition::new("fileNo", FieldKind::Core(GenericSlot::FileNo))
                .with_description("Case file number assigned by the bank")
                .with_example("DB-CC-0041"),
        );

        self.register(
            FieldDefinition::new("clientId", FieldKind::Core(GenericSlot::ClientId))
                .with_description("Bank-side client / CIF identifier")
                .with_example("CL1"),
        );

        self.register(
            FieldDefinition::new("clientName", FieldKind::Core(GenericSlot::ClientName))
                .with_description("Debtor name")
                .with_example("Test User"),
        );

        self.register(
            FieldDefinition::new("serialNo", FieldKind::Serial)
                .with_description("Row serial from the bank's sheet; seeds a synthesized file number")
                .with_example("001"),
        );

        // ====================================================================
        // ALIASES (template-specific names for generic slots)
        // ====================================================================

        self.register(
            FieldDefinition::new("customerName", FieldKind::Alias(GenericSlot::ClientName))
                .with_description("Loan sheets' customer name; also fills clientName"),
        );

        self.register(
            FieldDefinition::new("cardHolderName", FieldKind::Alias(GenericSlot::ClientName))
                .with_description("Card sheets' holder name; also fills clientName"),
        );

        self.register(
            FieldDefinition::new("totalOutstanding", FieldKind::Alias(GenericSlot::Outstanding))
                .with_description("Loan total outstanding; also fills outstanding")
                .with_example("125000.50"),
        );

        self.register(
            FieldDefinition::new(
                "outstandingWithCommission",
                FieldKind::Alias(GenericSlot::Outstanding),
            )
            .with_description("Outstanding including collection commission; also fills outstanding"),
        );

        self.register(
            FieldDefinition::new("currentAgent", FieldKind::Alias(GenericSlot::AssignedAgent))
                .with_description("Agent already working the file; also fills assignedAgent"),
        );

        // ====================================================================
        // FINANCIAL
        // ====================================================================

        self.register(
            FieldDefinition::new("outstanding", FieldKind::Core(GenericSlot::Outstanding))
                .with_description("Amount owed, non-negative")
                .with_example("50000"),
        );

        for name in [
            "creditLimit",
            "principalOutstanding",
            "interestRate",
            "commissionRate",
            "emiAmount",
            "disbursedAmount",
            "overdueAmount",
            "minimumDue",
            "lastPaymentAmount",
        ] {
            self.register(
                FieldDefinition::new(name, FieldKind::Numeric)
                    .with_description("Per-product amount or rate"),
            );
        }

        // ====================================================================
        // ASSIGNMENT
        // ====================================================================

        self.register(
            FieldDefinition::new("agentName", FieldKind::AgentName)
                .with_description("Agent named in the upload; marks the file assigned")
                .with_example("Jane"),
        );

        // ====================================================================
        // DESCRIPTIVE (verbatim)
        // ====================================================================

        for name in [
            "cardNo",
            "accountNo",
            "mobile",
            "phone",
            "address",
            "presentAddress",
            "permanentAddress",
            "officeAddress",
            "branch",
            "lastPaymentDate",
            "disbursementDate",
            "allegationDate",
            "expiryDate",
            "remarks",
        ] {
            self.register(FieldDefinition::new(name, FieldKind::Verbatim));
        }
    }

    /// Register a new field
    pub fn register(&mut self, field: FieldDefinition) {
        self.fields.insert(field.name.clone(), field);
    }

    pub fn get(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    /// Kind of a canonical field; unknown names are verbatim
    pub fn kind_of(&self, name: &str) -> FieldKind {
        self.fields
            .get(name)
            .map(|f| f.kind)
            .unwrap_or(FieldKind::Verbatim)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.fields.len()
    }
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
