// 🧹 Record Normalizer - Raw sheet row → canonical CaseFileRecord
//
// Coercion policy: robustness over strictness. A numeric cell that does not
// parse becomes 0 and a FieldCoercionWarning, never a rejected row.

use crate::config::IngestConfig;
use crate::error::{CoercionReason, FieldCoercionWarning};
use crate::fields::{FieldKind, FieldRegistry, GenericSlot};
use crate::mapper::ColumnMapping;
use crate::record::{AssignmentStatus, CaseFileRecord, FieldValue};
use crate::sheet::{header_key, Row};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

/// Headers (folded) that count as a serial/sequence column when no template
/// header was mapped to `serialNo`.
const SERIAL_HEADERS: &[&str] = &[
    "si no", "sl", "sl no", "sl.", "s/n", "sn", "serial", "serial no", "seq", "sequence", "#",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Expiry offset used when the configured one runs past the calendar
const FALLBACK_EXPIRY_DAYS: i64 = 365;

// ============================================================================
// INPUT / OUTPUT
// ============================================================================

/// Per-row inputs that make `normalize` a pure function
#[derive(Debug, Clone, Copy)]
pub struct IngestContext {
    pub ingested_at: DateTime<Utc>,
    /// 0-based index of the row within its uploaded sheet, blank rows included
    pub row_index: usize,
    /// Batch the row belongs to; nil outside a pipeline run
    pub batch_id: Uuid,
}

impl IngestContext {
    pub fn new(ingested_at: DateTime<Utc>, row_index: usize) -> Self {
        IngestContext {
            ingested_at,
            row_index,
            batch_id: Uuid::nil(),
        }
    }

    pub fn with_batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = batch_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub record: CaseFileRecord,
    pub warnings: Vec<FieldCoercionWarning>,
}

/// Parse a numeric cell. Thousands separators are ignored; blanks,
/// non-numbers and non-finite values are `None`.
pub fn coerce_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

// ============================================================================
// SLOT TRACKING
// ============================================================================

/// Which generic slots were written, and whether by a direct (core) field.
/// Direct fields overwrite; aliases only fill a slot nobody has written yet.
#[derive(Default)]
struct SlotWrites {
    written: HashMap<GenericSlot, bool>,
}

impl SlotWrites {
    fn may_write(&self, slot: GenericSlot, direct: bool) -> bool {
        direct || !self.written.contains_key(&slot)
    }

    fn mark(&mut self, slot: GenericSlot, direct: bool) {
        let entry = self.written.entry(slot).or_insert(direct);
        *entry = *entry || direct;
    }
}

// ============================================================================
// RECORD NORMALIZER
// ============================================================================

#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    fields: FieldRegistry,
    config: IngestConfig,
}

impl RecordNormalizer {
    pub fn new(config: IngestConfig) -> Self {
        RecordNormalizer {
            fields: FieldRegistry::new(),
            config,
        }
    }

    pub fn with_fields(fields: FieldRegistry, config: IngestConfig) -> Self {
        RecordNormalizer { fields, config }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Record id: prefix + ingestion timestamp (ms) + batch tag + row index.
    ///
    /// The batch tag is the leading hex of the batch uuid, so two batches
    /// ingested in the same millisecond still get distinct ids.
    pub fn record_id(&self, ctx: &IngestContext) -> String {
        let batch = ctx.batch_id.simple().to_string();
        format!(
            "{}-{}-{}-{}",
            self.config.id_prefix,
            ctx.ingested_at.timestamp_millis(),
            &batch[..8],
            ctx.row_index
        )
    }

    /// Convert one mapped row into a canonical record.
    ///
    /// Pure: the same row, mapping, ids and context always yield the same
    /// record and warnings. The output always satisfies the record
    /// invariants (status agrees with agent presence, outstanding >= 0).
    pub fn normalize(
        &self,
        row: &Row,
        mapping: &ColumnMapping,
        bank_id: &str,
        product_id: &str,
        ctx: &IngestContext,
    ) -> NormalizedRow {
        let mut record = CaseFileRecord::new(self.record_id(ctx), bank_id, product_id);
        let mut warnings = Vec::new();
        let mut slots = SlotWrites::default();

        for (header, raw) in row.iter() {
            let Some(field) = mapping.field_for(header) else {
                continue;
            };
            let kind = self.fields.kind_of(field);
            let value = raw.trim();

            match kind {
                FieldKind::Core(slot) => {
                    self.write_slot(&mut record, &mut slots, &mut warnings, slot, true, header, field, value, ctx);
                }
                FieldKind::Alias(slot) => {
                    if slot.is_numeric() {
                        if let Some(n) = self.numeric_cell(header, field, value, ctx, &mut warnings) {
                            record.attributes.insert(field.to_string(), FieldValue::Number(n));
                        }
                    } else if !value.is_empty() {
                        record
                            .attributes
                            .insert(field.to_string(), FieldValue::Text(value.to_string()));
                    }
                    // the attribute already carries any coercion warning
                    let mut ignored = Vec::new();
                    self.write_slot(&mut record, &mut slots, &mut ignored, slot, false, header, field, value, ctx);
                    warnings.extend(
                        ignored
                            .into_iter()
                            .filter(|w| w.reason != CoercionReason::NotANumber),
                    );
                }
                FieldKind::Numeric => {
                    if let Some(n) = self.numeric_cell(header, field, value, ctx, &mut warnings) {
                        record.attributes.insert(field.to_string(), FieldValue::Number(n));
                    }
                }
                FieldKind::AgentName => {
                    self.write_slot(
                        &mut record,
                        &mut slots,
                        &mut warnings,
                        GenericSlot::AssignedAgent,
                        true,
                        header,
                        field,
                        value,
                        ctx,
                    );
                }
                FieldKind::Serial | FieldKind::Verbatim => {
                    if !value.is_empty() {
                        record
                            .attributes
                            .insert(field.to_string(), FieldValue::Text(raw.to_string()));
                    }
                }
            }
        }

        self.apply_defaults(&mut record, row, ctx);

        for warning in &warnings {
            warn!(
                row = warning.row_index + 1,
                header = %warning.header,
                field = %warning.field,
                raw = %warning.raw_value,
                "numeric cell defaulted to 0"
            );
        }

        NormalizedRow { record, warnings }
    }

    /// Parse a non-blank numeric cell, defaulting to 0 with a warning.
    /// Blank cells are treated as absent.
    fn numeric_cell(
        &self,
        header: &str,
        field: &str,
        value: &str,
        ctx: &IngestContext,
        warnings: &mut Vec<FieldCoercionWarning>,
    ) -> Option<f64> {
        if value.is_empty() {
            return None;
        }

        match coerce_number(value) {
            Some(n) => Some(n),
            None => {
                warnings.push(FieldCoercionWarning {
                    row_index: ctx.row_index,
                    header: header.to_string(),
                    field: field.to_string(),
                    raw_value: value.to_string(),
                    reason: CoercionReason::NotANumber,
                });
                Some(0.0)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_slot(
        &self,
        record: &mut CaseFileRecord,
        slots: &mut SlotWrites,
        warnings: &mut Vec<FieldCoercionWarning>,
        slot: GenericSlot,
        direct: bool,
        header: &str,
        field: &str,
        value: &str,
        ctx: &IngestContext,
    ) {
        if value.is_empty() || !slots.may_write(slot, direct) {
            return;
        }

        match slot {
            GenericSlot::FileNo => record.file_no = value.to_string(),
            GenericSlot::ClientId => record.client_id = value.to_string(),
            GenericSlot::ClientName => record.client_name = value.to_string(),
            GenericSlot::Outstanding => {
                let parsed = self.numeric_cell(header, field, value, ctx, warnings).unwrap_or(0.0);
                record.outstanding = if parsed < 0.0 {
                    warnings.push(FieldCoercionWarning {
                        row_index: ctx.row_index,
                        header: header.to_string(),
                        field: field.to_string(),
                        raw_value: value.to_string(),
                        reason: CoercionReason::NegativeOutstanding,
                    });
                    0.0
                } else {
                    parsed
                };
            }
            GenericSlot::AssignedAgent => {
                record.assigned_agent = Some(value.to_string());
                record.status = AssignmentStatus::Assigned;
            }
        }

        slots.mark(slot, direct);
    }

    /// Fill fields still unset after mapping
    fn apply_defaults(&self, record: &mut CaseFileRecord, row: &Row, ctx: &IngestContext) {
        if record.file_no.is_empty() {
            let serial = record
                .attribute_text("serialNo")
                .map(|s| s.trim().to_string())
                .or_else(|| serial_from_row(row))
                .unwrap_or_else(|| (ctx.row_index + 1).to_string());
            record.file_no = format!("{}{}", self.config.file_no_prefix, serial);
        }

        let ingest_date = ctx.ingested_at.date_naive();

        if !record.attributes.contains_key("allegationDate") {
            record.attributes.insert(
                "allegationDate".to_string(),
                FieldValue::Text(ingest_date.format(DATE_FORMAT).to_string()),
            );
        }

        if !record.attributes.contains_key("expiryDate") {
            let expiry = Duration::try_days(self.config.expiry_days)
                .and_then(|offset| ingest_date.checked_add_signed(offset))
                .unwrap_or_else(|| {
                    warn!(
                        expiry_days = self.config.expiry_days,
                        fallback = FALLBACK_EXPIRY_DAYS,
                        "expiry offset out of range, using fallback"
                    );
                    ingest_date + Duration::days(FALLBACK_EXPIRY_DAYS)
                });
            record.attributes.insert(
                "expiryDate".to_string(),
                FieldValue::Text(expiry.format(DATE_FORMAT).to_string()),
            );
        }

        if !record.outstanding.is_finite() || record.outstanding < 0.0 {
            record.outstanding = 0.0;
        }
    }
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self::new(IngestConfig::default())
    }
}

/// First non-blank cell under a serial-like header
fn serial_from_row(row: &Row) -> Option<String> {
    row.iter()
        .find(|(h, v)| SERIAL_HEADERS.contains(&header_key(h).as_str()) && !v.trim().is_empty())
        .map(|(_, v)| v.trim().to_string())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::map_columns;
    use crate::templates::TemplateRegistry;
    use chrono::TimeZone;

    fn ctx(row_index: usize) -> IngestContext {
        IngestContext::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(), row_index)
    }

    fn normalize_with(bank: &str, product: &str, row: &Row) -> NormalizedRow {
        let registry = TemplateRegistry::new();
        let template = registry.resolve(bank, product).unwrap();
        let mapping = map_columns(&row.headers(), template);
        RecordNormalizer::default().normalize(row, &mapping, template.bank_id, template.product_id, &ctx(0))
    }

    fn dbbl_card_row() -> Row {
        Row::from_pairs([
            ("SI No", "001"),
            ("Card", "1234"),
            ("Client ID", "CL1"),
            ("Name", "Test User"),
            ("Outstanding", "50000"),
        ])
    }

    #[test]
    fn test_dbbl_credit_card_row() {
        let out = normalize_with("DBBL", "CreditCard", &dbbl_card_row());
        let record = out.record;

        assert_eq!(record.outstanding, 50000.0);
        assert_eq!(record.status, AssignmentStatus::Unassigned);
        assert_eq!(record.client_name, "Test User");
        assert_eq!(record.client_id, "CL1");
        assert_eq!(record.bank, "DBBL");
        assert_eq!(record.product_type, "CreditCard");
        assert_eq!(record.attribute_text("cardNo"), Some("1234"));
        assert!(out.warnings.is_empty());
        assert!(record.is_consistent());
    }

    #[test]
    fn test_agent_name_marks_assigned() {
        let mut row = dbbl_card_row();
        row.set("Agent Name", "Jane");

        let record = normalize_with("DBBL", "CreditCard", &row).record;
        assert_eq!(record.status, AssignmentStatus::Assigned);
        assert_eq!(record.assigned_agent.as_deref(), Some("Jane"));
    }

    #[test]
    fn test_blank_agent_name_stays_unassigned() {
        let mut row = dbbl_card_row();
        row.set("Agent Name", "   ");

        let record = normalize_with("DBBL", "CreditCard", &row).record;
        assert_eq!(record.status, AssignmentStatus::Unassigned);
        assert!(record.assigned_agent.is_none());
    }

    #[test]
    fn test_unparseable_outstanding_defaults_to_zero_with_warning() {
        let mut row = dbbl_card_row();
        row.set("Outstanding", "N/A");

        let out = normalize_with("DBBL", "CreditCard", &row);
        assert_eq!(out.record.outstanding, 0.0);
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].header, "Outstanding");
        assert_eq!(out.warnings[0].reason, CoercionReason::NotANumber);
    }

    #[test]
    fn test_negative_outstanding_is_clamped() {
        let mut row = dbbl_card_row();
        row.set("Outstanding", "-200");

        let out = normalize_with("DBBL", "CreditCard", &row);
        assert_eq!(out.record.outstanding, 0.0);
        assert_eq!(out.warnings[0].reason, CoercionReason::NegativeOutstanding);
        assert!(out.record.is_consistent());
    }

    #[test]
    fn test_thousands_separators() {
        assert_eq!(coerce_number("1,25,000.50"), Some(125000.5));
        assert_eq!(coerce_number("  42 "), Some(42.0));
        assert_eq!(coerce_number("inf"), None);
        assert_eq!(coerce_number(""), None);
        assert_eq!(coerce_number("12abc"), None);
    }

    #[test]
    fn test_loan_aliases_fill_generic_fields() {
        let row = Row::from_pairs([
            ("SL", "7"),
            ("Account No", "1051100012345"),
            ("Customer ID", "CUST-1"),
            ("Customer Name", "Karim Hossain"),
            ("Total Outstanding", "125000.50"),
            ("Current Agent", "Rafi"),
        ]);

        let record = normalize_with("DBBL", "Loan", &row).record;

        assert_eq!(record.client_name, "Karim Hossain");
        assert_eq!(record.attribute_text("customerName"), Some("Karim Hossain"));
        assert_eq!(record.outstanding, 125000.5);
        assert_eq!(record.attribute_number("totalOutstanding"), Some(125000.5));
        assert_eq!(record.assigned_agent.as_deref(), Some("Rafi"));
        assert_eq!(record.status, AssignmentStatus::Assigned);
        assert_eq!(record.attribute_text("currentAgent"), Some("Rafi"));
    }

    #[test]
    fn test_card_holder_and_commission_aliases() {
        let row = Row::from_pairs([
            ("Serial", "3"),
            ("Card Number", "5500"),
            ("CIF", "CIF1"),
            ("Card Holder Name", "Nasrin Akter"),
            ("Outstanding Incl. Commission", "78,250"),
        ]);

        let record = normalize_with("BRAC", "CreditCard", &row).record;
        assert_eq!(record.client_name, "Nasrin Akter");
        assert_eq!(record.outstanding, 78250.0);
        assert_eq!(record.attribute_number("outstandingWithCommission"), Some(78250.0));
    }

    #[test]
    fn test_unparseable_alias_warns_once() {
        let row = Row::from_pairs([
            ("SL", "1"),
            ("Customer Name", "X"),
            ("Total Outstanding", "pending"),
        ]);

        let out = normalize_with("DBBL", "Loan", &row);
        assert_eq!(out.record.outstanding, 0.0);
        assert_eq!(out.record.attribute_number("totalOutstanding"), Some(0.0));
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_direct_field_wins_over_alias() {
        // No template carries both columns; splice two mappings together
        let registry = TemplateRegistry::new();
        let loan = registry.resolve("DBBL", "Loan").unwrap();
        let card = registry.resolve("DBBL", "CreditCard").unwrap();

        let row = Row::from_pairs([("Total Outstanding", "900"), ("Outstanding", "100")]);
        let mut mapping = map_columns(&["Total Outstanding"], loan);
        mapping.columns.extend(map_columns(&["Outstanding"], card).columns);

        let out = RecordNormalizer::default().normalize(&row, &mapping, "DBBL", "Loan", &ctx(0));
        assert_eq!(out.record.outstanding, 100.0);
        assert_eq!(out.record.attribute_number("totalOutstanding"), Some(900.0));

        let reversed = Row::from_pairs([("Outstanding", "100"), ("Total Outstanding", "900")]);
        let out = RecordNormalizer::default().normalize(&reversed, &mapping, "DBBL", "Loan", &ctx(0));
        assert_eq!(out.record.outstanding, 100.0);
    }

    #[test]
    fn test_file_no_synthesized_from_serial() {
        let record = normalize_with("DBBL", "CreditCard", &dbbl_card_row()).record;
        assert_eq!(record.file_no, "AUTO-001");
    }

    #[test]
    fn test_source_file_no_is_kept() {
        let mut row = dbbl_card_row();
        row.set("File No", "DB-CC-0041");

        let record = normalize_with("DBBL", "CreditCard", &row).record;
        assert_eq!(record.file_no, "DB-CC-0041");
    }

    #[test]
    fn test_file_no_from_unmapped_serial_header_then_row_index() {
        let registry = TemplateRegistry::new();
        let template = registry.resolve("DBBL", "CreditCard").unwrap();
        let normalizer = RecordNormalizer::default();

        // "Sequence" is not a DBBL header but still looks like a serial column
        let row = Row::from_pairs([("Sequence", "88"), ("Name", "A")]);
        let mapping = map_columns(&row.headers(), template);
        let out = normalizer.normalize(&row, &mapping, "DBBL", "CreditCard", &ctx(4));
        assert_eq!(out.record.file_no, "AUTO-88");

        let row = Row::from_pairs([("Name", "B")]);
        let mapping = map_columns(&row.headers(), template);
        let out = normalizer.normalize(&row, &mapping, "DBBL", "CreditCard", &ctx(4));
        assert_eq!(out.record.file_no, "AUTO-5");
    }

    #[test]
    fn test_date_defaults() {
        let record = normalize_with("DBBL", "CreditCard", &dbbl_card_row()).record;

        assert_eq!(record.attribute_text("allegationDate"), Some("2024-05-01"));
        assert_eq!(record.attribute_text("expiryDate"), Some("2025-05-01"));
    }

    #[test]
    fn test_source_dates_are_kept() {
        let mut row = dbbl_card_row();
        row.set("Allegation Date", "2024-02-01");
        row.set("Expiry Date", "2025-02-01");

        let record = normalize_with("DBBL", "CreditCard", &row).record;
        assert_eq!(record.attribute_text("allegationDate"), Some("2024-02-01"));
        assert_eq!(record.attribute_text("expiryDate"), Some("2025-02-01"));
    }

    #[test]
    fn test_ids_unique_within_batch_and_across_batches() {
        let normalizer = RecordNormalizer::default();
        let first = ctx(0);
        let second = ctx(1);
        let later = IngestContext::new(first.ingested_at + Duration::milliseconds(5), 0);

        assert_ne!(normalizer.record_id(&first), normalizer.record_id(&second));
        assert_ne!(normalizer.record_id(&first), normalizer.record_id(&later));
        assert!(normalizer.record_id(&first).starts_with("CF-"));
    }

    #[test]
    fn test_same_millisecond_batches_get_distinct_ids() {
        let normalizer = RecordNormalizer::default();
        let a = ctx(0).with_batch(Uuid::new_v4());
        let b = ctx(0).with_batch(Uuid::new_v4());

        assert_eq!(a.ingested_at, b.ingested_at);
        assert_ne!(normalizer.record_id(&a), normalizer.record_id(&b));
    }

    #[test]
    fn test_huge_expiry_falls_back_instead_of_overflowing() {
        let config = IngestConfig {
            expiry_days: 200_000_000,
            ..IngestConfig::default()
        };
        let registry = TemplateRegistry::new();
        let template = registry.resolve("DBBL", "CreditCard").unwrap();
        let row = dbbl_card_row();
        let mapping = map_columns(&row.headers(), template);

        let out = RecordNormalizer::new(config).normalize(&row, &mapping, "DBBL", "CreditCard", &ctx(0));
        assert_eq!(out.record.attribute_text("expiryDate"), Some("2025-05-01"));
    }

    #[test]
    fn test_normalize_is_pure() {
        let row = dbbl_card_row();
        let a = normalize_with("DBBL", "CreditCard", &row);
        let b = normalize_with("DBBL", "CreditCard", &row);
        assert_eq!(a, b);
    }

    #[test]
    fn test_numeric_values_are_idempotent() {
        let row = Row::from_pairs([
            ("SL", "1"),
            ("Customer Name", "X"),
            ("Total Outstanding", "1,234.5678"),
            ("Interest Rate", "9.125"),
            ("EMI", "0.1"),
            ("Disbursed Amount", "garbage"),
        ]);
        let first_out = normalize_with("DBBL", "Loan", &row);
        assert_eq!(first_out.warnings.len(), 1);
        assert_eq!(first_out.warnings[0].header, "Disbursed Amount");
        assert_eq!(first_out.warnings[0].reason, CoercionReason::NotANumber);
        let first = first_out.record;

        // Feed the normalized numbers back through as cells
        let mut again = row.clone();
        again.set("Total Outstanding", first.attribute("totalOutstanding").unwrap().to_cell());
        again.set("Interest Rate", first.attribute("interestRate").unwrap().to_cell());
        again.set("EMI", first.attribute("emiAmount").unwrap().to_cell());
        again.set("Disbursed Amount", first.attribute("disbursedAmount").unwrap().to_cell());
        let second = normalize_with("DBBL", "Loan", &again).record;

        assert_eq!(first.outstanding, second.outstanding);
        for field in ["totalOutstanding", "interestRate", "emiAmount", "disbursedAmount"] {
            assert_eq!(first.attribute_number(field), second.attribute_number(field), "{}", field);
        }
    }

    #[test]
    fn test_unmapped_columns_do_not_leak_into_attributes() {
        let mut row = dbbl_card_row();
        row.set("Spouse Name", "Someone");

        let record = normalize_with("DBBL", "CreditCard", &row).record;
        assert!(record.attribute("Spouse Name").is_none());
        assert!(record.attribute("spouseName").is_none());
    }

    #[test]
    fn test_every_template_sample_normalizes_consistently() {
        let registry = TemplateRegistry::new();
        let normalizer = RecordNormalizer::default();

        for template in registry.all() {
            let row = Row::from_pairs(template.sample_row.iter().copied());
            let mapping = map_columns(&row.headers(), template);
            let out = normalizer.normalize(&row, &mapping, template.bank_id, template.product_id, &ctx(0));

            assert!(out.record.is_consistent(), "{}", template.name);
            assert!(out.record.outstanding > 0.0, "{}", template.name);
            assert!(!out.record.client_name.is_empty(), "{}", template.name);
            assert_eq!(out.record.status, AssignmentStatus::Assigned, "{}", template.name);
            assert!(out.warnings.is_empty(), "{}", template.name);
        }
    }
}
