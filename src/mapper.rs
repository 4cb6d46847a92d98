// 🔗 Column Mapper - Detected headers → canonical field names

use crate::sheet::header_key;
use crate::templates::Template;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchQuality {
    Exact,
    /// Matched only after trimming and case folding
    Folded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedColumn {
    /// Header as it appears in the upload
    pub detected: String,
    /// Template header it matched
    pub template_header: &'static str,
    pub field: &'static str,
    pub quality: MatchQuality,
}

/// Mapping from uploaded headers to canonical fields.
///
/// Headers with no template counterpart land in `unmatched` instead of
/// disappearing, so callers can see what an upload carried that was ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    pub columns: Vec<MappedColumn>,
    pub unmatched: Vec<String>,
}

impl ColumnMapping {
    pub fn field_for(&self, detected: &str) -> Option<&'static str> {
        self.columns
            .iter()
            .find(|c| c.detected == detected)
            .map(|c| c.field)
    }

    /// Detected header that feeds a canonical field, if any
    pub fn header_for(&self, field: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.detected.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Build the mapping for one upload.
///
/// Exact header match against `template.column_map` first, then a
/// trimmed, case-insensitive match. Each template header is claimed by at
/// most one detected header; later duplicates are reported as unmatched.
pub fn map_columns<S: AsRef<str>>(detected_headers: &[S], template: &Template) -> ColumnMapping {
    let mut mapping = ColumnMapping::default();
    let mut claimed: Vec<&'static str> = Vec::new();

    for detected in detected_headers {
        let detected = detected.as_ref();

        let exact = template
            .column_map
            .iter()
            .find(|(h, _)| *h == detected && !claimed.contains(h))
            .map(|entry| (entry, MatchQuality::Exact));

        let found = exact.or_else(|| {
            let key = header_key(detected);
            template
                .column_map
                .iter()
                .find(|(h, _)| header_key(h) == key && !claimed.contains(h))
                .map(|entry| (entry, MatchQuality::Folded))
        });

        match found {
            Some((&(template_header, field), quality)) => {
                claimed.push(template_header);
                mapping.columns.push(MappedColumn {
                    detected: detected.to_string(),
                    template_header,
                    field,
                    quality,
                });
            }
            None => mapping.unmatched.push(detected.to_string()),
        }
    }

    debug!(
        template = template.name,
        mapped = mapping.columns.len(),
        unmatched = mapping.unmatched.len(),
        "column mapping built"
    );

    mapping
}

// ============================================================================
// TESTS
// ============================================================================
