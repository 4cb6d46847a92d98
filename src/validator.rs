// 📐 Structural Validator - Header set vs. a template's required columns

use crate::error::CaseFileError;
use crate::sheet::{header_key, Row};
use crate::templates::Template;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

// ============================================================================
// VALIDATION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// Every required column with no equivalent header, in template order
    pub missing_columns: Vec<String>,
    /// Headers of the first row, as uploaded
    pub detected_headers: Vec<String>,
}

impl ValidationReport {
    /// Turn a failed report into a `Structural` error carrying the full list
    pub fn into_result(self) -> Result<ValidationReport, CaseFileError> {
        if self.valid {
            Ok(self)
        } else {
            Err(CaseFileError::Structural {
                missing_columns: self.missing_columns,
            })
        }
    }
}

// ============================================================================
// STRUCTURAL VALIDATOR
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl StructuralValidator {
    pub fn new() -> Self {
        StructuralValidator
    }

    /// Check the first row's headers against `template.required_columns`.
    ///
    /// Comparison is case-insensitive on trimmed names. All missing columns
    /// are reported together. Zero rows is `EmptyInput`, not a report.
    pub fn validate(&self, rows: &[Row], template: &Template) -> Result<ValidationReport, CaseFileError> {
        let first = rows.first().ok_or(CaseFileError::EmptyInput)?;

        let detected: HashSet<String> = first.headers().into_iter().map(header_key).collect();

        let missing_columns: Vec<String> = template
            .required_columns
            .iter()
            .filter(|required| !detected.contains(&header_key(required)))
            .map(|required| required.to_string())
            .collect();

        debug!(
            template = template.name,
            detected = detected.len(),
            missing = missing_columns.len(),
            "structural validation"
        );

        Ok(ValidationReport {
            valid: missing_columns.is_empty(),
            missing_columns,
            detected_headers: first.headers().into_iter().map(String::from).collect(),
        })
    }
}

/// Convenience wrapper around `StructuralValidator::validate`
pub fn validate(rows: &[Row], template: &Template) -> Result<ValidationReport, CaseFileError> {
    StructuralValidator::new().validate(rows, template)
}

// ============================================================================
// TESTS
// ============================================================================
