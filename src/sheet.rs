// 📄 Sheet Input - Tabular rows as header → cell mappings
// Reads the first sheet of an upload (CSV or workbook) into ordered rows.

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Range, Reader};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Normalized form used for tolerant header comparison:
/// surrounding whitespace trimmed, lowercased.
pub fn header_key(header: &str) -> String {
    header.trim().to_lowercase()
}

// ============================================================================
// ROW
// ============================================================================

/// One data row: header → raw cell text, in sheet column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    cells: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Row { cells: Vec::new() }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Row {
            cells: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Build a row from a JSON object as posted by a browser-side sheet parser.
    /// Numbers and booleans are rendered as text; nulls become empty cells.
    pub fn from_json_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        use serde_json::Value;

        let cells = object
            .iter()
            .map(|(header, value)| {
                let text = match value {
                    Value::Null => String::new(),
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => other.to_string(),
                };
                (header.clone(), text)
            })
            .collect();

        Row { cells }
    }

    /// Set a cell, replacing an existing cell with the same header
    pub fn set(&mut self, header: impl Into<String>, value: impl Into<String>) {
        let header = header.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(h, _)| *h == header) {
            Some(cell) => cell.1 = value,
            None => self.cells.push((header, value)),
        }
    }

    /// Remove a cell by exact header
    pub fn remove(&mut self, header: &str) -> Option<String> {
        let pos = self.cells.iter().position(|(h, _)| h == header)?;
        Some(self.cells.remove(pos).1)
    }

    /// Exact header lookup
    pub fn get(&self, header: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> Vec<&str> {
        self.cells.iter().map(|(h, _)| h.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells.iter().map(|(h, v)| (h.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// True when every cell is blank
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, v)| v.trim().is_empty())
    }
}

// ============================================================================
// CSV READERS
// ============================================================================

/// Read rows from CSV text with a header line.
///
/// Rows whose cells are all blank are kept, so row positions line up with the
/// sheet; the pipeline skips them. Empty lines with no delimiters are not rows.
/// Ragged lines are tolerated: missing trailing cells read as empty.
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Row>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header line")?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();

    for (line_num, result) in reader.records().enumerate() {
        let record = result.with_context(|| {
            format!("Failed to parse CSV line {}", line_num + 2)
        })?;

        rows.push(Row::from_pairs(
            headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.clone(), record.get(i).unwrap_or("").to_string())),
        ));
    }

    Ok(rows)
}

pub fn read_csv_file(file_path: &Path) -> Result<Vec<Row>> {
    let file = File::open(file_path)
        .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

    read_csv(file).with_context(|| format!("Failed to read sheet from {}", file_path.display()))
}

// ============================================================================
// WORKBOOK READERS
// ============================================================================

/// Read the first worksheet of an xlsx/xls/ods workbook.
///
/// The first row of the used range is the header row. Numbers that are whole
/// print without a decimal point and date cells print as `YYYY-MM-DD`.
pub fn read_xlsx_file(file_path: &Path) -> Result<Vec<Row>> {
    let mut workbook = open_workbook_auto(file_path)
        .with_context(|| format!("Failed to open workbook: {}", file_path.display()))?;

    let range = workbook
        .worksheet_range_at(0)
        .with_context(|| format!("Workbook has no sheets: {}", file_path.display()))?
        .with_context(|| format!("Failed to read first sheet of {}", file_path.display()))?;

    Ok(rows_from_range(&range))
}

fn rows_from_range(range: &Range<Data>) -> Vec<Row> {
    let mut lines = range.rows();
    let Some(header_cells) = lines.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = header_cells.iter().map(|c| cell_text(c).trim().to_string()).collect();

    lines
        .map(|cells| {
            Row::from_pairs(
                headers
                    .iter()
                    .enumerate()
                    .filter(|(_, h)| !h.is_empty())
                    .map(|(i, h)| (h.clone(), cells.get(i).map(cell_text).unwrap_or_default())),
            )
        })
        .collect()
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| dt.as_f64().to_string()),
        other => other.to_string(),
    }
}

/// Read an uploaded sheet, choosing the reader by file extension.
/// Anything that is not a workbook extension is read as CSV.
pub fn read_sheet_file(file_path: &Path) -> Result<Vec<Row>> {
    let extension = file_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("xlsx" | "xlsm" | "xls" | "xlsb" | "ods") => read_xlsx_file(file_path),
        _ => read_csv_file(file_path),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_header_key_folds_case_and_space() {
        assert_eq!(header_key("  Client ID "), "client id");
        assert_eq!(header_key("OUTSTANDING"), "outstanding");
    }

    #[test]
    fn test_read_csv_keeps_column_order() {
        let data = "SI No,Card,Client ID,Name,Outstanding\n001,1234,CL1,Test User,50000\n";
        let rows = read_csv(data.as_bytes()).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].headers(),
            vec!["SI No", "Card", "Client ID", "Name", "Outstanding"]
        );
        assert_eq!(rows[0].get("Name"), Some("Test User"));
    }

    #[test]
    fn test_read_csv_keeps_blank_rows_and_pads_ragged_rows() {
        let data = "A,B,C\n1,2,3\n,,\n4,5\n";
        let rows = read_csv(data.as_bytes()).unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows[1].is_blank());
        assert_eq!(rows[2].get("A"), Some("4"));
        assert_eq!(rows[2].get("C"), Some(""));
    }

    #[test]
    fn test_read_csv_strips_bom() {
        let data = "\u{feff}SI No,Name\n1,X\n";
        let rows = read_csv(data.as_bytes()).unwrap();
        assert_eq!(rows[0].headers(), vec!["SI No", "Name"]);
    }

    #[test]
    fn test_read_csv_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Seq,Card No").unwrap();
        writeln!(file, "1,3700").unwrap();

        let rows = read_csv_file(file.path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Card No"), Some("3700"));
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = read_csv_file(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(err.to_string().contains("Failed to open file"));
    }

    #[test]
    fn test_row_from_json_object() {
        let value = serde_json::json!({
            "Outstanding": 50000,
            "Name": "Test User",
            "Agent Name": null
        });
        let row = Row::from_json_object(value.as_object().unwrap());

        assert_eq!(row.get("Outstanding"), Some("50000"));
        assert_eq!(row.get("Name"), Some("Test User"));
        assert_eq!(row.get("Agent Name"), Some(""));
    }

    #[test]
    fn test_row_set_and_remove() {
        let mut row = Row::from_pairs([("A", "1")]);
        row.set("A", "2");
        row.set("B", "3");

        assert_eq!(row.get("A"), Some("2"));
        assert_eq!(row.len(), 2);
        assert_eq!(row.remove("A"), Some("2".to_string()));
        assert_eq!(row.headers(), vec!["B"]);
    }

    #[test]
    fn test_read_xlsx_first_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.xlsx");

        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "SI No").unwrap();
        sheet.write_string(0, 1, "Outstanding").unwrap();
        sheet.write_string(0, 2, "Name").unwrap();
        sheet.write_number(1, 0, 1.0).unwrap();
        sheet.write_number(1, 1, 1250.5).unwrap();
        sheet.write_string(1, 2, "Rahim").unwrap();
        sheet.write_string(3, 2, "Karim").unwrap();
        workbook.add_worksheet().write_string(0, 0, "ignored").unwrap();
        workbook.save(&path).unwrap();

        let rows = read_sheet_file(&path).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].headers(), vec!["SI No", "Outstanding", "Name"]);
        assert_eq!(rows[0].get("SI No"), Some("1"));
        assert_eq!(rows[0].get("Outstanding"), Some("1250.5"));
        assert!(rows[1].is_blank());
        assert_eq!(rows[2].get("Name"), Some("Karim"));
    }

    #[test]
    fn test_read_sheet_file_falls_back_to_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Seq,Name").unwrap();
        writeln!(file, "1,X").unwrap();

        let rows = read_sheet_file(file.path()).unwrap();
        assert_eq!(rows[0].get("Name"), Some("X"));
    }

    #[test]
    fn test_missing_workbook_has_context() {
        let err = read_sheet_file(Path::new("/definitely/not/here.xlsx")).unwrap_err();
        assert!(err.to_string().contains("Failed to open workbook"));
    }
}
