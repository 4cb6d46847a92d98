// 📤 Template Export - sample sheets that teach operators the input shape

use crate::sheet::Row;
use crate::templates::{Template, TemplateRegistry};
use anyhow::{Context, Result};
use csv::WriterBuilder;
use rust_xlsxwriter::Workbook as XlsxWorkbook;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// One named sheet: headers plus data rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SampleSheet {
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }

        let bytes = writer
            .into_inner()
            .with_context(|| format!("Failed to finish sheet {}", self.name))?;
        String::from_utf8(bytes).with_context(|| format!("Sheet {} is not valid UTF-8", self.name))
    }

    /// Data rows keyed by header, as the pipeline consumes them
    pub fn to_rows(&self) -> Vec<Row> {
        self.rows
            .iter()
            .map(|cells| Row::from_pairs(self.headers.iter().cloned().zip(cells.iter().cloned())))
            .collect()
    }

    /// File name for this sheet when written to disk
    pub fn file_name(&self) -> String {
        format!("{}.csv", self.name)
    }
}

/// A set of sheets: one `.xlsx` with a worksheet each, or side-by-side CSVs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Workbook {
    pub sheets: Vec<SampleSheet>,
}

impl Workbook {
    pub fn sheet(&self, name: &str) -> Option<&SampleSheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Encode as a single xlsx workbook, one worksheet per sheet in order
    pub fn to_xlsx(&self) -> Result<Vec<u8>> {
        let mut workbook = XlsxWorkbook::new();

        for sheet in &self.sheets {
            let worksheet = workbook.add_worksheet();
            worksheet
                .set_name(&sheet.name)
                .with_context(|| format!("Invalid worksheet name: {}", sheet.name))?;

            for (col, header) in sheet.headers.iter().enumerate() {
                worksheet.write_string(0, col as u16, header)?;
            }
            for (row, cells) in sheet.rows.iter().enumerate() {
                for (col, cell) in cells.iter().enumerate().filter(|(_, c)| !c.is_empty()) {
                    worksheet.write_string(row as u32 + 1, col as u16, cell)?;
                }
            }
        }

        workbook.save_to_buffer().context("Failed to encode workbook")
    }

    /// Write the workbook as one `.xlsx` file
    pub fn write_xlsx(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create export directory: {}", parent.display()))?;
        }

        fs::write(path, self.to_xlsx()?).with_context(|| format!("Failed to write {}", path.display()))?;

        info!(path = %path.display(), sheets = self.sheets.len(), "workbook exported");
        Ok(())
    }

    /// Write every sheet as `<name>.csv` under `dir`
    pub fn write_to_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create export directory: {}", dir.display()))?;

        let mut written = Vec::with_capacity(self.sheets.len());
        for sheet in &self.sheets {
            let path = dir.join(sheet.file_name());
            fs::write(&path, sheet.to_csv()?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            written.push(path);
        }

        info!(dir = %dir.display(), sheets = written.len(), "workbook exported");
        Ok(written)
    }
}

/// One-row sheet holding the template's sample under its documented headers
pub fn export_sample(template: &Template) -> SampleSheet {
    let headers = template.headers();
    let row = headers
        .iter()
        .map(|h| template.sample_value(h).unwrap_or_default().to_string())
        .collect();

    SampleSheet {
        name: template.name.to_string(),
        headers: headers.into_iter().map(String::from).collect(),
        rows: vec![row],
    }
}

/// One sample sheet per known template
pub fn export_all(registry: &TemplateRegistry) -> Workbook {
    Workbook {
        sheets: registry.all().iter().map(export_sample).collect(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
