// 📥 Ingestion Pipeline - resolve → validate → map → normalize → staged batch
//
// Nothing here touches the shared store. A run either yields a complete
// StagedBatch or an error and no records.

use crate::config::IngestConfig;
use crate::error::{CaseFileError, FieldCoercionWarning};
use crate::mapper::{map_columns, ColumnMapping};
use crate::normalizer::{IngestContext, RecordNormalizer};
use crate::record::CaseFileRecord;
use crate::sheet::Row;
use crate::templates::TemplateRegistry;
use crate::validator::StructuralValidator;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ============================================================================
// CANCELLATION
// ============================================================================

/// Shared abort switch, checked between rows
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// STAGED BATCH
// ============================================================================

/// Normalized output of one upload, held outside the store until committed
#[derive(Debug, Clone, Serialize)]
pub struct StagedBatch {
    pub id: Uuid,
    pub template: String,
    pub bank: String,
    pub product: String,
    pub records: Vec<CaseFileRecord>,
    pub warnings: Vec<FieldCoercionWarning>,
    /// Uploaded headers the template does not know; their values were dropped
    pub unmatched_columns: Vec<String>,
    pub ingested_at: DateTime<Utc>,
}

/// What an operator sees before confirming an import
#[derive(Debug, Clone, Serialize)]
pub struct BatchPreview {
    pub batch_id: Uuid,
    pub template: String,
    pub rows: usize,
    pub assigned: usize,
    pub unassigned: usize,
    pub total_outstanding: f64,
    pub warning_count: usize,
    pub warnings: Vec<String>,
    pub unmatched_columns: Vec<String>,
    pub sample: Vec<CaseFileRecord>,
}

impl StagedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Summarise the batch; `sample_size` caps the records echoed back
    pub fn preview(&self, sample_size: usize) -> BatchPreview {
        let assigned = self.records.iter().filter(|r| r.is_assigned()).count();

        BatchPreview {
            batch_id: self.id,
            template: self.template.clone(),
            rows: self.records.len(),
            assigned,
            unassigned: self.records.len() - assigned,
            total_outstanding: self.records.iter().map(|r| r.outstanding).sum(),
            warning_count: self.warnings.len(),
            warnings: self.warnings.iter().map(|w| w.to_string()).collect(),
            unmatched_columns: self.unmatched_columns.clone(),
            sample: self.records.iter().take(sample_size).cloned().collect(),
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct IngestPipeline {
    templates: TemplateRegistry,
    validator: StructuralValidator,
    normalizer: RecordNormalizer,
}

impl IngestPipeline {
    pub fn new(config: IngestConfig) -> Self {
        IngestPipeline {
            templates: TemplateRegistry::new(),
            validator: StructuralValidator::new(),
            normalizer: RecordNormalizer::new(config),
        }
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Run the whole pipeline, stamping records with the current time
    pub fn run(
        &self,
        rows: &[Row],
        bank_id: &str,
        product_id: &str,
        cancel: &CancelFlag,
    ) -> Result<StagedBatch, CaseFileError> {
        self.run_at(rows, bank_id, product_id, cancel, Utc::now())
    }

    /// Run the pipeline with an explicit ingestion time.
    ///
    /// Blank rows are skipped but still count toward row indices, so warnings
    /// point at the row's position in the uploaded sheet. Zero remaining rows
    /// is `EmptyInput`; missing required columns is `Structural` with every
    /// missing column listed.
    pub fn run_at(
        &self,
        rows: &[Row],
        bank_id: &str,
        product_id: &str,
        cancel: &CancelFlag,
        ingested_at: DateTime<Utc>,
    ) -> Result<StagedBatch, CaseFileError> {
        let template = self.templates.resolve(bank_id, product_id)?;

        let rows: Vec<(usize, &Row)> = rows.iter().enumerate().filter(|(_, r)| !r.is_blank()).collect();
        let first = rows.first().map(|(_, r)| (*r).clone()).ok_or(CaseFileError::EmptyInput)?;
        let batch_id = Uuid::new_v4();

        let report = self.validator.validate(std::slice::from_ref(&first), template)?;
        if !report.valid {
            warn!(
                template = template.name,
                missing = ?report.missing_columns,
                "upload rejected: missing required columns"
            );
        }
        report.into_result()?;

        let headers = collect_headers(&rows);
        let mapping = map_columns(headers.as_slice(), template);
        if !mapping.unmatched.is_empty() {
            warn!(
                template = template.name,
                dropped = ?mapping.unmatched,
                "uploaded columns with no template counterpart"
            );
        }

        let (records, warnings) = self.normalize_all(
            &rows,
            &mapping,
            template.bank_id,
            template.product_id,
            cancel,
            IngestContext::new(ingested_at, 0).with_batch(batch_id),
        )?;

        info!(
            template = template.name,
            rows = records.len(),
            warnings = warnings.len(),
            "batch staged"
        );

        Ok(StagedBatch {
            id: batch_id,
            template: template.name.to_string(),
            bank: template.bank_id.to_string(),
            product: template.product_id.to_string(),
            records,
            warnings,
            unmatched_columns: mapping.unmatched,
            ingested_at,
        })
    }

    fn normalize_all(
        &self,
        rows: &[(usize, &Row)],
        mapping: &ColumnMapping,
        bank_id: &str,
        product_id: &str,
        cancel: &CancelFlag,
        base: IngestContext,
    ) -> Result<(Vec<CaseFileRecord>, Vec<FieldCoercionWarning>), CaseFileError> {
        let mut records = Vec::with_capacity(rows.len());
        let mut warnings = Vec::new();

        for &(row_index, row) in rows {
            if cancel.is_cancelled() {
                info!(processed = records.len(), total = rows.len(), "ingestion cancelled");
                return Err(CaseFileError::Cancelled);
            }

            let ctx = IngestContext { row_index, ..base };
            let normalized = self.normalizer.normalize(row, mapping, bank_id, product_id, &ctx);
            records.push(normalized.record);
            warnings.extend(normalized.warnings);
        }

        debug!(rows = records.len(), "rows normalized");
        Ok((records, warnings))
    }
}

impl Default for IngestPipeline {
    fn default() -> Self {
        Self::new(IngestConfig::default())
    }
}

/// Every header seen across the rows, first-seen order
fn collect_headers(rows: &[(usize, &Row)]) -> Vec<String> {
    let mut headers: Vec<String> = Vec::new();
    for (_, row) in rows {
        for header in row.headers() {
            if !headers.iter().any(|h| h == header) {
                headers.push(header.to_string());
            }
        }
    }
    headers
}

// ============================================================================
// BACKGROUND INGESTION
// ============================================================================

/// Handle to an ingestion running on a worker thread
pub struct IngestHandle {
    cancel: CancelFlag,
    receiver: mpsc::Receiver<Result<StagedBatch, CaseFileError>>,
}

impl IngestHandle {
    /// Ask the worker to stop at the next row boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the worker finishes
    pub fn wait(self) -> Result<StagedBatch, CaseFileError> {
        match self.receiver.recv() {
            Ok(result) => result,
            Err(_) => {
                error!("ingestion worker exited without a result");
                Err(CaseFileError::Cancelled)
            }
        }
    }

    /// Result if the worker is done, without blocking
    pub fn try_wait(&self) -> Option<Result<StagedBatch, CaseFileError>> {
        self.receiver.try_recv().ok()
    }
}

/// Run the pipeline on a worker thread and deliver the batch over a channel
pub fn spawn_ingest(
    pipeline: Arc<IngestPipeline>,
    rows: Vec<Row>,
    bank_id: String,
    product_id: String,
) -> IngestHandle {
    let cancel = CancelFlag::new();
    let (sender, receiver) = mpsc::channel();
    let worker_cancel = cancel.clone();

    thread::spawn(move || {
        let result = pipeline.run(&rows, &bank_id, &product_id, &worker_cancel);
        // Receiver may already be gone; nothing left to deliver to then
        let _ = sender.send(result);
    });

    IngestHandle { cancel, receiver }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AssignmentStatus;
    use chrono::TimeZone;

    fn dbbl_rows() -> Vec<Row> {
        vec![
            Row::from_pairs([
                ("SI No", "1"),
                ("Card", "4321-XXXX"),
                ("Client ID", "C-1"),
                ("Name", "Rahim"),
                ("Outstanding", "1,200.50"),
                ("Agent Name", "Jane"),
            ]),
            Row::from_pairs([
                ("SI No", "2"),
                ("Card", "4321-YYYY"),
                ("Client ID", "C-2"),
                ("Name", "Karim"),
                ("Outstanding", "abc"),
                ("Agent Name", ""),
            ]),
        ]
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_end_to_end_batch() {
        let pipeline = IngestPipeline::default();
        let batch = pipeline
            .run_at(&dbbl_rows(), "DBBL", "CreditCard", &CancelFlag::new(), fixed_time())
            .unwrap();

        assert_eq!(batch.template, "DBBL-CreditCard");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records[0].outstanding, 1200.5);
        assert_eq!(batch.records[0].status, AssignmentStatus::Assigned);
        assert_eq!(batch.records[1].outstanding, 0.0);
        assert_eq!(batch.records[1].status, AssignmentStatus::Unassigned);
        assert_eq!(batch.warnings.len(), 1);
        assert_eq!(batch.warnings[0].row_index, 1);
        assert!(batch.records.iter().all(|r| r.is_consistent()));
    }

    #[test]
    fn test_ids_unique_within_batch() {
        let pipeline = IngestPipeline::default();
        let batch = pipeline
            .run_at(&dbbl_rows(), "DBBL", "CreditCard", &CancelFlag::new(), fixed_time())
            .unwrap();

        assert_ne!(batch.records[0].id, batch.records[1].id);
    }

    #[test]
    fn test_back_to_back_runs_get_distinct_ids() {
        let pipeline = IngestPipeline::default();
        let first = pipeline.run_at(&dbbl_rows(), "DBBL", "CreditCard", &CancelFlag::new(), fixed_time()).unwrap();
        let second = pipeline.run_at(&dbbl_rows(), "DBBL", "CreditCard", &CancelFlag::new(), fixed_time()).unwrap();

        assert_ne!(first.id, second.id);
        for record in &first.records {
            assert!(second.records.iter().all(|r| r.id != record.id));
        }
    }

    #[test]
    fn test_blank_rows_keep_sheet_row_indices() {
        let pipeline = IngestPipeline::default();
        let mut rows = dbbl_rows();
        rows[1].set("Outstanding", "bad");
        rows.insert(1, Row::from_pairs([("SI No", ""), ("Card", " "), ("Name", "")]));

        let batch = pipeline.run_at(&rows, "DBBL", "CreditCard", &CancelFlag::new(), fixed_time()).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.warnings.len(), 1);
        assert_eq!(batch.warnings[0].row_index, 2);
        assert!(batch.records[1].id.ends_with("-2"));
        assert!(batch.preview(0).warnings[0].contains("row 3"));
    }

    #[test]
    fn test_structural_failure_lists_every_missing_column() {
        let pipeline = IngestPipeline::default();
        let rows = vec![Row::from_pairs([("Name", "Rahim"), ("Outstanding", "10")])];

        let err = pipeline
            .run(&rows, "DBBL", "CreditCard", &CancelFlag::new())
            .unwrap_err();

        assert_eq!(
            err,
            CaseFileError::Structural {
                missing_columns: vec!["SI No".to_string(), "Card".to_string(), "Client ID".to_string()]
            }
        );
        assert_eq!(err.itemized().len(), 3);
    }

    #[test]
    fn test_empty_input() {
        let pipeline = IngestPipeline::default();

        let err = pipeline.run(&[], "DBBL", "CreditCard", &CancelFlag::new()).unwrap_err();
        assert_eq!(err, CaseFileError::EmptyInput);

        let blank = vec![Row::from_pairs([("Name", " "), ("Card", "")])];
        let err = pipeline.run(&blank, "DBBL", "CreditCard", &CancelFlag::new()).unwrap_err();
        assert_eq!(err, CaseFileError::EmptyInput);
    }

    #[test]
    fn test_unknown_template() {
        let pipeline = IngestPipeline::default();
        let err = pipeline
            .run(&dbbl_rows(), "HSBC", "CreditCard", &CancelFlag::new())
            .unwrap_err();

        assert!(matches!(err, CaseFileError::TemplateNotFound { .. }));
    }

    #[test]
    fn test_unmatched_columns_reported() {
        let pipeline = IngestPipeline::default();
        let mut rows = dbbl_rows();
        rows[0].set("Spouse Name", "Amina");

        let batch = pipeline
            .run(&rows, "DBBL", "CreditCard", &CancelFlag::new())
            .unwrap();

        assert_eq!(batch.unmatched_columns, vec!["Spouse Name"]);
        assert!(batch.records[0].attribute("Spouse Name").is_none());
    }

    #[test]
    fn test_cancelled_run_yields_no_batch() {
        let pipeline = IngestPipeline::default();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = pipeline.run(&dbbl_rows(), "DBBL", "CreditCard", &cancel).unwrap_err();
        assert_eq!(err, CaseFileError::Cancelled);
    }

    #[test]
    fn test_preview_summary() {
        let pipeline = IngestPipeline::default();
        let batch = pipeline
            .run_at(&dbbl_rows(), "DBBL", "CreditCard", &CancelFlag::new(), fixed_time())
            .unwrap();

        let preview = batch.preview(1);
        assert_eq!(preview.rows, 2);
        assert_eq!(preview.assigned, 1);
        assert_eq!(preview.unassigned, 1);
        assert_eq!(preview.total_outstanding, 1200.5);
        assert_eq!(preview.warning_count, 1);
        assert!(preview.warnings[0].contains("row 2"));
        assert_eq!(preview.sample.len(), 1);
    }

    #[test]
    fn test_spawn_ingest_delivers_batch() {
        let pipeline = Arc::new(IngestPipeline::default());
        let handle = spawn_ingest(pipeline, dbbl_rows(), "DBBL".to_string(), "CreditCard".to_string());

        let batch = handle.wait().unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_spawn_ingest_reports_errors() {
        let pipeline = Arc::new(IngestPipeline::default());
        let handle = spawn_ingest(pipeline, Vec::new(), "DBBL".to_string(), "CreditCard".to_string());

        assert_eq!(handle.wait().unwrap_err(), CaseFileError::EmptyInput);
    }

    #[test]
    fn test_every_template_sample_ingests() {
        let pipeline = IngestPipeline::default();

        for template in pipeline.templates().all() {
            let row = Row::from_pairs(template.sample_row.iter().copied());
            let batch = pipeline
                .run(&[row], template.bank_id, template.product_id, &CancelFlag::new())
                .unwrap();

            assert_eq!(batch.len(), 1, "{}", template.name);
            assert!(batch.warnings.is_empty(), "{}", template.name);
            assert!(batch.unmatched_columns.is_empty(), "{}", template.name);
            assert!(batch.records[0].outstanding > 0.0, "{}", template.name);
            assert_eq!(batch.records[0].bank, template.bank_id, "{}", template.name);
            assert_ne!(batch.records[0].bank, template.bank_name, "{}", template.name);
        }
    }
}
