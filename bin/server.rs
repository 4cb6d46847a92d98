// Case File Desk - Web Server
// REST surface over the ingestion pipeline and the shared case file store

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use casefile_desk::{
    export_all, export_sample, insert_event, load_agents, load_records, open_database, save_records,
    Agent, AppConfig, AssignmentOutcome, BatchPreview, CancelFlag, CaseFileError, CaseFileRecord,
    CaseFileStore, Event, EventKind, IngestPipeline, Row, TemplateRegistry,
};

const ACTOR: &str = "api";
const PREVIEW_SAMPLE: usize = 20;
const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: CaseFileStore,
    pipeline: Arc<IngestPipeline>,
    db: Arc<Mutex<Connection>>,
}

impl AppState {
    fn db(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
                details: Vec::new(),
            }),
        )
            .into_response()
    }
}

/// Domain errors carry their tagged form plus one line per problem
fn case_file_error(err: CaseFileError) -> Response {
    let status = match err {
        CaseFileError::TemplateNotFound { .. }
        | CaseFileError::AgentNotFound { .. }
        | CaseFileError::BatchNotFound { .. } => StatusCode::NOT_FOUND,
        CaseFileError::IdCollision { .. } => StatusCode::CONFLICT,
        CaseFileError::EmptyInput | CaseFileError::Structural { .. } | CaseFileError::Cancelled => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    };

    let body: ApiResponse<()> = ApiResponse {
        success: false,
        data: None,
        error: serde_json::to_value(&err).ok(),
        details: err.itemized(),
    };
    (status, Json(body)).into_response()
}

fn internal_error(context: &str, err: anyhow::Error) -> Response {
    error!(error = %format!("{:#}", err), "{}", context);
    let body: ApiResponse<()> = ApiResponse {
        success: false,
        data: None,
        error: Some(serde_json::Value::String(context.to_string())),
        details: Vec::new(),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// Failure of a store change that is written to the database before it is applied
enum WriteError {
    Domain(CaseFileError),
    Persist(anyhow::Error),
}

impl From<CaseFileError> for WriteError {
    fn from(err: CaseFileError) -> Self {
        WriteError::Domain(err)
    }
}

impl WriteError {
    fn into_response(self, context: &str) -> Response {
        match self {
            WriteError::Domain(err) => case_file_error(err),
            WriteError::Persist(err) => internal_error(context, err),
        }
    }
}

// ============================================================================
// Request / Response bodies
// ============================================================================

#[derive(Serialize)]
struct TemplateSummary {
    name: &'static str,
    bank_id: &'static str,
    product_id: &'static str,
    bank_name: &'static str,
    required_columns: &'static [&'static str],
    headers: Vec<&'static str>,
}

#[derive(Deserialize)]
struct IngestRequest {
    bank: String,
    product: String,
    /// Rows as parsed by the browser, one object per sheet row
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Deserialize)]
struct AssignRequest {
    agent_id: String,
    record_ids: Vec<String>,
}

#[derive(Deserialize)]
struct UnassignRequest {
    record_ids: Vec<String>,
}

#[derive(Serialize)]
struct AssignmentResponse {
    updated: Vec<String>,
    missing: Vec<String>,
    ineligible: Vec<String>,
}

impl From<AssignmentOutcome> for AssignmentResponse {
    fn from(outcome: AssignmentOutcome) -> Self {
        Self {
            updated: outcome.updated,
            missing: outcome.missing,
            ineligible: outcome.ineligible,
        }
    }
}

#[derive(Serialize)]
struct CommitResponse {
    batch_id: Uuid,
    committed: usize,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// GET /api/templates - Every upload template
async fn list_templates() -> impl IntoResponse {
    let summaries: Vec<TemplateSummary> = TemplateRegistry::new()
        .all()
        .iter()
        .map(|t| TemplateSummary {
            name: t.name,
            bank_id: t.bank_id,
            product_id: t.product_id,
            bank_name: t.bank_name,
            required_columns: t.required_columns,
            headers: t.headers(),
        })
        .collect();

    ApiResponse::ok(summaries)
}

/// GET /api/templates/:bank/:product/sample - One-row sample sheet as CSV
async fn template_sample(Path((bank, product)): Path<(String, String)>) -> Response {
    let registry = TemplateRegistry::new();
    let template = match registry.resolve(&bank, &product) {
        Ok(template) => template,
        Err(err) => return case_file_error(err),
    };

    match export_sample(template).to_csv() {
        Ok(csv) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}.csv\"", template.name),
                ),
            ],
            csv,
        )
            .into_response(),
        Err(err) => internal_error("Failed to render sample sheet", err),
    }
}

/// GET /api/templates/workbook - Every template's sample, one worksheet each
async fn template_workbook() -> Response {
    match export_all(&TemplateRegistry::new()).to_xlsx() {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"case-file-templates.xlsx\"".to_string(),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(err) => internal_error("Failed to render template workbook", err),
    }
}

/// POST /api/ingest - Normalize uploaded rows into a staged batch and preview it
async fn ingest(State(state): State<AppState>, Json(request): Json<IngestRequest>) -> Response {
    let rows: Vec<Row> = request.rows.iter().map(Row::from_json_object).collect();
    let pipeline = state.pipeline.clone();

    let result = tokio::task::spawn_blocking(move || {
        pipeline.run(&rows, &request.bank, &request.product, &CancelFlag::new())
    })
    .await;

    match result {
        Ok(Ok(batch)) => {
            let preview: BatchPreview = batch.preview(PREVIEW_SAMPLE);
            state.store.stage(batch);
            ApiResponse::ok(preview)
        }
        Ok(Err(err)) => case_file_error(err),
        Err(join_err) => internal_error("Ingestion worker failed", join_err.into()),
    }
}

/// GET /api/batches/:id - Preview a staged batch again
async fn batch_preview(State(state): State<AppState>, Path(batch_id): Path<Uuid>) -> Response {
    match state.store.preview(batch_id, PREVIEW_SAMPLE) {
        Ok(preview) => ApiResponse::ok(preview),
        Err(err) => case_file_error(err),
    }
}

/// POST /api/batches/:id/commit - Publish a staged batch into the store
///
/// The batch is written to the database first; if that fails it stays
/// staged and the commit can be retried.
async fn commit_batch(State(state): State<AppState>, Path(batch_id): Path<Uuid>) -> Response {
    let committed = state.store.commit_with(batch_id, |records| {
        let conn = state.db();
        save_records(&conn, records)
            .and_then(|_| {
                insert_event(
                    &conn,
                    &Event::new(
                        EventKind::CaseFilesImported,
                        batch_id.to_string(),
                        serde_json::json!({ "rows": records.len() }),
                        ACTOR,
                    ),
                )
            })
            .map_err(WriteError::Persist)
    });

    match committed {
        Ok(records) => ApiResponse::ok(CommitResponse {
            batch_id,
            committed: records.len(),
        }),
        Err(err) => err.into_response("Failed to persist committed batch"),
    }
}

/// DELETE /api/batches/:id - Drop a staged batch
async fn discard_batch(State(state): State<AppState>, Path(batch_id): Path<Uuid>) -> Response {
    match state.store.discard(batch_id) {
        Ok(()) => ApiResponse::ok(batch_id),
        Err(err) => case_file_error(err),
    }
}

/// GET /api/records - Every stored case file
async fn list_records(State(state): State<AppState>) -> impl IntoResponse {
    ApiResponse::ok(state.store.records())
}

/// GET /api/records/:id/agents - Agents that may receive this case file
async fn offerable_agents(State(state): State<AppState>, Path(record_id): Path<String>) -> Response {
    match state.store.offerable_agents(&record_id) {
        Some(agents) => ApiResponse::ok(agents),
        None => {
            let body: ApiResponse<()> = ApiResponse {
                success: false,
                data: None,
                error: Some(serde_json::Value::String(format!("Unknown case file: {}", record_id))),
                details: Vec::new(),
            };
            (StatusCode::NOT_FOUND, Json(body)).into_response()
        }
    }
}

/// GET /api/agents - Agent directory
async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    ApiResponse::ok(state.store.agents())
}

/// POST /api/assign - Bulk assign case files to one agent
async fn assign(State(state): State<AppState>, Json(request): Json<AssignRequest>) -> Response {
    let agent_name = state
        .store
        .agents()
        .into_iter()
        .find(|a: &Agent| a.id == request.agent_id)
        .map(|a| a.name)
        .unwrap_or_default();
    let data = serde_json::json!({ "agent_id": request.agent_id, "agent": agent_name });

    let result = state.store.assign_with(request.record_ids.as_slice(), &request.agent_id, |outcome| {
        persist_outcome(&state, outcome, EventKind::CaseFileAssigned, data).map_err(WriteError::Persist)
    });

    match result {
        Ok(outcome) => ApiResponse::ok(AssignmentResponse::from(outcome)),
        Err(err) => err.into_response("Failed to persist assignment"),
    }
}

/// POST /api/unassign - Clear the agent on case files
async fn unassign(State(state): State<AppState>, Json(request): Json<UnassignRequest>) -> Response {
    let result = state.store.unassign_with(request.record_ids.as_slice(), |outcome| {
        persist_outcome(&state, outcome, EventKind::CaseFileUnassigned, serde_json::json!({}))
    });

    match result {
        Ok(outcome) => ApiResponse::ok(AssignmentResponse::from(outcome)),
        Err(err) => internal_error("Failed to persist unassignment", err),
    }
}

/// Save the records an assignment touched and log one event each.
/// Runs under the store lock, so the database sees changes in store order.
fn persist_outcome(
    state: &AppState,
    outcome: &AssignmentOutcome,
    kind: EventKind,
    data: serde_json::Value,
) -> Result<()> {
    let touched: HashSet<&str> = outcome.updated.iter().map(String::as_str).collect();
    let changed: Vec<CaseFileRecord> = outcome
        .records
        .iter()
        .filter(|r| touched.contains(r.id.as_str()))
        .cloned()
        .collect();

    let conn = state.db();
    save_records(&conn, &changed)?;
    for id in &outcome.updated {
        insert_event(&conn, &Event::new(kind, id.as_str(), data.clone(), ACTOR))?;
    }
    Ok(())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var("CASEFILE_CONFIG").unwrap_or_else(|_| "casefile.json".to_string());
    let config = AppConfig::load(std::path::Path::new(&config_path))?;

    let conn = open_database(std::path::Path::new(&config.storage.database_path))?;
    let records = load_records(&conn)?;
    let agents = load_agents(&conn)?;
    info!(
        db = %config.storage.database_path,
        records = records.len(),
        agents = agents.count(),
        eligibility = ?config.assignment.eligibility,
        "store loaded"
    );

    // Create shared state
    let state = AppState {
        store: CaseFileStore::with_contents(records, agents, config.assignment.eligibility),
        pipeline: Arc::new(IngestPipeline::new(config.ingest.clone())),
        db: Arc::new(Mutex::new(conn)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/templates", get(list_templates))
        .route("/templates/workbook", get(template_workbook))
        .route("/templates/:bank/:product/sample", get(template_sample))
        .route("/ingest", post(ingest))
        .route("/batches/:id", get(batch_preview).delete(discard_batch))
        .route("/batches/:id/commit", post(commit_batch))
        .route("/records", get(list_records))
        .route("/records/:id/agents", get(offerable_agents))
        .route("/agents", get(list_agents))
        .route("/assign", post(assign))
        .route("/unassign", post(unassign))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.bind_addr))?;

    info!(addr = %config.server.bind_addr, "server listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
