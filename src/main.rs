use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use casefile_desk::{
    export_all, export_sample, get_events_for_entity, insert_event, load_agents, load_records,
    open_database, read_sheet_file, save_records, spawn_ingest, upsert_agent, verify_count, Agent,
    AppConfig, AssignmentOutcome, CaseFileError, CaseFileRecord, CaseFileStore, EntityKind, Event,
    EventKind, IngestPipeline, StructuralValidator, TemplateRegistry,
};

const ACTOR: &str = "cli";

#[derive(Parser, Debug)]
#[command(name = "casefile-desk", version, about = "Case file ingestion and agent assignment")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, default_value = "casefile.json")]
    config: PathBuf,

    /// Database path (overrides config and CASEFILE_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Lists every upload template and its required columns.
    Templates,
    /// Checks a sheet's headers (CSV, or the first worksheet of an xlsx) against a template.
    Validate {
        bank: String,
        product: String,
        file: PathBuf,
    },
    /// Normalizes a CSV or xlsx sheet and shows the preview; --commit stores it.
    Import {
        bank: String,
        product: String,
        file: PathBuf,
        #[arg(long)]
        commit: bool,
        /// Records echoed in the preview
        #[arg(long, default_value_t = 5)]
        sample: usize,
    },
    /// Lists stored case files.
    Records {
        #[arg(long)]
        bank: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        unassigned: bool,
    },
    /// Assigns case files to an agent.
    Assign {
        agent_id: String,
        #[arg(required = true)]
        record_ids: Vec<String>,
    },
    /// Clears the agent on case files.
    Unassign {
        #[arg(required = true)]
        record_ids: Vec<String>,
    },
    /// Manages the agent directory.
    Agents {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Writes the one-row sample sheet for a template.
    ExportTemplate {
        bank: String,
        product: String,
        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Writes one workbook with a sample worksheet per template.
    ExportAll {
        /// Output .xlsx file, or a directory with --csv
        out: PathBuf,
        /// Write one CSV per template into the directory instead
        #[arg(long)]
        csv: bool,
    },
    /// Shows the audit trail of a case file (or an agent / import batch).
    History {
        id: String,
        #[arg(long, conflicts_with = "batch")]
        agent: bool,
        #[arg(long)]
        batch: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AgentCommands {
    /// Adds or replaces an agent.
    Add {
        id: String,
        name: String,
        /// Bank ids the agent may receive (repeatable)
        #[arg(long = "bank")]
        banks: Vec<String>,
    },
    /// Lists agents.
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)?;
    if let Some(db) = &cli.db {
        config.storage.database_path = db.display().to_string();
    }

    match cli.command {
        Commands::Templates => list_templates(),
        Commands::Validate { bank, product, file } => run_validate(&bank, &product, &file),
        Commands::Import {
            bank,
            product,
            file,
            commit,
            sample,
        } => run_import(&config, &bank, &product, &file, commit, sample),
        Commands::Records {
            bank,
            agent,
            unassigned,
        } => list_records(&config, bank.as_deref(), agent.as_deref(), unassigned),
        Commands::Assign {
            agent_id,
            record_ids,
        } => run_assign(&config, &agent_id, &record_ids),
        Commands::Unassign { record_ids } => run_unassign(&config, &record_ids),
        Commands::Agents { command } => run_agents(&config, command),
        Commands::ExportTemplate { bank, product, out } => {
            run_export_template(&bank, &product, out.as_deref())
        }
        Commands::ExportAll { out, csv } => run_export_all(&out, csv),
        Commands::History { id, agent, batch } => {
            let entity = match (agent, batch) {
                (true, _) => EntityKind::Agent,
                (_, true) => EntityKind::Batch,
                _ => EntityKind::CaseFile,
            };
            show_history(&config, entity, &id)
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn open(config: &AppConfig) -> Result<Connection> {
    open_database(Path::new(&config.storage.database_path))
}

/// Store seeded from the database
fn load_store(conn: &Connection, config: &AppConfig) -> Result<CaseFileStore> {
    let records = load_records(conn)?;
    let agents = load_agents(conn)?;
    info!(records = records.len(), agents = agents.count(), "store loaded");
    Ok(CaseFileStore::with_contents(
        records,
        agents,
        config.assignment.eligibility,
    ))
}

/// Persist the records an assignment touched and log one event each
fn persist_outcome(
    conn: &Connection,
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

    save_records(conn, &changed)?;
    for id in &outcome.updated {
        insert_event(conn, &Event::new(kind, id.as_str(), data.clone(), ACTOR))?;
    }
    Ok(())
}

fn print_outcome(verb: &str, outcome: &AssignmentOutcome) {
    println!("✓ {} {} case file(s)", verb, outcome.updated.len());
    if !outcome.missing.is_empty() {
        println!("⚠️  Ignored unknown ids: {}", outcome.missing.join(", "));
    }
    if !outcome.ineligible.is_empty() {
        println!(
            "⚠️  Skipped (agent not eligible for bank): {}",
            outcome.ineligible.join(", ")
        );
    }
}

fn print_record(record: &CaseFileRecord) {
    println!(
        "  {:<28} {:<14} {:<10} {:<10} {:<24} {:>14.2}  {}",
        record.id,
        record.file_no,
        record.bank,
        record.product_type,
        record.client_name,
        record.outstanding,
        record.assigned_agent.as_deref().unwrap_or("-"),
    );
}

/// Print itemized problems for errors an operator can fix
fn report_case_file_error(err: &CaseFileError) {
    eprintln!("❌ {}", err);
    if let CaseFileError::Structural { .. } = err {
        for line in err.itemized() {
            eprintln!("   - {}", line);
        }
    }
}

/// Report domain errors inside an anyhow chain, then pass the error on
fn reported(err: anyhow::Error) -> anyhow::Error {
    if let Some(case_err) = err.downcast_ref::<CaseFileError>() {
        report_case_file_error(case_err);
    }
    err
}

// ============================================================================
// COMMANDS
// ============================================================================

fn list_templates() -> Result<()> {
    let registry = TemplateRegistry::new();

    println!("📋 {} templates", registry.count());
    for template in registry.all() {
        println!("\n  {} ({})", template.name, template.bank_name);
        println!("    required: {}", template.required_columns.join(", "));
        println!("    columns:  {}", template.headers().len());
    }
    Ok(())
}

fn run_validate(bank: &str, product: &str, file: &Path) -> Result<()> {
    let registry = TemplateRegistry::new();
    let template = registry.resolve(bank, product)?;
    let rows = read_sheet_file(file)?;

    match StructuralValidator::new().validate(&rows, template) {
        Ok(report) if report.valid => {
            println!("✅ {} matches {} ({} rows)", file.display(), template.name, rows.len());
            Ok(())
        }
        Ok(report) => {
            let err = report.into_result().err();
            if let Some(err) = &err {
                report_case_file_error(err);
            }
            bail!("{} does not match {}", file.display(), template.name)
        }
        Err(err) => {
            report_case_file_error(&err);
            Err(err.into())
        }
    }
}

fn run_import(
    config: &AppConfig,
    bank: &str,
    product: &str,
    file: &Path,
    commit: bool,
    sample: usize,
) -> Result<()> {
    println!("📂 Loading {}...", file.display());
    let rows = read_sheet_file(file)?;

    let pipeline = Arc::new(IngestPipeline::new(config.ingest.clone()));
    let handle = spawn_ingest(pipeline, rows, bank.to_string(), product.to_string());

    let batch = match handle.wait() {
        Ok(batch) => batch,
        Err(err) => {
            report_case_file_error(&err);
            return Err(err.into());
        }
    };

    let preview = batch.preview(sample);
    println!("\n🔍 Preview: {} (batch {})", preview.template, preview.batch_id);
    println!("  rows:        {}", preview.rows);
    println!("  assigned:    {}", preview.assigned);
    println!("  unassigned:  {}", preview.unassigned);
    println!("  outstanding: {:.2}", preview.total_outstanding);
    if !preview.unmatched_columns.is_empty() {
        println!("  ⚠️  dropped columns: {}", preview.unmatched_columns.join(", "));
    }
    if preview.warning_count > 0 {
        println!("  ⚠️  {} value(s) defaulted to 0:", preview.warning_count);
        for warning in &preview.warnings {
            println!("     - {}", warning);
        }
    }
    for record in &preview.sample {
        print_record(record);
    }

    if !commit {
        println!("\nNothing stored. Re-run with --commit to import.");
        return Ok(());
    }

    let conn = open(config)?;
    let store = load_store(&conn, config)?;
    let batch_id = store.stage(batch);
    let committed = store
        .commit_with(batch_id, |records| {
            save_records(&conn, records)?;
            insert_event(
                &conn,
                &Event::new(
                    EventKind::CaseFilesImported,
                    batch_id.to_string(),
                    serde_json::json!({
                        "template": preview.template,
                        "rows": records.len(),
                        "source_file": file.display().to_string(),
                        "warnings": preview.warning_count,
                    }),
                    ACTOR,
                ),
            )
        })
        .map_err(reported)?;

    println!("\n💾 Imported {} case file(s); store holds {}", committed.len(), verify_count(&conn)?);
    Ok(())
}

fn list_records(
    config: &AppConfig,
    bank: Option<&str>,
    agent: Option<&str>,
    unassigned: bool,
) -> Result<()> {
    let conn = open(config)?;
    let records = load_records(&conn)?;

    let selected: Vec<&CaseFileRecord> = records
        .iter()
        .filter(|r| bank.map_or(true, |b| r.bank.eq_ignore_ascii_case(b)))
        .filter(|r| agent.map_or(true, |a| r.assigned_agent.as_deref() == Some(a)))
        .filter(|r| !unassigned || !r.is_assigned())
        .collect();

    println!("📊 {} of {} case file(s)", selected.len(), records.len());
    for record in selected {
        print_record(record);
    }
    Ok(())
}

fn run_assign(config: &AppConfig, agent_id: &str, record_ids: &[String]) -> Result<()> {
    let conn = open(config)?;
    let store = load_store(&conn, config)?;

    let agent_name = store
        .agents()
        .into_iter()
        .find(|a| a.id == agent_id)
        .map(|a| a.name)
        .unwrap_or_default();
    let data = serde_json::json!({ "agent_id": agent_id, "agent": agent_name });

    let outcome = store
        .assign_with(record_ids, agent_id, |outcome| {
            persist_outcome(&conn, outcome, EventKind::CaseFileAssigned, data)
        })
        .map_err(reported)?;

    print_outcome("Assigned", &outcome);
    Ok(())
}

fn run_unassign(config: &AppConfig, record_ids: &[String]) -> Result<()> {
    let conn = open(config)?;
    let store = load_store(&conn, config)?;

    let outcome = store.unassign_with(record_ids, |outcome| {
        persist_outcome(&conn, outcome, EventKind::CaseFileUnassigned, serde_json::json!({}))
    })?;
    print_outcome("Unassigned", &outcome);
    Ok(())
}

fn run_agents(config: &AppConfig, command: AgentCommands) -> Result<()> {
    let conn = open(config)?;

    match command {
        AgentCommands::Add { id, name, banks } => {
            let agent = banks
                .into_iter()
                .fold(Agent::new(id, name), |agent, bank| agent.with_bank(bank));
            upsert_agent(&conn, &agent)?;
            insert_event(
                &conn,
                &Event::new(
                    EventKind::AgentSaved,
                    agent.id.as_str(),
                    serde_json::json!({ "name": agent.name, "eligible_banks": agent.eligible_banks }),
                    ACTOR,
                ),
            )?;
            println!("✓ Saved agent {} ({})", agent.id, agent.name);
        }
        AgentCommands::List => {
            let registry = load_agents(&conn)?;
            println!("👤 {} agent(s)", registry.count());
            for agent in registry.all() {
                let banks: Vec<&str> = agent.eligible_banks.iter().map(String::as_str).collect();
                println!("  {:<10} {:<24} {}", agent.id, agent.name, banks.join(", "));
            }
        }
    }
    Ok(())
}

fn run_export_template(bank: &str, product: &str, out: Option<&Path>) -> Result<()> {
    let registry = TemplateRegistry::new();
    let template = registry.resolve(bank, product)?;
    let csv = export_sample(template).to_csv()?;

    match out {
        Some(path) => {
            fs::write(path, csv).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Wrote {} sample to {}", template.name, path.display());
        }
        None => print!("{}", csv),
    }
    Ok(())
}

fn run_export_all(out: &Path, csv: bool) -> Result<()> {
    let workbook = export_all(&TemplateRegistry::new());

    if csv {
        for path in workbook.write_to_dir(out)? {
            println!("✓ {}", path.display());
        }
    } else {
        workbook.write_xlsx(out)?;
        println!("✓ {} ({} worksheets)", out.display(), workbook.sheets.len());
    }
    Ok(())
}

fn show_history(config: &AppConfig, entity: EntityKind, id: &str) -> Result<()> {
    let conn = open(config)?;
    let events = get_events_for_entity(&conn, entity, id)?;

    if events.is_empty() {
        println!("No history for {} {}", entity.as_str(), id);
        return Ok(());
    }

    println!("🕓 History of {} {}", entity.as_str(), id);
    for event in events {
        println!(
            "  {}  {:<22} {:<6} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.kind.as_str(),
            event.actor,
            event.data
        );
    }
    Ok(())
}
