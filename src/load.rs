//! Single-file load pipeline.
//!
//! Detect format, materialize records, profile columns, synthesize the table
//! schema, resolve the target table, write under the configured transaction
//! strategy, then record statistics and signal relocation. File-level
//! failures produce a Failed JobRun and a quarantine signal; only
//! configuration and storage errors propagate out.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;
use log::{info, warn};
use rusqlite::Connection;
use uuid::Uuid;

use crate::{
    cli::LoadArgs,
    config::LoaderConfig,
    db, ddl,
    ddl::TableMode,
    error::LoadError,
    ingest,
    notify::{JobSummary, LogNotifier, notify_best_effort},
    profile,
    recorder::{JobRun, JobStatus, RunRecorder},
    relocate::{Destination, FileRelocator, NullRelocator, SubdirRelocator},
    schema, upsert, writer,
    writer::WriteReport,
};

/// Everything the per-file pipeline needs besides the connection and path.
pub struct LoadContext<'a> {
    pub config: &'a LoaderConfig,
    pub recorder: RunRecorder,
    pub relocator: &'a dyn FileRelocator,
    pub encoding: &'static Encoding,
    pub table_override: Option<String>,
}

impl<'a> LoadContext<'a> {
    pub fn new(
        config: &'a LoaderConfig,
        relocator: &'a dyn FileRelocator,
        encoding: &'static Encoding,
    ) -> Self {
        Self {
            config,
            recorder: RunRecorder::new(config.job_statistics.enabled),
            relocator,
            encoding,
            table_override: None,
        }
    }
}

struct PipelineOutcome {
    table: String,
    report: WriteReport,
}

/// CLI entry point for `sql-loader load`.
pub fn execute(args: &LoadArgs) -> Result<()> {
    let mut config = LoaderConfig::load_or_default(args.config.as_deref())?;
    apply_cli_overrides(&mut config, args);
    config.validate()?;

    let encoding = ingest::resolve_encoding(args.input_encoding.as_deref())?;
    let mut conn = db::open(&config.database)?;
    let recorder = RunRecorder::new(config.job_statistics.enabled);
    recorder.ensure_tables(&conn)?;

    let subdir = SubdirRelocator;
    let null = NullRelocator;
    let relocator: &dyn FileRelocator = if config.relocation.enabled {
        &subdir
    } else {
        &null
    };
    let mut ctx = LoadContext::new(&config, relocator, encoding);
    ctx.table_override = args.table.clone();

    let run = process_file(&mut conn, &ctx, &args.input, None)?;

    if config.notifications.enabled {
        notify_best_effort(&LogNotifier, &file_summary(&run));
    }

    if run.status == JobStatus::Failed {
        return Err(anyhow!(
            "file {:?} failed: {}",
            args.input,
            run.error_message.as_deref().unwrap_or("see error records")
        ));
    }
    Ok(())
}

fn apply_cli_overrides(config: &mut LoaderConfig, args: &LoadArgs) {
    if let Some(db) = &args.db {
        config.database.path = db.clone();
    }
    if let Some(mode) = args.table_mode {
        config.loader.table_mode = mode;
    }
    if let Some(mode) = args.transaction_mode {
        config.loader.transaction_mode = mode;
    }
}

/// Runs the whole pipeline for one file and emits its JobRun. Returns `Err`
/// only for errors that abort the batch (configuration, storage); file-level
/// failures are folded into a Failed run.
pub fn process_file(
    conn: &mut Connection,
    ctx: &LoadContext<'_>,
    path: &Path,
    batch_id: Option<Uuid>,
) -> Result<JobRun, LoadError> {
    info!("Processing file {path:?}");
    let mut run = JobRun::begin(path.display().to_string(), batch_id);

    match run_pipeline(conn, ctx, path) {
        Ok(outcome) => {
            let report = outcome.report;
            run.target_table = outcome.table;
            run.rows_read = report.rows_read;
            run.rows_inserted = report.rows_inserted;
            run.rows_updated = report.rows_updated;
            run.rows_failed = report.rows_failed;
            let status = report.status();
            if status == JobStatus::Failed {
                run.error_message = Some(format!(
                    "{} row-level failure(s); transaction rolled back",
                    report.errors.len()
                ));
            }
            run.finish(status);
            ctx.recorder
                .record_row_errors(conn, run.run_id, &run.target_table, &report.errors)?;
        }
        Err(err) if !err.aborts_batch() => {
            warn!("File-level failure for {path:?}: {err}");
            run.target_table = schema::derive_table_name(path);
            run.error_message = Some(err.to_string());
            run.finish(JobStatus::Failed);
        }
        Err(err) => return Err(err),
    }

    ctx.recorder.record_run(conn, &run)?;
    signal_relocation(ctx, path, &run);
    Ok(run)
}

fn run_pipeline(
    conn: &mut Connection,
    ctx: &LoadContext<'_>,
    path: &Path,
) -> Result<PipelineOutcome, LoadError> {
    let config = ctx.config;
    let format = ingest::detect_format(path)?;
    info!("Detected {} format for {path:?}", format.as_str());
    let dataset = ingest::read_dataset(path, format, ctx.encoding)?;

    let table = ctx
        .table_override
        .clone()
        .unwrap_or_else(|| schema::derive_table_name(path));
    let profiles = profile::profile_columns(&dataset);
    let table_schema = schema::build_table_schema(&table, &profiles, config)?;
    info!(
        "Target table '{table}': {} column(s), {} row(s)",
        table_schema.columns.len(),
        dataset.row_count()
    );

    let exists = db::table_exists(conn, &table)?;
    let action = ddl::resolve_table_action(exists, config.loader.table_mode)
        .map_err(|message| LoadError::file(path, message))?;
    ddl::apply_table_action(conn, action, &table_schema)?;

    // Upsert routing follows the configured mode, not the resolver action:
    // in-file duplicate keys must collapse even when the table was just
    // created.
    let report = if config.loader.table_mode == TableMode::Upsert {
        upsert::upsert_dataset(
            conn,
            &table_schema,
            &dataset.rows,
            &config.upsert.key_columns,
            config.upsert.duplicate_policy,
            config.loader.transaction_mode,
            config.loader.max_row_errors,
        )?
    } else {
        writer::write_dataset(
            conn,
            &table_schema,
            &dataset.rows,
            config.loader.transaction_mode,
            config.loader.max_row_errors,
        )?
    };

    Ok(PipelineOutcome { table, report })
}

fn signal_relocation(ctx: &LoadContext<'_>, path: &Path, run: &JobRun) {
    let destination = if run.status == JobStatus::Failed {
        Destination::Error
    } else {
        Destination::Processed
    };
    if let Err(err) = ctx.relocator.relocate(path, destination) {
        // Bookkeeping only; the recorded status stands.
        warn!("Relocation of {path:?} to '{}' failed: {err:#}", destination.as_str());
    }
}

pub fn file_summary(run: &JobRun) -> JobSummary {
    JobSummary {
        job_type: "File load".to_string(),
        status: run.status.as_str().to_string(),
        started_at: run.started_at,
        finished_at: run.finished_at,
        duration_seconds: run.duration_seconds(),
        path: run.source_file.clone(),
        target_table: Some(run.target_table.clone()),
        rows_read: run.rows_read,
        rows_written: run.rows_written(),
        rows_failed: run.rows_failed,
        total_files: None,
        files_processed: None,
        files_failed: None,
        batch_id: run.batch_id,
        error_summary: run.error_message.clone(),
    }
}

/// Infers the schema and prints the DDL without touching the store.
pub fn probe(args: &crate::cli::ProbeArgs) -> Result<()> {
    let config = LoaderConfig::load_or_default(args.config.as_deref())?;
    let encoding = ingest::resolve_encoding(args.input_encoding.as_deref())?;
    let format = ingest::detect_format(&args.input)
        .with_context(|| format!("Detecting format of {:?}", args.input))?;
    let dataset = ingest::read_dataset(&args.input, format, encoding)
        .with_context(|| format!("Reading {:?}", args.input))?;
    let table = args
        .table
        .clone()
        .unwrap_or_else(|| schema::derive_table_name(&args.input));
    let profiles = profile::profile_columns(&dataset);
    let table_schema = schema::build_table_schema(&table, &profiles, &config)?;
    info!(
        "Inferred {} column(s) from {} row(s) of {} input",
        table_schema.columns.len(),
        dataset.row_count(),
        format.as_str()
    );
    println!("{};", ddl::create_table_sql(&table_schema));
    Ok(())
}
