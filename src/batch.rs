//! Directory batch orchestration with checkpoint and resume.
//!
//! A batch owns a worklist of eligible files in one directory. Every file
//! outcome is persisted before the next file starts, so an interrupted batch
//! can resume from its checkpoint: completed files are skipped, pending and
//! failed ones are retried under the same batch id. Cancellation is honored
//! at file boundaries only; the in-flight file always finishes and is
//! recorded.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Result, anyhow};
use chrono::{Duration, NaiveDateTime, Utc};
use itertools::Itertools;
use log::info;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::{
    cli::BatchArgs,
    config::LoaderConfig,
    db,
    error::LoadError,
    ingest, load,
    load::LoadContext,
    notify::{JobSummary, LogNotifier, notify_best_effort},
    recorder::{JobStatus, RunRecorder},
    relocate::{FileRelocator, NullRelocator, SubdirRelocator},
};

const ELIGIBLE_EXTENSIONS: [&str; 3] = ["csv", "psv", "json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Interrupted,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Running => "Running",
            BatchStatus::Completed => "Completed",
            BatchStatus::CompletedWithErrors => "CompletedWithErrors",
            BatchStatus::Failed => "Failed",
            BatchStatus::Interrupted => "Interrupted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Running)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cooperative cancellation flag, checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub batch_id: Uuid,
    pub directory: String,
    pub total_files: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub status: BatchStatus,
    pub is_resumed: bool,
    pub original_batch_id: Option<Uuid>,
}

impl BatchJob {
    fn begin(directory: &Path, total_files: usize) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            directory: directory.display().to_string(),
            total_files,
            files_processed: 0,
            files_failed: 0,
            started_at: Utc::now().naive_utc(),
            finished_at: Utc::now().naive_utc(),
            status: BatchStatus::Running,
            is_resumed: false,
            original_batch_id: None,
        }
    }
}

/// CLI entry point for `sql-loader batch`.
pub fn execute(args: &BatchArgs) -> Result<()> {
    let mut config = LoaderConfig::load_or_default(args.config.as_deref())?;
    if let Some(db_path) = &args.db {
        config.database.path = db_path.clone();
    }
    config.validate()?;

    let encoding = ingest::resolve_encoding(args.input_encoding.as_deref())?;
    let mut conn = db::open(&config.database)?;
    RunRecorder::new(config.job_statistics.enabled).ensure_tables(&conn)?;

    let subdir = SubdirRelocator;
    let null = NullRelocator;
    let relocator: &dyn FileRelocator = if config.relocation.enabled {
        &subdir
    } else {
        &null
    };
    let ctx = LoadContext::new(&config, relocator, encoding);
    let cancel = CancelToken::new();

    let job = run_batch(&mut conn, &ctx, &args.directory, !args.no_resume, &cancel)?;

    if config.notifications.enabled {
        notify_best_effort(&LogNotifier, &batch_summary(&job));
    }

    match job.status {
        BatchStatus::Completed | BatchStatus::CompletedWithErrors => Ok(()),
        other => Err(anyhow!(
            "batch {} over {:?} finished as {other}",
            job.batch_id,
            args.directory
        )),
    }
}

/// Runs one batch over a directory. Checkpointing and resume follow the
/// configuration; with checkpointing off the worklist lives only in memory.
pub fn run_batch(
    conn: &mut Connection,
    ctx: &LoadContext<'_>,
    directory: &Path,
    allow_resume: bool,
    cancel: &CancelToken,
) -> Result<BatchJob, LoadError> {
    let files = discover_files(directory)?;
    let checkpointing = ctx.config.batch.enable_checkpointing;

    let mut job = if checkpointing {
        ensure_batch_tables(conn)?;
        let resumable = if allow_resume && ctx.config.batch.resume_incomplete_batches {
            find_resumable_batch(conn, directory, ctx.config.batch.max_resume_age_hours)?
        } else {
            None
        };
        match resumable {
            Some(previous) => resume_batch(conn, previous, directory, &files)?,
            None => create_batch(conn, directory, &files)?,
        }
    } else {
        BatchJob::begin(directory, files.len())
    };

    info!(
        "Batch {} over {:?}: {} file(s) total{}",
        job.batch_id,
        directory,
        job.total_files,
        if job.is_resumed { " (resumed)" } else { "" }
    );

    let worklist: Vec<String> = if checkpointing {
        pending_files(conn, job.batch_id)?
    } else {
        files.clone()
    };

    let mut interrupted = false;
    let mut storage_failure: Option<LoadError> = None;
    for file_name in &worklist {
        if cancel.is_cancelled() {
            info!("Batch {} cancelled; stopping at a file boundary", job.batch_id);
            interrupted = true;
            break;
        }
        let path = directory.join(file_name);
        match load::process_file(conn, ctx, &path, Some(job.batch_id)) {
            Ok(run) => {
                if run.status == JobStatus::Failed {
                    job.files_failed += 1;
                } else {
                    job.files_processed += 1;
                }
                if checkpointing {
                    record_file_outcome(conn, job.batch_id, file_name, run.status, run.run_id)?;
                    persist_progress(conn, &job)?;
                }
            }
            Err(err) => {
                storage_failure = Some(err);
                break;
            }
        }
    }

    job.status = if storage_failure.is_some() {
        BatchStatus::Failed
    } else if interrupted {
        BatchStatus::Interrupted
    } else if job.files_failed > 0 {
        BatchStatus::CompletedWithErrors
    } else {
        BatchStatus::Completed
    };
    job.finished_at = Utc::now().naive_utc();
    if checkpointing {
        refresh_counters(conn, &mut job)?;
        finalize_batch(conn, &job, ctx.config.batch.cleanup_on_completion)?;
    }
    info!(
        "Batch {} finished as {}: {} of {} file(s) processed, {} failed",
        job.batch_id, job.status, job.files_processed, job.total_files, job.files_failed
    );

    match storage_failure {
        Some(err) => Err(err),
        None => Ok(job),
    }
}

/// Eligible files in the directory, by name, non-recursive. Subdirectories
/// (including processed/ and error/) are skipped.
pub fn discover_files(directory: &Path) -> Result<Vec<String>, LoadError> {
    let entries = fs::read_dir(directory).map_err(|err| {
        LoadError::config(format!("cannot read directory {directory:?}: {err}"))
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| {
            LoadError::config(format!("cannot read directory {directory:?}: {err}"))
        })?;
        let path: PathBuf = entry.path();
        if !path.is_file() {
            continue;
        }
        let eligible = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| ELIGIBLE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !eligible {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            files.push(name.to_string());
        }
    }
    Ok(files.into_iter().sorted().collect())
}

pub fn ensure_batch_tables(conn: &Connection) -> Result<(), LoadError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS etl_batch_jobs (
            batch_id TEXT PRIMARY KEY,
            directory TEXT NOT NULL,
            total_files INTEGER NOT NULL,
            files_processed INTEGER NOT NULL,
            files_failed INTEGER NOT NULL,
            started_at TIMESTAMP NOT NULL,
            finished_at TIMESTAMP NULL,
            status TEXT NOT NULL,
            is_resumed INTEGER NOT NULL DEFAULT 0,
            original_batch_id TEXT NULL
        );
        CREATE TABLE IF NOT EXISTS etl_batch_files (
            batch_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            status TEXT NOT NULL,
            run_id TEXT NULL,
            finished_at TIMESTAMP NULL,
            PRIMARY KEY (batch_id, file_name)
        );",
    )?;
    Ok(())
}

/// Most recent non-terminal batch over the same directory inside the resume
/// window, if any.
pub fn find_resumable_batch(
    conn: &Connection,
    directory: &Path,
    max_age_hours: i64,
) -> Result<Option<Uuid>, LoadError> {
    let cutoff = Utc::now().naive_utc() - Duration::hours(max_age_hours);
    let found: Option<String> = conn
        .query_row(
            "SELECT batch_id FROM etl_batch_jobs
             WHERE directory = ?1
               AND status IN ('Running', 'Interrupted')
               AND started_at >= ?2
             ORDER BY started_at DESC
             LIMIT 1",
            params![directory.display().to_string(), cutoff],
            |row| row.get(0),
        )
        .optional()?;
    found
        .map(|raw| {
            Uuid::parse_str(&raw)
                .map_err(|err| LoadError::config(format!("corrupt batch id '{raw}': {err}")))
        })
        .transpose()
}

/// Creates a new batch and seeds its full worklist as pending.
pub fn create_batch(
    conn: &mut Connection,
    directory: &Path,
    files: &[String],
) -> Result<BatchJob, LoadError> {
    let job = BatchJob::begin(directory, files.len());
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO etl_batch_jobs (
            batch_id, directory, total_files, files_processed, files_failed,
            started_at, finished_at, status, is_resumed, original_batch_id
        ) VALUES (?1, ?2, ?3, 0, 0, ?4, NULL, ?5, 0, NULL)",
        params![
            job.batch_id.to_string(),
            job.directory,
            files.len() as i64,
            job.started_at,
            BatchStatus::Running.as_str(),
        ],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO etl_batch_files (batch_id, file_name, status) VALUES (?1, ?2, 'pending')",
        )?;
        for file in files {
            stmt.execute(params![job.batch_id.to_string(), file])?;
        }
    }
    tx.commit()?;
    Ok(job)
}

/// Reopens an earlier batch under its original id. Files that appeared in the
/// directory since the original run join the worklist as pending.
pub fn resume_batch(
    conn: &mut Connection,
    batch_id: Uuid,
    directory: &Path,
    files: &[String],
) -> Result<BatchJob, LoadError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO etl_batch_files (batch_id, file_name, status)
             VALUES (?1, ?2, 'pending')",
        )?;
        for file in files {
            stmt.execute(params![batch_id.to_string(), file])?;
        }
    }
    let total: i64 = tx.query_row(
        "SELECT COUNT(*) FROM etl_batch_files WHERE batch_id = ?1",
        params![batch_id.to_string()],
        |row| row.get(0),
    )?;
    let started_at = Utc::now().naive_utc();
    tx.execute(
        "UPDATE etl_batch_jobs
         SET status = ?2, total_files = ?3, started_at = ?4, finished_at = NULL,
             is_resumed = 1, original_batch_id = ?1
         WHERE batch_id = ?1",
        params![
            batch_id.to_string(),
            BatchStatus::Running.as_str(),
            total,
            started_at,
        ],
    )?;
    tx.commit()?;

    let mut job = BatchJob::begin(directory, total as usize);
    job.batch_id = batch_id;
    job.started_at = started_at;
    job.is_resumed = true;
    job.original_batch_id = Some(batch_id);
    refresh_counters(conn, &mut job)?;
    info!(
        "Resuming batch {batch_id}: {} file(s) already processed",
        job.files_processed
    );
    Ok(job)
}

/// Files still owed work: never attempted, or attempted and failed.
pub fn pending_files(conn: &Connection, batch_id: Uuid) -> Result<Vec<String>, LoadError> {
    let mut stmt = conn.prepare(
        "SELECT file_name FROM etl_batch_files
         WHERE batch_id = ?1 AND status IN ('pending', 'failed')
         ORDER BY file_name",
    )?;
    let names = stmt
        .query_map(params![batch_id.to_string()], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// Persists one file's outcome before the batch moves on.
pub fn record_file_outcome(
    conn: &Connection,
    batch_id: Uuid,
    file_name: &str,
    status: JobStatus,
    run_id: Uuid,
) -> Result<(), LoadError> {
    let token = match status {
        JobStatus::Completed => "completed",
        JobStatus::CompletedWithErrors => "completed_with_errors",
        JobStatus::Running | JobStatus::Failed => "failed",
    };
    conn.execute(
        "UPDATE etl_batch_files
         SET status = ?3, run_id = ?4, finished_at = ?5
         WHERE batch_id = ?1 AND file_name = ?2",
        params![
            batch_id.to_string(),
            file_name,
            token,
            run_id.to_string(),
            Utc::now().naive_utc(),
        ],
    )?;
    Ok(())
}

fn persist_progress(conn: &Connection, job: &BatchJob) -> Result<(), LoadError> {
    conn.execute(
        "UPDATE etl_batch_jobs SET files_processed = ?2, files_failed = ?3 WHERE batch_id = ?1",
        params![
            job.batch_id.to_string(),
            job.files_processed as i64,
            job.files_failed as i64,
        ],
    )?;
    Ok(())
}

/// Recomputes processed and failed counts from the checkpointed worklist, so
/// resumed runs include work done before the interruption.
fn refresh_counters(conn: &Connection, job: &mut BatchJob) -> Result<(), LoadError> {
    let (processed, failed): (i64, i64) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN status IN ('completed', 'completed_with_errors')
                THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
         FROM etl_batch_files WHERE batch_id = ?1",
        params![job.batch_id.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    job.files_processed = processed as usize;
    job.files_failed = failed as usize;
    Ok(())
}

/// Writes the terminal batch row. With `cleanup` set, a fully clean batch
/// also drops its worklist rows; anything short of Completed keeps them for
/// inspection and resume.
pub fn finalize_batch(conn: &Connection, job: &BatchJob, cleanup: bool) -> Result<(), LoadError> {
    debug_assert!(job.status.is_terminal());
    conn.execute(
        "UPDATE etl_batch_jobs
         SET status = ?2, files_processed = ?3, files_failed = ?4, finished_at = ?5
         WHERE batch_id = ?1",
        params![
            job.batch_id.to_string(),
            job.status.as_str(),
            job.files_processed as i64,
            job.files_failed as i64,
            job.finished_at,
        ],
    )?;
    if cleanup && job.status == BatchStatus::Completed {
        let dropped = conn.execute(
            "DELETE FROM etl_batch_files WHERE batch_id = ?1",
            params![job.batch_id.to_string()],
        )?;
        info!(
            "Cleaned up {dropped} worklist row(s) for completed batch {}",
            job.batch_id
        );
    }
    Ok(())
}

pub fn batch_summary(job: &BatchJob) -> JobSummary {
    JobSummary {
        job_type: "Batch load".to_string(),
        status: job.status.as_str().to_string(),
        started_at: job.started_at,
        finished_at: job.finished_at,
        duration_seconds: (job.finished_at - job.started_at).num_seconds(),
        path: job.directory.clone(),
        target_table: None,
        rows_read: 0,
        rows_written: 0,
        rows_failed: 0,
        total_files: Some(job.total_files),
        files_processed: Some(job.files_processed),
        files_failed: Some(job.files_failed),
        batch_id: Some(job.batch_id),
        error_summary: job.original_batch_id.map(|id| format!("resumed from batch {id}")),
    }
}
