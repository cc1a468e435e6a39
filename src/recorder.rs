//! Job run recorder: per-file statistics and row-level error records.
//!
//! The sink tables live in the same database as the loaded data. The core
//! produces [`JobRun`] and error records and hands them off here; nothing is
//! retained past emission, and a terminal status is never rewritten.

use std::fmt;

use chrono::{NaiveDateTime, Utc};
use log::info;
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::{data::RowError, error::LoadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::CompletedWithErrors => "CompletedWithErrors",
            JobStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Statistics for one file, written exactly once when processing ends.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub run_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub status: JobStatus,
    pub source_file: String,
    pub target_table: String,
    pub rows_read: usize,
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub rows_failed: usize,
    pub error_message: Option<String>,
}

impl JobRun {
    pub fn begin(source_file: String, batch_id: Option<Uuid>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            batch_id,
            started_at: Utc::now().naive_utc(),
            finished_at: Utc::now().naive_utc(),
            status: JobStatus::Running,
            source_file,
            target_table: String::new(),
            rows_read: 0,
            rows_inserted: 0,
            rows_updated: 0,
            rows_failed: 0,
            error_message: None,
        }
    }

    /// Moves the run to a terminal status. Running is the only state this
    /// accepts; a terminal status is immutable.
    pub fn finish(&mut self, status: JobStatus) {
        debug_assert!(!self.status.is_terminal(), "JobRun status is terminal");
        debug_assert!(status.is_terminal());
        self.status = status;
        self.finished_at = Utc::now().naive_utc();
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }

    pub fn rows_written(&self) -> usize {
        self.rows_inserted + self.rows_updated
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunRecorder {
    enabled: bool,
}

impl RunRecorder {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn ensure_tables(&self, conn: &Connection) -> Result<(), LoadError> {
        if !self.enabled {
            return Ok(());
        }
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS etl_job_runs (
                run_id TEXT PRIMARY KEY,
                batch_id TEXT NULL,
                started_at TIMESTAMP NOT NULL,
                finished_at TIMESTAMP NOT NULL,
                duration_seconds INTEGER NOT NULL,
                status TEXT NOT NULL,
                source_file TEXT NOT NULL,
                target_table TEXT NOT NULL,
                rows_read INTEGER NOT NULL,
                rows_inserted INTEGER NOT NULL,
                rows_updated INTEGER NOT NULL,
                rows_failed INTEGER NOT NULL,
                error_message TEXT NULL
            );
            CREATE TABLE IF NOT EXISTS etl_job_errors (
                error_id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                table_name TEXT NOT NULL,
                column_name TEXT NULL,
                error_type TEXT NOT NULL,
                error_message TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL
            );",
        )?;
        Ok(())
    }

    pub fn record_run(&self, conn: &Connection, run: &JobRun) -> Result<(), LoadError> {
        if !self.enabled {
            return Ok(());
        }
        conn.execute(
            "INSERT INTO etl_job_runs (
                run_id, batch_id, started_at, finished_at, duration_seconds,
                status, source_file, target_table, rows_read, rows_inserted,
                rows_updated, rows_failed, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                run.run_id.to_string(),
                run.batch_id.map(|id| id.to_string()),
                run.started_at,
                run.finished_at,
                run.duration_seconds(),
                run.status.as_str(),
                run.source_file,
                run.target_table,
                run.rows_read as i64,
                run.rows_inserted as i64,
                run.rows_updated as i64,
                run.rows_failed as i64,
                run.error_message,
            ],
        )?;
        info!(
            "Recorded run {} for '{}': {} ({} read, {} written, {} failed)",
            run.run_id,
            run.source_file,
            run.status,
            run.rows_read,
            run.rows_written(),
            run.rows_failed
        );
        Ok(())
    }

    pub fn record_row_errors(
        &self,
        conn: &Connection,
        run_id: Uuid,
        table: &str,
        errors: &[RowError],
    ) -> Result<(), LoadError> {
        if !self.enabled || errors.is_empty() {
            return Ok(());
        }
        let now = Utc::now().naive_utc();
        let mut stmt = conn.prepare(
            "INSERT INTO etl_job_errors (
                run_id, table_name, column_name, error_type, error_message, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for error in errors {
            let column = if error.column.is_empty() {
                None
            } else {
                Some(error.column.as_str())
            };
            stmt.execute(params![
                run_id.to_string(),
                table,
                column,
                error.category.as_str(),
                format!("row {}: {}", error.row + 1, error.message),
                now,
            ])?;
        }
        Ok(())
    }
}
