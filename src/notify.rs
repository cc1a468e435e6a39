//! Notification collaborator.
//!
//! The engine hands a structured [`JobSummary`] to a [`Notifier`] once per
//! file (single-file runs) or once per batch. Delivery is explicitly
//! non-fatal: a notifier error is logged and never alters a recorded
//! JobRun or BatchJob status.

use anyhow::Result;
use chrono::NaiveDateTime;
use log::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job_type: String,
    pub status: String,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub duration_seconds: i64,
    pub path: String,
    pub target_table: Option<String>,
    pub rows_read: usize,
    pub rows_written: usize,
    pub rows_failed: usize,
    pub total_files: Option<usize>,
    pub files_processed: Option<usize>,
    pub files_failed: Option<usize>,
    pub batch_id: Option<Uuid>,
    pub error_summary: Option<String>,
}

pub trait Notifier {
    fn notify(&self, summary: &JobSummary) -> Result<()>;
}

/// Default notifier: a structured log line. Deployments with delivery
/// channels implement [`Notifier`] over the same summary.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, summary: &JobSummary) -> Result<()> {
        match (summary.total_files, summary.files_processed) {
            (Some(total), Some(processed)) => info!(
                "{} {}: {} of {} file(s) processed, {} failed in {}s [{}]",
                summary.job_type,
                summary.status,
                processed,
                total,
                summary.files_failed.unwrap_or(0),
                summary.duration_seconds,
                summary.path
            ),
            _ => info!(
                "{} {}: {} read, {} written, {} failed in {}s [{} -> {}]",
                summary.job_type,
                summary.status,
                summary.rows_read,
                summary.rows_written,
                summary.rows_failed,
                summary.duration_seconds,
                summary.path,
                summary.target_table.as_deref().unwrap_or("-")
            ),
        }
        if let Some(error) = &summary.error_summary {
            info!("{} error detail: {error}", summary.job_type);
        }
        Ok(())
    }
}

/// Sends the summary, swallowing delivery failures by design.
pub fn notify_best_effort(notifier: &dyn Notifier, summary: &JobSummary) {
    if let Err(err) = notifier.notify(summary) {
        warn!("Notification delivery failed (status unchanged): {err:#}");
    }
}
