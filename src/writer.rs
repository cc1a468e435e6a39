//! Transactional writer: strict and tolerant load strategies.
//!
//! Exactly one transaction is open per file, never nested. Strict validates
//! the entire row set before any write and commits all-or-nothing. Tolerant
//! writes row by row inside one open transaction, counting failures against
//! the configured threshold; `failures > threshold` rolls the whole file
//! back, `failures == threshold` still commits.

use clap::ValueEnum;
use log::{debug, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{
    data::{ErrorCategory, RowError, SqlValue, convert_row},
    db,
    error::LoadError,
    recorder::JobStatus,
    schema::TableSchema,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum TransactionMode {
    Strict,
    Tolerant,
}

impl Default for TransactionMode {
    fn default() -> Self {
        TransactionMode::Tolerant
    }
}

/// Outcome of one file's write phase, emitted regardless of success.
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    pub rows_read: usize,
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub rows_failed: usize,
    pub committed: bool,
    pub errors: Vec<RowError>,
}

impl WriteReport {
    pub fn status(&self) -> JobStatus {
        if !self.committed {
            JobStatus::Failed
        } else if self.rows_failed > 0 {
            JobStatus::CompletedWithErrors
        } else {
            JobStatus::Completed
        }
    }

    pub fn rows_written(&self) -> usize {
        self.rows_inserted + self.rows_updated
    }

    pub(crate) fn rejected(rows_read: usize, errors: Vec<RowError>) -> Self {
        Self {
            rows_read,
            rows_failed: errors.len(),
            committed: false,
            errors,
            ..Self::default()
        }
    }
}

pub(crate) fn insert_sql(schema: &TableSchema) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|c| db::quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=schema.columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({columns}) VALUES ({placeholders})",
        db::quote_ident(&schema.table)
    )
}

/// Writes the full row set using plain inserts under the selected strategy.
pub fn write_dataset(
    conn: &mut Connection,
    schema: &TableSchema,
    rows: &[Vec<Option<String>>],
    mode: TransactionMode,
    max_row_errors: usize,
) -> Result<WriteReport, LoadError> {
    match mode {
        TransactionMode::Strict => write_strict(conn, schema, rows),
        TransactionMode::Tolerant => write_tolerant(conn, schema, rows, max_row_errors),
    }
}

fn write_strict(
    conn: &mut Connection,
    schema: &TableSchema,
    rows: &[Vec<Option<String>>],
) -> Result<WriteReport, LoadError> {
    let mut converted: Vec<Vec<SqlValue>> = Vec::with_capacity(rows.len());
    let mut errors = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        match convert_row(row, &schema.columns, idx) {
            Ok(values) => converted.push(values),
            Err(err) => errors.push(err),
        }
    }
    if !errors.is_empty() {
        warn!(
            "Strict validation rejected {} row(s) for table '{}'; writing nothing",
            errors.len(),
            schema.table
        );
        return Ok(WriteReport::rejected(rows.len(), errors));
    }

    let sql = insert_sql(schema);
    let tx = conn.transaction()?;
    let mut failure: Option<RowError> = None;
    {
        let mut stmt = tx.prepare(&sql)?;
        for (idx, values) in converted.iter().enumerate() {
            if let Err(err) = stmt.execute(rusqlite::params_from_iter(values.iter())) {
                failure = Some(RowError::new(
                    idx,
                    "",
                    ErrorCategory::Constraint,
                    err.to_string(),
                ));
                break;
            }
        }
    }
    if let Some(err) = failure {
        tx.rollback()?;
        warn!(
            "Strict write for table '{}' hit a constraint at row {}; rolled back",
            schema.table, err.row
        );
        return Ok(WriteReport::rejected(rows.len(), vec![err]));
    }
    tx.commit()?;

    Ok(WriteReport {
        rows_read: rows.len(),
        rows_inserted: converted.len(),
        committed: true,
        ..WriteReport::default()
    })
}

fn write_tolerant(
    conn: &mut Connection,
    schema: &TableSchema,
    rows: &[Vec<Option<String>>],
    max_row_errors: usize,
) -> Result<WriteReport, LoadError> {
    let sql = insert_sql(schema);
    let tx = conn.transaction()?;
    let mut inserted = 0usize;
    let mut errors: Vec<RowError> = Vec::new();
    let mut aborted = false;
    {
        let mut stmt = tx.prepare(&sql)?;
        for (idx, row) in rows.iter().enumerate() {
            let values = match convert_row(row, &schema.columns, idx) {
                Ok(values) => values,
                Err(err) => {
                    debug!("Row {idx} rejected: {}", err.message);
                    errors.push(err);
                    if errors.len() > max_row_errors {
                        aborted = true;
                        break;
                    }
                    continue;
                }
            };
            match stmt.execute(rusqlite::params_from_iter(values.iter())) {
                Ok(_) => inserted += 1,
                Err(err) => {
                    debug!("Row {idx} failed at the store: {err}");
                    errors.push(RowError::new(
                        idx,
                        "",
                        ErrorCategory::Constraint,
                        err.to_string(),
                    ));
                    if errors.len() > max_row_errors {
                        aborted = true;
                        break;
                    }
                }
            }
        }
    }

    if aborted {
        tx.rollback()?;
        warn!(
            "Tolerant write for table '{}' exceeded max_row_errors ({} > {}); rolled back",
            schema.table,
            errors.len(),
            max_row_errors
        );
        return Ok(WriteReport::rejected(rows.len(), errors));
    }
    tx.commit()?;

    Ok(WriteReport {
        rows_read: rows.len(),
        rows_inserted: inserted,
        rows_failed: errors.len(),
        committed: true,
        errors,
        ..WriteReport::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, SqlType};

    fn schema() -> TableSchema {
        TableSchema {
            table: "t".to_string(),
            columns: vec![
                ColumnSpec {
                    name: "id".to_string(),
                    sql_type: SqlType::Integer,
                    nullable: false,
                    overridden: false,
                },
                ColumnSpec {
                    name: "name".to_string(),
                    sql_type: SqlType::Varchar(10),
                    nullable: true,
                    overridden: false,
                },
            ],
        }
    }

    fn setup() -> Connection {
        let conn = crate::db::open_in_memory().expect("open");
        conn.execute_batch("CREATE TABLE t (id INTEGER NOT NULL, name VARCHAR(10) NULL)")
            .expect("create");
        conn
    }

    fn row(id: &str, name: &str) -> Vec<Option<String>> {
        vec![Some(id.to_string()), Some(name.to_string())]
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn strict_writes_all_valid_rows_atomically() {
        let mut conn = setup();
        let rows = vec![row("1", "a"), row("2", "b")];
        let report =
            write_dataset(&mut conn, &schema(), &rows, TransactionMode::Strict, 0).unwrap();
        assert_eq!(report.status(), JobStatus::Completed);
        assert_eq!(report.rows_inserted, 2);
        assert_eq!(count(&conn), 2);
    }

    #[test]
    fn strict_writes_nothing_when_any_row_is_invalid() {
        let mut conn = setup();
        let mut rows: Vec<_> = (0..999).map(|i| row(&i.to_string(), "ok")).collect();
        rows.push(row("bad", "x"));
        let report =
            write_dataset(&mut conn, &schema(), &rows, TransactionMode::Strict, 0).unwrap();
        assert_eq!(report.status(), JobStatus::Failed);
        assert_eq!(report.rows_inserted, 0);
        assert_eq!(count(&conn), 0, "all-or-nothing");
    }

    #[test]
    fn tolerant_commits_at_exactly_the_threshold() {
        let mut conn = setup();
        let rows = vec![row("1", "a"), row("x", "b"), row("y", "c"), row("4", "d")];
        // Two failures, threshold two: commits with errors.
        let report =
            write_dataset(&mut conn, &schema(), &rows, TransactionMode::Tolerant, 2).unwrap();
        assert_eq!(report.status(), JobStatus::CompletedWithErrors);
        assert_eq!(report.rows_inserted, 2);
        assert_eq!(report.rows_failed, 2);
        assert_eq!(count(&conn), 2);
    }

    #[test]
    fn tolerant_rolls_back_past_the_threshold() {
        let mut conn = setup();
        let rows = vec![row("1", "a"), row("x", "b"), row("y", "c"), row("4", "d")];
        let report =
            write_dataset(&mut conn, &schema(), &rows, TransactionMode::Tolerant, 1).unwrap();
        assert_eq!(report.status(), JobStatus::Failed);
        assert!(!report.committed);
        assert_eq!(count(&conn), 0, "rolled back");
    }

    #[test]
    fn tolerant_with_zero_failures_is_completed() {
        let mut conn = setup();
        let rows = vec![row("1", "a")];
        let report =
            write_dataset(&mut conn, &schema(), &rows, TransactionMode::Tolerant, 0).unwrap();
        assert_eq!(report.status(), JobStatus::Completed);
    }
}
