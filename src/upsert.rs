//! Upsert resolver: in-batch duplicate-key resolution followed by
//! update-or-insert per key.
//!
//! Two phases. First, rows are partitioned by primary-key value and in-file
//! duplicates are collapsed per policy before any database operation (last
//! occurrence wins by default). Second, each surviving key is probed against
//! the target table and routed to UPDATE or INSERT. The two-phase design
//! makes a reload of the same file against the same target state a no-op.

use std::collections::HashMap;

use clap::ValueEnum;
use log::{debug, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{
    data::{ErrorCategory, RowError, SqlValue, convert_row},
    db,
    error::LoadError,
    schema::TableSchema,
    writer::{TransactionMode, WriteReport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    LastWins,
    FirstWins,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        DuplicatePolicy::LastWins
    }
}

#[derive(Debug)]
pub struct DedupeOutcome {
    /// Indices into the original row set, in file order.
    pub survivors: Vec<usize>,
    /// Rows that could not be keyed (missing or empty key cell).
    pub errors: Vec<RowError>,
    pub duplicates_dropped: usize,
}

/// Collapses duplicate primary keys within one file. Earlier (or later,
/// under first-wins) occurrences are discarded before any database work.
pub fn resolve_duplicates(
    rows: &[Vec<Option<String>>],
    key_indices: &[usize],
    key_names: &[String],
    policy: DuplicatePolicy,
) -> DedupeOutcome {
    let mut chosen: HashMap<Vec<String>, usize> = HashMap::new();
    let mut order: Vec<Vec<String>> = Vec::new();
    let mut errors = Vec::new();
    let mut duplicates_dropped = 0usize;

    for (idx, row) in rows.iter().enumerate() {
        let mut key = Vec::with_capacity(key_indices.len());
        let mut missing: Option<&String> = None;
        for (pos, key_idx) in key_indices.iter().enumerate() {
            match row.get(*key_idx).and_then(|c| c.as_deref()) {
                // Keys are compared trimmed so padded and bare spellings of
                // the same value land in one partition.
                Some(value) if !value.trim().is_empty() => key.push(value.trim().to_string()),
                _ => {
                    missing = Some(&key_names[pos]);
                    break;
                }
            }
        }
        if let Some(column) = missing {
            errors.push(RowError::new(
                idx,
                column,
                ErrorCategory::MissingKey,
                format!("primary-key column '{column}' is empty"),
            ));
            continue;
        }
        match chosen.get_mut(&key) {
            Some(existing) => {
                duplicates_dropped += 1;
                if policy == DuplicatePolicy::LastWins {
                    *existing = idx;
                }
            }
            None => {
                chosen.insert(key.clone(), idx);
                order.push(key);
            }
        }
    }

    let mut survivors: Vec<usize> = order.iter().map(|key| chosen[key]).collect();
    survivors.sort_unstable();
    DedupeOutcome {
        survivors,
        errors,
        duplicates_dropped,
    }
}

fn key_indices(schema: &TableSchema, key_columns: &[String]) -> Result<Vec<usize>, LoadError> {
    key_columns
        .iter()
        .map(|name| {
            schema.column_index(name).ok_or_else(|| {
                LoadError::config(format!(
                    "upsert key column '{name}' not present in table '{}'",
                    schema.table
                ))
            })
        })
        .collect()
}

fn exists_sql(schema: &TableSchema, key_columns: &[String]) -> String {
    let predicate = key_columns
        .iter()
        .enumerate()
        .map(|(i, name)| format!("{} = ?{}", db::quote_ident(name), i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "SELECT 1 FROM {} WHERE {predicate} LIMIT 1",
        db::quote_ident(&schema.table)
    )
}

fn update_sql(schema: &TableSchema, key_indices: &[usize]) -> String {
    let mut placeholder = 0usize;
    let assignments = schema
        .columns
        .iter()
        .enumerate()
        .filter(|(idx, _)| !key_indices.contains(idx))
        .map(|(_, col)| {
            placeholder += 1;
            format!("{} = ?{placeholder}", db::quote_ident(&col.name))
        })
        .collect::<Vec<_>>()
        .join(", ");
    let predicate = key_indices
        .iter()
        .map(|idx| {
            placeholder += 1;
            format!(
                "{} = ?{placeholder}",
                db::quote_ident(&schema.columns[*idx].name)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "UPDATE {} SET {assignments} WHERE {predicate}",
        db::quote_ident(&schema.table)
    )
}

fn split_values<'a>(
    values: &'a [SqlValue],
    key_indices: &[usize],
) -> (Vec<&'a SqlValue>, Vec<&'a SqlValue>) {
    let keys = key_indices.iter().map(|idx| &values[*idx]).collect();
    let non_keys = values
        .iter()
        .enumerate()
        .filter(|(idx, _)| !key_indices.contains(idx))
        .map(|(_, v)| v)
        .collect();
    (keys, non_keys)
}

/// Loads the row set in upsert mode under the active transaction strategy.
pub fn upsert_dataset(
    conn: &mut Connection,
    schema: &TableSchema,
    rows: &[Vec<Option<String>>],
    key_columns: &[String],
    policy: DuplicatePolicy,
    mode: TransactionMode,
    max_row_errors: usize,
) -> Result<WriteReport, LoadError> {
    let keys = key_indices(schema, key_columns)?;
    if keys.len() == schema.columns.len() {
        return Err(LoadError::config(format!(
            "upsert key covers every column of table '{}'; nothing to update",
            schema.table
        )));
    }

    let deduped = resolve_duplicates(rows, &keys, key_columns, policy);
    if deduped.duplicates_dropped > 0 {
        debug!(
            "Collapsed {} duplicate-key row(s) in-file for table '{}'",
            deduped.duplicates_dropped, schema.table
        );
    }

    match mode {
        TransactionMode::Strict => upsert_strict(conn, schema, rows, &keys, deduped),
        TransactionMode::Tolerant => {
            upsert_tolerant(conn, schema, rows, &keys, deduped, max_row_errors)
        }
    }
}

fn upsert_strict(
    conn: &mut Connection,
    schema: &TableSchema,
    rows: &[Vec<Option<String>>],
    keys: &[usize],
    deduped: DedupeOutcome,
) -> Result<WriteReport, LoadError> {
    let mut errors = deduped.errors;
    let mut converted = Vec::with_capacity(deduped.survivors.len());
    for idx in &deduped.survivors {
        match convert_row(&rows[*idx], &schema.columns, *idx) {
            Ok(values) => converted.push(values),
            Err(err) => errors.push(err),
        }
    }
    if !errors.is_empty() {
        warn!(
            "Strict upsert validation rejected {} row(s) for table '{}'; writing nothing",
            errors.len(),
            schema.table
        );
        return Ok(WriteReport::rejected(rows.len(), errors));
    }

    let tx = conn.transaction()?;
    let mut inserted = 0usize;
    let mut updated = 0usize;
    let mut failure: Option<RowError> = None;
    {
        let mut select = tx.prepare(&exists_sql(schema, &key_names(schema, keys)))?;
        let mut insert = tx.prepare(&crate::writer::insert_sql(schema))?;
        let mut update = tx.prepare(&update_sql(schema, keys))?;
        for (pos, values) in converted.iter().enumerate() {
            match apply_one(&mut select, &mut insert, &mut update, values, keys) {
                Ok(true) => updated += 1,
                Ok(false) => inserted += 1,
                Err(err) => {
                    failure = Some(RowError::new(
                        deduped.survivors[pos],
                        "",
                        ErrorCategory::Constraint,
                        err.to_string(),
                    ));
                    break;
                }
            }
        }
    }
    if let Some(err) = failure {
        tx.rollback()?;
        warn!(
            "Strict upsert for table '{}' hit a constraint at row {}; rolled back",
            schema.table, err.row
        );
        return Ok(WriteReport::rejected(rows.len(), vec![err]));
    }
    tx.commit()?;

    Ok(WriteReport {
        rows_read: rows.len(),
        rows_inserted: inserted,
        rows_updated: updated,
        committed: true,
        ..WriteReport::default()
    })
}

fn upsert_tolerant(
    conn: &mut Connection,
    schema: &TableSchema,
    rows: &[Vec<Option<String>>],
    keys: &[usize],
    deduped: DedupeOutcome,
    max_row_errors: usize,
) -> Result<WriteReport, LoadError> {
    let mut errors = deduped.errors;
    if errors.len() > max_row_errors {
        warn!(
            "Upsert keying for table '{}' already exceeded max_row_errors; rejecting file",
            schema.table
        );
        return Ok(WriteReport::rejected(rows.len(), errors));
    }

    let tx = conn.transaction()?;
    let mut inserted = 0usize;
    let mut updated = 0usize;
    let mut aborted = false;
    {
        let mut select = tx.prepare(&exists_sql(schema, &key_names(schema, keys)))?;
        let mut insert = tx.prepare(&crate::writer::insert_sql(schema))?;
        let mut update = tx.prepare(&update_sql(schema, keys))?;
        for idx in &deduped.survivors {
            let values = match convert_row(&rows[*idx], &schema.columns, *idx) {
                Ok(values) => values,
                Err(err) => {
                    errors.push(err);
                    if errors.len() > max_row_errors {
                        aborted = true;
                        break;
                    }
                    continue;
                }
            };
            match apply_one(&mut select, &mut insert, &mut update, &values, keys) {
                Ok(true) => updated += 1,
                Ok(false) => inserted += 1,
                Err(err) => {
                    errors.push(RowError::new(
                        *idx,
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
            "Tolerant upsert for table '{}' exceeded max_row_errors ({} > {}); rolled back",
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
        rows_updated: updated,
        rows_failed: errors.len(),
        committed: true,
        errors,
        ..WriteReport::default()
    })
}

fn key_names(schema: &TableSchema, keys: &[usize]) -> Vec<String> {
    keys.iter()
        .map(|idx| schema.columns[*idx].name.clone())
        .collect()
}

/// Returns Ok(true) when the key existed and was updated, Ok(false) on insert.
fn apply_one(
    select: &mut rusqlite::Statement<'_>,
    insert: &mut rusqlite::Statement<'_>,
    update: &mut rusqlite::Statement<'_>,
    values: &[SqlValue],
    keys: &[usize],
) -> rusqlite::Result<bool> {
    let (key_values, non_key_values) = split_values(values, keys);
    let exists = select.exists(rusqlite::params_from_iter(key_values.iter()))?;
    if exists {
        let params: Vec<&SqlValue> = non_key_values
            .into_iter()
            .chain(key_values.into_iter())
            .collect();
        update.execute(rusqlite::params_from_iter(params.iter()))?;
        Ok(true)
    } else {
        insert.execute(rusqlite::params_from_iter(values.iter()))?;
        Ok(false)
    }
}
