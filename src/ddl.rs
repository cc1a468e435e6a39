//! Table resolver and DDL synthesis.
//!
//! The resolver is a small state machine over (table exists, configured
//! mode). `append` and `upsert` intentionally skip DDL against an existing
//! table: there is no schema reconciliation, and a mismatch surfaces as
//! row-level errors during the write.

use clap::ValueEnum;
use log::info;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{db, error::LoadError, schema::TableSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum TableMode {
    Create,
    DropRecreate,
    Append,
    Fail,
    Upsert,
}

impl Default for TableMode {
    fn default() -> Self {
        TableMode::Create
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableAction {
    /// Create the table from synthesized DDL.
    Create,
    /// Drop the existing table, then create.
    DropAndCreate,
    /// Use the existing table as-is; rows go through plain inserts.
    UseExisting,
    /// Use the existing table; rows route through the upsert resolver.
    UseExistingUpsert,
}

impl TableAction {
    pub fn is_upsert(&self) -> bool {
        matches!(self, TableAction::UseExistingUpsert)
    }
}

/// Decides what to do with the target table. A `fail`-mode conflict is a
/// configuration-conflict error scoped to the current file.
pub fn resolve_table_action(exists: bool, mode: TableMode) -> Result<TableAction, String> {
    if !exists {
        return Ok(TableAction::Create);
    }
    match mode {
        TableMode::Fail => Err(
            "table already exists and table_mode is 'fail'".to_string(),
        ),
        TableMode::DropRecreate => Ok(TableAction::DropAndCreate),
        TableMode::Append | TableMode::Create => Ok(TableAction::UseExisting),
        TableMode::Upsert => Ok(TableAction::UseExistingUpsert),
    }
}

pub fn create_table_sql(schema: &TableSchema) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|col| {
            format!(
                "    {} {} {}",
                db::quote_ident(&col.name),
                col.sql_type.ddl_token(),
                if col.nullable { "NULL" } else { "NOT NULL" }
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "CREATE TABLE {} (\n{}\n)",
        db::quote_ident(&schema.table),
        columns
    )
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE {}", db::quote_ident(table))
}

/// Applies the resolved action against the store. `UseExisting*` actions are
/// no-ops here by design.
pub fn apply_table_action(
    conn: &Connection,
    action: TableAction,
    schema: &TableSchema,
) -> Result<(), LoadError> {
    match action {
        TableAction::Create => {
            let ddl = create_table_sql(schema);
            info!("Creating table '{}'", schema.table);
            conn.execute_batch(&ddl)?;
        }
        TableAction::DropAndCreate => {
            info!("Dropping and recreating table '{}'", schema.table);
            conn.execute_batch(&drop_table_sql(&schema.table))?;
            conn.execute_batch(&create_table_sql(schema))?;
        }
        TableAction::UseExisting | TableAction::UseExistingUpsert => {}
    }
    Ok(())
}
