//! Loader configuration model and YAML loading.
//!
//! Every section carries serde defaults so a minimal config file (or none at
//! all) still yields a working loader. [`LoaderConfig::validate`] runs once at
//! startup; anything it rejects is a configuration error and no file is
//! touched afterwards.

use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    ddl::TableMode,
    error::LoadError,
    schema::SqlType,
    upsert::DuplicatePolicy,
    writer::TransactionMode,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    pub database: DatabaseConfig,
    pub loader: LoaderSection,
    pub ddl: DdlConfig,
    pub upsert: UpsertConfig,
    /// Per-table column overrides keyed by resolved table name.
    pub tables: BTreeMap<String, TableOverrides>,
    pub job_statistics: JobStatisticsConfig,
    pub batch: BatchConfig,
    pub notifications: NotificationConfig,
    pub relocation: RelocationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file holding target tables and job sinks.
    pub path: PathBuf,
    /// Upper bound on waiting for a locked database before a write fails.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("loader.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderSection {
    pub table_mode: TableMode,
    pub transaction_mode: TransactionMode,
    /// Tolerant mode aborts the file once failures exceed this count.
    /// Exactly this many failures still commits.
    pub max_row_errors: usize,
}

impl Default for LoaderSection {
    fn default() -> Self {
        Self {
            table_mode: TableMode::Create,
            transaction_mode: TransactionMode::Tolerant,
            max_row_errors: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DdlConfig {
    /// Columns declared NOT NULL when inference saw no missing values.
    pub not_null_columns: Vec<String>,
    pub decimal_precision: u32,
    pub decimal_scale: u32,
    /// Width for columns with no non-missing values.
    pub default_width: u32,
    /// Ascending rounding buckets for inferred string widths.
    pub width_buckets: Vec<u32>,
    /// At or beyond this inferred width the column becomes unbounded TEXT.
    pub text_threshold: u32,
}

impl Default for DdlConfig {
    fn default() -> Self {
        Self {
            not_null_columns: Vec::new(),
            decimal_precision: 18,
            decimal_scale: 4,
            default_width: 50,
            width_buckets: vec![50, 100, 255, 500],
            text_threshold: 4_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpsertConfig {
    /// Primary-key columns used to partition rows in upsert mode.
    pub key_columns: Vec<String>,
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableOverrides {
    pub columns: BTreeMap<String, ColumnOverride>,
}

/// Manual replacement for an inferred column. Any field present replaces the
/// inferred value outright.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnOverride {
    pub datatype: Option<SqlType>,
    pub max_length: Option<u32>,
    pub nullable: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobStatisticsConfig {
    pub enabled: bool,
}

impl Default for JobStatisticsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub enable_checkpointing: bool,
    pub resume_incomplete_batches: bool,
    /// Incomplete batches older than this are never resumed.
    pub max_resume_age_hours: i64,
    /// Delete a batch's worklist rows once it finishes fully clean. The
    /// batch summary row is kept either way.
    pub cleanup_on_completion: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enable_checkpointing: true,
            resume_incomplete_batches: true,
            max_resume_age_hours: 24,
            cleanup_on_completion: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationConfig {
    pub enabled: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelocationConfig {
    /// When enabled, completed files move to `processed/` and rejected files
    /// to `error/` next to the source.
    pub enabled: bool,
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl LoaderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: LoaderConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config file {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config when a path is given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.loader.table_mode == TableMode::Upsert && self.upsert.key_columns.is_empty() {
            return Err(LoadError::config(
                "table_mode 'upsert' requires upsert.key_columns",
            ));
        }
        if self.ddl.decimal_precision == 0 {
            return Err(LoadError::config("ddl.decimal_precision must be positive"));
        }
        if self.ddl.decimal_scale > self.ddl.decimal_precision {
            return Err(LoadError::config(format!(
                "ddl.decimal_scale ({}) cannot exceed ddl.decimal_precision ({})",
                self.ddl.decimal_scale, self.ddl.decimal_precision
            )));
        }
        if self.ddl.width_buckets.is_empty() {
            return Err(LoadError::config("ddl.width_buckets must not be empty"));
        }
        if self.ddl.width_buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(LoadError::config(
                "ddl.width_buckets must be strictly ascending",
            ));
        }
        if self.ddl.default_width == 0 {
            return Err(LoadError::config("ddl.default_width must be positive"));
        }
        if self.batch.max_resume_age_hours <= 0 {
            return Err(LoadError::config(
                "batch.max_resume_age_hours must be positive",
            ));
        }
        Ok(())
    }

    /// Returns the manual override for a column, if the config names one.
    pub fn column_override(&self, table: &str, column: &str) -> Option<&ColumnOverride> {
        self.tables
            .get(table)
            .and_then(|overrides| overrides.columns.get(column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        LoaderConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn upsert_mode_requires_key_columns() {
        let mut config = LoaderConfig::default();
        config.loader.table_mode = TableMode::Upsert;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("key_columns"));

        config.upsert.key_columns = vec!["id".to_string()];
        config.validate().expect("valid with key columns");
    }

    #[test]
    fn width_buckets_must_ascend() {
        let mut config = LoaderConfig::default();
        config.ddl.width_buckets = vec![100, 50];
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_yaml_with_overrides() {
        let raw = r#"
loader:
  table_mode: drop_recreate
  transaction_mode: strict
  max_row_errors: 5
ddl:
  not_null_columns: [id]
tables:
  orders:
    columns:
      notes:
        max_length: 2000
      id:
        datatype: integer
        nullable: false
"#;
        let config: LoaderConfig = serde_yaml::from_str(raw).expect("parse yaml");
        config.validate().expect("valid");
        assert_eq!(config.loader.max_row_errors, 5);
        let over = config.column_override("orders", "notes").expect("override");
        assert_eq!(over.max_length, Some(2000));
        let id = config.column_override("orders", "id").expect("override");
        assert_eq!(id.nullable, Some(false));
    }
}
