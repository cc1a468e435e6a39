//! Table schema model and the analyzer that turns column profiles into one.
//!
//! Responsibilities:
//!
//! - [`SqlType`] with string round-tripping (`integer`, `decimal(18,4)`,
//!   `varchar(100)`, `timestamp`, `text`) for config overrides
//! - Width bucketing for inferred string columns and the large-object cutoff
//! - NOT NULL resolution (configured list AND no missing values observed)
//! - Deterministic target-table naming from the source file name

use std::{fmt, str::FromStr, sync::OnceLock};

use anyhow::{Result, anyhow, ensure};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::{
    config::LoaderConfig,
    error::LoadError,
    profile::{ColumnProfile, SemanticKind},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Decimal { precision: u32, scale: u32 },
    Timestamp,
    Varchar(u32),
    Text,
}

impl SqlType {
    /// The token emitted into DDL. SQLite accepts these names and applies
    /// the matching affinity.
    pub fn ddl_token(&self) -> String {
        match self {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Varchar(width) => format!("VARCHAR({width})"),
            SqlType::Text => "TEXT".to_string(),
        }
    }

    pub fn as_token(&self) -> String {
        match self {
            SqlType::Integer => "integer".to_string(),
            SqlType::Decimal { precision, scale } => format!("decimal({precision},{scale})"),
            SqlType::Timestamp => "timestamp".to_string(),
            SqlType::Varchar(width) => format!("varchar({width})"),
            SqlType::Text => "text".to_string(),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_token())
    }
}

impl FromStr for SqlType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "integer" | "int" => Ok(SqlType::Integer),
            "timestamp" | "datetime" => Ok(SqlType::Timestamp),
            "text" => Ok(SqlType::Text),
            other if other.starts_with("decimal") => {
                let (precision, scale) = parse_two_args(other, "decimal")?;
                ensure!(precision > 0, "decimal precision must be positive");
                ensure!(
                    scale <= precision,
                    "decimal scale ({scale}) cannot exceed precision ({precision})"
                );
                Ok(SqlType::Decimal { precision, scale })
            }
            other if other.starts_with("varchar") || other.starts_with("string") => {
                let width = parse_one_arg(other)?;
                ensure!(width > 0, "varchar width must be positive");
                Ok(SqlType::Varchar(width))
            }
            _ => Err(anyhow!(
                "Unknown SQL type '{value}'. Supported: integer, decimal(p,s), timestamp, varchar(n), text"
            )),
        }
    }
}

fn inner_args<'a>(token: &'a str, name: &str) -> Result<&'a str> {
    let start = token
        .find('(')
        .ok_or_else(|| anyhow!("{name} type requires arguments, e.g. {name}(18,4)"))?;
    ensure!(token.ends_with(')'), "{name} type must close with ')'");
    Ok(&token[start + 1..token.len() - 1])
}

fn parse_two_args(token: &str, name: &str) -> Result<(u32, u32)> {
    let inner = inner_args(token, name)?;
    let mut parts = inner.split(',').map(str::trim);
    let first: u32 = parts
        .next()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| anyhow!("{name} requires precision and scale"))?
        .parse()?;
    let second: u32 = parts
        .next()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| anyhow!("{name} requires precision and scale"))?
        .parse()?;
    ensure!(parts.next().is_none(), "{name} takes exactly two arguments");
    Ok((first, second))
}

fn parse_one_arg(token: &str) -> Result<u32> {
    let inner = inner_args(token, "varchar")?;
    Ok(inner.trim().parse()?)
}

impl Serialize for SqlType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_token())
    }
}

impl<'de> Deserialize<'de> for SqlType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        SqlType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    /// Set when a config override replaced the inferred definition.
    pub overridden: bool,
}

/// Ordered column definitions plus the resolved target table name. Column
/// order always matches the source file; every column appears exactly once.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Builds the table schema from column profiles, applying configured
/// overrides last so they replace inference outright.
pub fn build_table_schema(
    table: &str,
    profiles: &[ColumnProfile],
    config: &LoaderConfig,
) -> Result<TableSchema, LoadError> {
    let mut seen = std::collections::HashSet::new();
    for profile in profiles {
        if !seen.insert(profile.name.as_str()) {
            return Err(LoadError::config(format!(
                "duplicate column '{}' in source for table '{table}'",
                profile.name
            )));
        }
    }

    let columns = profiles
        .iter()
        .map(|profile| {
            let inferred = infer_sql_type(profile, config);
            let not_null_requested = config
                .ddl
                .not_null_columns
                .iter()
                .any(|name| name == &profile.name);
            let mut spec = ColumnSpec {
                name: profile.name.clone(),
                sql_type: inferred,
                nullable: !(not_null_requested && !profile.saw_missing),
                overridden: false,
            };
            if let Some(over) = config.column_override(table, &profile.name) {
                if let Some(datatype) = &over.datatype {
                    spec.sql_type = datatype.clone();
                    spec.overridden = true;
                }
                if let Some(max_length) = over.max_length {
                    spec.sql_type = if max_length >= config.ddl.text_threshold {
                        SqlType::Text
                    } else {
                        SqlType::Varchar(max_length)
                    };
                    spec.overridden = true;
                }
                if let Some(nullable) = over.nullable {
                    spec.nullable = nullable;
                    spec.overridden = true;
                }
            }
            spec
        })
        .collect();

    Ok(TableSchema {
        table: table.to_string(),
        columns,
    })
}

fn infer_sql_type(profile: &ColumnProfile, config: &LoaderConfig) -> SqlType {
    match profile.kind {
        SemanticKind::Integer => SqlType::Integer,
        SemanticKind::Decimal => SqlType::Decimal {
            precision: config.ddl.decimal_precision,
            scale: config.ddl.decimal_scale,
        },
        SemanticKind::DateTime => SqlType::Timestamp,
        SemanticKind::Text => size_text_column(profile.max_len, config),
    }
}

/// Rounds an observed width up to the next configured bucket; widths past the
/// last bucket get a padded VARCHAR, and anything at or beyond the
/// large-object threshold becomes unbounded TEXT.
fn size_text_column(max_len: usize, config: &LoaderConfig) -> SqlType {
    let ddl = &config.ddl;
    if max_len == 0 {
        return SqlType::Varchar(ddl.default_width);
    }
    if max_len >= ddl.text_threshold as usize {
        return SqlType::Text;
    }
    for bucket in &ddl.width_buckets {
        if max_len <= *bucket as usize {
            return SqlType::Varchar(*bucket);
        }
    }
    let padded = (max_len as u32).saturating_add(100).max(1_000);
    if padded >= ddl.text_threshold {
        SqlType::Text
    } else {
        SqlType::Varchar(padded)
    }
}

static SHARD_SUFFIX: OnceLock<Regex> = OnceLock::new();
static NON_WORD: OnceLock<Regex> = OnceLock::new();

/// Derives the target table name from a file path. Deterministic: the stem is
/// taken, shard suffixes like `_000` are stripped, non-word characters become
/// underscores, and a leading digit is prefixed.
pub fn derive_table_name(path: &std::path::Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("table");
    let shard = SHARD_SUFFIX.get_or_init(|| Regex::new(r"_\d{3,}$").expect("shard suffix regex"));
    let non_word = NON_WORD.get_or_init(|| Regex::new(r"[^\w]").expect("non-word regex"));
    let trimmed = shard.replace(stem, "");
    let mut name = non_word.replace_all(&trimmed, "_").to_string();
    if name.is_empty() {
        name = "table".to_string();
    }
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        name = format!("t_{name}");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn profile(name: &str, kind: SemanticKind, max_len: usize, saw_missing: bool) -> ColumnProfile {
        ColumnProfile {
            name: name.to_string(),
            kind,
            max_len,
            saw_missing,
            non_missing: if max_len > 0 { 1 } else { 0 },
        }
    }

    #[test]
    fn sql_type_round_trips_through_tokens() {
        for token in ["integer", "decimal(18,4)", "timestamp", "varchar(100)", "text"] {
            let ty = SqlType::from_str(token).expect("parse");
            assert_eq!(ty.as_token(), token);
        }
        assert!(SqlType::from_str("blob").is_err());
        assert!(SqlType::from_str("decimal(4,8)").is_err());
    }

    #[test]
    fn widths_round_up_to_buckets() {
        let config = LoaderConfig::default();
        assert_eq!(size_text_column(12, &config), SqlType::Varchar(50));
        assert_eq!(size_text_column(51, &config), SqlType::Varchar(100));
        assert_eq!(size_text_column(300, &config), SqlType::Varchar(500));
        assert_eq!(size_text_column(600, &config), SqlType::Varchar(1000));
        assert_eq!(size_text_column(1500, &config), SqlType::Varchar(1600));
        assert_eq!(size_text_column(0, &config), SqlType::Varchar(50));
    }

    #[test]
    fn large_object_threshold_switches_to_text() {
        let config = LoaderConfig::default();
        assert_eq!(size_text_column(4_000, &config), SqlType::Text);
        assert_eq!(size_text_column(9_999, &config), SqlType::Text);
    }

    #[test]
    fn not_null_requires_config_and_clean_observation() {
        let mut config = LoaderConfig::default();
        config.ddl.not_null_columns = vec!["id".to_string()];
        let profiles = vec![
            profile("id", SemanticKind::Integer, 3, false),
            profile("name", SemanticKind::Text, 8, false),
            profile("code", SemanticKind::Text, 4, true),
        ];
        let schema = build_table_schema("t", &profiles, &config).expect("schema");
        assert!(!schema.columns[0].nullable, "configured and clean");
        assert!(schema.columns[1].nullable, "not configured");

        config.ddl.not_null_columns.push("code".to_string());
        let schema = build_table_schema("t", &profiles, &config).expect("schema");
        assert!(schema.columns[2].nullable, "missing values win over config");
    }

    #[test]
    fn overrides_replace_inference_outright() {
        let raw = r#"
tables:
  t:
    columns:
      amount:
        datatype: decimal(10,2)
      notes:
        max_length: 5000
"#;
        let config: LoaderConfig = serde_yaml::from_str(raw).expect("config");
        let profiles = vec![
            profile("amount", SemanticKind::Text, 12, false),
            profile("notes", SemanticKind::Text, 20, false),
        ];
        let schema = build_table_schema("t", &profiles, &config).expect("schema");
        assert_eq!(
            schema.columns[0].sql_type,
            SqlType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert!(schema.columns[0].overridden);
        // Length override past the threshold promotes to TEXT.
        assert_eq!(schema.columns[1].sql_type, SqlType::Text);
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let config = LoaderConfig::default();
        let profiles = vec![
            profile("a", SemanticKind::Text, 1, false),
            profile("a", SemanticKind::Text, 1, false),
        ];
        assert!(build_table_schema("t", &profiles, &config).is_err());
    }

    #[test]
    fn table_names_derive_deterministically() {
        assert_eq!(derive_table_name(Path::new("orders.csv")), "orders");
        assert_eq!(
            derive_table_name(Path::new("/data/daily-sales_0001.psv")),
            "daily_sales"
        );
        assert_eq!(derive_table_name(Path::new("2024_export.json")), "t_2024_export");
    }
}
