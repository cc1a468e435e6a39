//! Typed SQL values, datetime parsing, and row/cell conversion.
//!
//! Conversion failures are data, not errors: a bad cell becomes a
//! [`RowError`] so the transactional writer can count it against the active
//! threshold instead of unwinding.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqliteValue};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::schema::{ColumnSpec, SqlType};

/// Accepted datetime patterns, attempted in order. Slash-separated day-first
/// dates are deliberately absent: they are indistinguishable from the US
/// pattern for days <= 12 and would misclassify silently.
pub const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
];
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y"];

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Decimal(Decimal),
    DateTime(NaiveDateTime),
    Text(String),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlValue::Null => Ok(ToSqlOutput::Owned(SqliteValue::Null)),
            SqlValue::Integer(i) => Ok(ToSqlOutput::Owned(SqliteValue::Integer(*i))),
            // Stored as text so the declared DECIMAL column keeps exact digits.
            SqlValue::Decimal(d) => Ok(ToSqlOutput::Owned(SqliteValue::Text(d.to_string()))),
            SqlValue::DateTime(dt) => dt.to_sql(),
            SqlValue::Text(s) => Ok(ToSqlOutput::Owned(SqliteValue::Text(s.clone()))),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, ""),
            SqlValue::Integer(i) => write!(f, "{i}"),
            SqlValue::Decimal(d) => write!(f, "{d}"),
            SqlValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            SqlValue::Text(s) => write!(f, "{s}"),
        }
    }
}

pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(parsed);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return parsed.and_hms_opt(0, 0, 0);
        }
    }
    None
}

pub fn is_datetime(value: &str) -> bool {
    parse_datetime(value).is_some()
}

/// Category of a row-level failure, carried into the error sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    TypeConversion,
    WidthOverflow,
    NullViolation,
    FieldCountMismatch,
    MissingKey,
    Constraint,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::TypeConversion => "type_conversion",
            ErrorCategory::WidthOverflow => "width_overflow",
            ErrorCategory::NullViolation => "null_violation",
            ErrorCategory::FieldCountMismatch => "field_count_mismatch",
            ErrorCategory::MissingKey => "missing_key",
            ErrorCategory::Constraint => "constraint",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row-level failure. `row` is the 0-based position in the source file.
#[derive(Debug, Clone)]
pub struct RowError {
    pub row: usize,
    pub column: String,
    pub category: ErrorCategory,
    pub message: String,
}

impl RowError {
    pub fn new(
        row: usize,
        column: impl Into<String>,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row,
            column: column.into(),
            category,
            message: message.into(),
        }
    }
}

/// Converts one raw cell against its column spec. `None` means the source
/// cell was empty or absent.
pub fn convert_cell(
    raw: Option<&str>,
    spec: &ColumnSpec,
    row: usize,
) -> Result<SqlValue, RowError> {
    let value = match raw {
        Some(v) if !v.trim().is_empty() => v,
        _ => {
            if spec.nullable {
                return Ok(SqlValue::Null);
            }
            return Err(RowError::new(
                row,
                &spec.name,
                ErrorCategory::NullViolation,
                format!("column '{}' is NOT NULL but the value is missing", spec.name),
            ));
        }
    };

    match &spec.sql_type {
        SqlType::Integer => value.parse::<i64>().map(SqlValue::Integer).map_err(|_| {
            RowError::new(
                row,
                &spec.name,
                ErrorCategory::TypeConversion,
                format!("'{value}' is not an integer"),
            )
        }),
        SqlType::Decimal { .. } => value
            .parse::<Decimal>()
            .map(SqlValue::Decimal)
            .map_err(|_| {
                RowError::new(
                    row,
                    &spec.name,
                    ErrorCategory::TypeConversion,
                    format!("'{value}' is not a decimal"),
                )
            }),
        SqlType::Timestamp => parse_datetime(value).map(SqlValue::DateTime).ok_or_else(|| {
            RowError::new(
                row,
                &spec.name,
                ErrorCategory::TypeConversion,
                format!("'{value}' matches no accepted datetime pattern"),
            )
        }),
        SqlType::Varchar(width) => {
            if value.len() > *width as usize {
                Err(RowError::new(
                    row,
                    &spec.name,
                    ErrorCategory::WidthOverflow,
                    format!(
                        "value of {} byte(s) exceeds VARCHAR({}) for column '{}'",
                        value.len(),
                        width,
                        spec.name
                    ),
                ))
            } else {
                Ok(SqlValue::Text(value.to_string()))
            }
        }
        SqlType::Text => Ok(SqlValue::Text(value.to_string())),
    }
}

/// Converts a full row, stopping at the first bad cell. A field count that
/// disagrees with the schema is itself a row-level error (schema mismatches
/// on append surface here rather than as a separate error class).
pub fn convert_row(
    row: &[Option<String>],
    columns: &[ColumnSpec],
    row_idx: usize,
) -> Result<Vec<SqlValue>, RowError> {
    if row.len() != columns.len() {
        return Err(RowError::new(
            row_idx,
            "",
            ErrorCategory::FieldCountMismatch,
            format!(
                "row has {} field(s), table expects {}",
                row.len(),
                columns.len()
            ),
        ));
    }
    row.iter()
        .zip(columns.iter())
        .map(|(cell, spec)| convert_cell(cell.as_deref(), spec, row_idx))
        .collect()
}
