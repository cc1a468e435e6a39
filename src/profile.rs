//! Type profiler: per-column semantic classification over a materialized
//! record set.
//!
//! A column is classified as a kind only when **every** non-missing value
//! satisfies that kind. Precedence is integer, then decimal, then datetime,
//! then the text fallback. The precedence is expressed as a candidate struct
//! whose flags are only ever knocked down, so the decision is auditable in
//! isolation from the scan.

use rust_decimal::Decimal;

use crate::{data::is_datetime, ingest::Dataset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticKind {
    Integer,
    Decimal,
    DateTime,
    Text,
}

/// Observed facts about one source column, discarded after the DDL decision.
#[derive(Debug, Clone)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: SemanticKind,
    /// Maximum observed UTF-8 byte length, used for text sizing.
    pub max_len: usize,
    /// True when any empty, whitespace-only, or absent value was seen.
    pub saw_missing: bool,
    pub non_missing: usize,
}

#[derive(Debug, Clone)]
struct KindCandidate {
    possible_integer: bool,
    possible_decimal: bool,
    possible_datetime: bool,
}

impl KindCandidate {
    fn new() -> Self {
        Self {
            possible_integer: true,
            possible_decimal: true,
            possible_datetime: true,
        }
    }

    fn observe(&mut self, value: &str) {
        if self.possible_integer && value.parse::<i64>().is_err() {
            self.possible_integer = false;
        }
        if self.possible_decimal && value.parse::<Decimal>().is_err() {
            self.possible_decimal = false;
        }
        if self.possible_datetime && !is_datetime(value) {
            self.possible_datetime = false;
        }
    }

    fn decide(&self, non_missing: usize) -> SemanticKind {
        // No evidence at all falls back to text regardless of the flags.
        if non_missing == 0 {
            return SemanticKind::Text;
        }
        if self.possible_integer {
            SemanticKind::Integer
        } else if self.possible_decimal {
            SemanticKind::Decimal
        } else if self.possible_datetime {
            SemanticKind::DateTime
        } else {
            SemanticKind::Text
        }
    }
}

/// Profiles every column of the dataset. Rows shorter than the header are
/// treated as having missing trailing cells; surplus cells in long rows are
/// ignored here and rejected later at write time.
pub fn profile_columns(dataset: &Dataset) -> Vec<ColumnProfile> {
    let width = dataset.headers.len();
    let mut candidates = vec![KindCandidate::new(); width];
    let mut max_lens = vec![0usize; width];
    let mut saw_missing = vec![false; width];
    let mut non_missing = vec![0usize; width];

    for row in &dataset.rows {
        for idx in 0..width {
            match row.get(idx).and_then(|cell| cell.as_deref()) {
                Some(value) if !value.trim().is_empty() => {
                    candidates[idx].observe(value);
                    max_lens[idx] = max_lens[idx].max(value.len());
                    non_missing[idx] += 1;
                }
                _ => saw_missing[idx] = true,
            }
        }
    }

    dataset
        .headers
        .iter()
        .enumerate()
        .map(|(idx, name)| ColumnProfile {
            name: name.clone(),
            kind: candidates[idx].decide(non_missing[idx]),
            max_len: max_lens[idx],
            saw_missing: saw_missing[idx],
            non_missing: non_missing[idx],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(headers: &[&str], rows: &[&[Option<&str>]]) -> Dataset {
        Dataset {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|c| c.map(|v| v.to_string())).collect())
                .collect(),
        }
    }

    #[test]
    fn integer_wins_over_decimal_when_all_values_parse() {
        let ds = dataset(&["n"], &[&[Some("1")], &[Some("-42")], &[Some("7")]]);
        let profiles = profile_columns(&ds);
        assert_eq!(profiles[0].kind, SemanticKind::Integer);
    }

    #[test]
    fn one_fractional_value_demotes_to_decimal() {
        let ds = dataset(&["n"], &[&[Some("1")], &[Some("2.5")]]);
        assert_eq!(profile_columns(&ds)[0].kind, SemanticKind::Decimal);
    }

    #[test]
    fn uniform_datetimes_classify_as_datetime() {
        let ds = dataset(
            &["d"],
            &[&[Some("2024-01-01")], &[Some("2024-06-30 08:00:00")]],
        );
        assert_eq!(profile_columns(&ds)[0].kind, SemanticKind::DateTime);
    }

    #[test]
    fn mixed_values_fall_back_to_text() {
        let ds = dataset(&["v"], &[&[Some("12")], &[Some("twelve")]]);
        assert_eq!(profile_columns(&ds)[0].kind, SemanticKind::Text);
    }

    #[test]
    fn missing_values_do_not_break_classification_but_mark_nullability() {
        let ds = dataset(&["n"], &[&[Some("1")], &[None], &[Some("")], &[Some("3")]]);
        let profile = &profile_columns(&ds)[0];
        assert_eq!(profile.kind, SemanticKind::Integer);
        assert!(profile.saw_missing);
        assert_eq!(profile.non_missing, 2);
    }

    #[test]
    fn empty_column_defaults_to_text() {
        let ds = dataset(&["v"], &[&[None], &[Some(" ")]]);
        let profile = &profile_columns(&ds)[0];
        assert_eq!(profile.kind, SemanticKind::Text);
        assert_eq!(profile.max_len, 0);
        assert!(profile.saw_missing);
    }

    #[test]
    fn max_len_tracks_utf8_bytes() {
        let ds = dataset(&["v"], &[&[Some("héllo")], &[Some("ok")]]);
        assert_eq!(profile_columns(&ds)[0].max_len, "héllo".len());
    }

    #[test]
    fn short_rows_count_as_missing_cells() {
        let ds = dataset(&["a", "b"], &[&[Some("1")], &[Some("2"), Some("x")]]);
        let profiles = profile_columns(&ds);
        assert!(profiles[1].saw_missing);
        assert_eq!(profiles[1].non_missing, 1);
    }
}
