//! File format detection and dataset materialization.
//!
//! The load engine works from a fully materialized record set per file (no
//! streaming inference), so this module reads the whole input into a
//! [`Dataset`]. Detection prefers the file extension, falling back to content
//! sniffing: a JSON-looking first byte that parses wins, then consistent pipe
//! counts over the leading lines, then consistent comma counts.

use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};

use encoding_rs::{Encoding, UTF_8};
use log::debug;
use serde_json::Value as JsonValue;

use crate::error::LoadError;

const SNIFF_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Psv,
    Json,
}

impl FileFormat {
    pub fn delimiter(&self) -> Option<u8> {
        match self {
            FileFormat::Csv => Some(b','),
            FileFormat::Psv => Some(b'|'),
            FileFormat::Json => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Psv => "psv",
            FileFormat::Json => "json",
        }
    }
}

/// Materialized records for one file. `None` cells are empty or absent in the
/// source. Rows keep their raw arity; arity mismatches are judged at write
/// time, not here.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Dataset {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding, LoadError> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| LoadError::config(format!("unknown encoding '{value}'")))
    } else {
        Ok(UTF_8)
    }
}

pub fn detect_format(path: &Path) -> Result<FileFormat, LoadError> {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => return Ok(FileFormat::Csv),
            "psv" => return Ok(FileFormat::Psv),
            "json" => return Ok(FileFormat::Json),
            _ => {}
        }
    }
    sniff_format(path)
}

fn sniff_format(path: &Path) -> Result<FileFormat, LoadError> {
    let file = File::open(path)
        .map_err(|err| LoadError::file(path, format!("cannot open file: {err}")))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines().take(SNIFF_LINES) {
        let line = line.map_err(|err| LoadError::file(path, format!("cannot read file: {err}")))?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    if lines.is_empty() {
        return Err(LoadError::file(path, "file is empty"));
    }

    let first = lines[0].trim_start();
    if (first.starts_with('[') || first.starts_with('{')) && full_json_parse(path).is_ok() {
        return Ok(FileFormat::Json);
    }

    let pipe_counts: Vec<usize> = lines.iter().map(|l| l.matches('|').count()).collect();
    if pipe_counts[0] > 0 && pipe_counts.iter().all(|c| *c == pipe_counts[0]) {
        debug!("Sniffed pipe-separated content in {path:?}");
        return Ok(FileFormat::Psv);
    }
    let comma_counts: Vec<usize> = lines.iter().map(|l| l.matches(',').count()).collect();
    if comma_counts[0] > 0 && comma_counts.iter().all(|c| *c == comma_counts[0]) {
        debug!("Sniffed comma-separated content in {path:?}");
        return Ok(FileFormat::Csv);
    }

    Err(LoadError::file(path, "could not determine file format"))
}

fn full_json_parse(path: &Path) -> Result<JsonValue, ()> {
    let file = File::open(path).map_err(|_| ())?;
    serde_json::from_reader(BufReader::new(file)).map_err(|_| ())
}

pub fn read_dataset(
    path: &Path,
    format: FileFormat,
    encoding: &'static Encoding,
) -> Result<Dataset, LoadError> {
    match format {
        FileFormat::Csv | FileFormat::Psv => read_delimited(
            path,
            format.delimiter().expect("delimited format"),
            encoding,
        ),
        FileFormat::Json => read_json(path),
    }
}

fn read_delimited(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<Dataset, LoadError> {
    let file = File::open(path)
        .map_err(|err| LoadError::file(path, format!("cannot open file: {err}")))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        // Ragged rows are kept and rejected per-row at write time.
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers = reader
        .byte_headers()
        .map_err(|err| LoadError::file(path, format!("cannot read header row: {err}")))?
        .clone();
    let headers = decode_record_fields(&headers, encoding, path)?;
    if headers.is_empty() {
        return Err(LoadError::file(path, "header row is empty"));
    }

    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(true) => {
                let cells = decode_record_fields(&record, encoding, path)?
                    .into_iter()
                    .map(|field| if field.trim().is_empty() { None } else { Some(field) })
                    .collect();
                rows.push(cells);
            }
            Ok(false) => break,
            Err(err) => {
                return Err(LoadError::file(
                    path,
                    format!("cannot read record {}: {err}", rows.len() + 2),
                ));
            }
        }
    }
    Ok(Dataset { headers, rows })
}

fn decode_record_fields(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
    path: &Path,
) -> Result<Vec<String>, LoadError> {
    record
        .iter()
        .map(|field| {
            let (text, _, had_errors) = encoding.decode(field);
            if had_errors {
                Err(LoadError::file(
                    path,
                    format!("failed to decode text as {}", encoding.name()),
                ))
            } else {
                Ok(text.into_owned())
            }
        })
        .collect()
}

/// Reads a JSON array of objects. Column order is first-appearance order
/// across records; records missing a key contribute `None`.
fn read_json(path: &Path) -> Result<Dataset, LoadError> {
    let mut raw = String::new();
    File::open(path)
        .and_then(|mut file| file.read_to_string(&mut raw))
        .map_err(|err| LoadError::file(path, format!("cannot read file: {err}")))?;
    let value: JsonValue = serde_json::from_str(&raw)
        .map_err(|err| LoadError::file(path, format!("invalid JSON: {err}")))?;

    let records = match value {
        JsonValue::Array(items) => items,
        _ => {
            return Err(LoadError::file(
                path,
                "JSON input must be an array of objects",
            ));
        }
    };

    let mut headers: Vec<String> = Vec::new();
    for record in &records {
        let object = record.as_object().ok_or_else(|| {
            LoadError::file(path, "JSON input must be an array of objects")
        })?;
        for key in object.keys() {
            if !headers.iter().any(|h| h == key) {
                headers.push(key.clone());
            }
        }
    }
    if headers.is_empty() {
        return Err(LoadError::file(path, "JSON input has no columns"));
    }

    let rows = records
        .iter()
        .map(|record| {
            let object = record.as_object().expect("validated above");
            headers
                .iter()
                .map(|key| match object.get(key) {
                    None | Some(JsonValue::Null) => None,
                    Some(JsonValue::String(s)) => {
                        if s.trim().is_empty() {
                            None
                        } else {
                            Some(s.clone())
                        }
                    }
                    Some(other) => Some(other.to_string()),
                })
                .collect()
        })
        .collect();

    Ok(Dataset { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).expect("create file");
        file.write_all(contents.as_bytes()).expect("write file");
        path
    }

    #[test]
    fn extension_beats_sniffing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "data.psv", "a,b\n1,2\n");
        assert_eq!(detect_format(&path).unwrap(), FileFormat::Psv);
    }

    #[test]
    fn sniffs_pipe_and_comma_content() {
        let dir = tempfile::tempdir().unwrap();
        let psv = write_file(&dir, "pipes.dat", "a|b|c\n1|2|3\n4|5|6\n");
        assert_eq!(detect_format(&psv).unwrap(), FileFormat::Psv);
        let csv = write_file(&dir, "commas.dat", "a,b,c\n1,2,3\n");
        assert_eq!(detect_format(&csv).unwrap(), FileFormat::Csv);
    }

    #[test]
    fn sniffs_json_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "rows.dat", "[{\"a\": 1}, {\"a\": 2}]\n");
        assert_eq!(detect_format(&path).unwrap(), FileFormat::Json);
    }

    #[test]
    fn inconsistent_content_is_a_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "noise.dat", "just some text\nwith no structure\n");
        assert!(matches!(
            detect_format(&path),
            Err(LoadError::File { .. })
        ));
    }

    #[test]
    fn delimited_read_maps_empty_cells_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "data.csv", "id,name\n1,Ada\n2,\n");
        let ds = read_dataset(&path, FileFormat::Csv, UTF_8).unwrap();
        assert_eq!(ds.headers, vec!["id", "name"]);
        assert_eq!(ds.rows[1], vec![Some("2".to_string()), None]);
    }

    #[test]
    fn ragged_rows_are_kept_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "data.csv", "a,b\n1,2\n1,2,3\n");
        let ds = read_dataset(&path, FileFormat::Csv, UTF_8).unwrap();
        assert_eq!(ds.rows[1].len(), 3);
    }

    #[test]
    fn json_column_order_is_first_appearance() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "data.json",
            r#"[{"id": 1, "name": "A"}, {"name": "B", "extra": true}]"#,
        );
        let ds = read_dataset(&path, FileFormat::Json, UTF_8).unwrap();
        assert_eq!(ds.headers, vec!["id", "name", "extra"]);
        assert_eq!(
            ds.rows[1],
            vec![None, Some("B".to_string()), Some("true".to_string())]
        );
    }

    #[test]
    fn json_scalar_root_is_a_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "data.json", "42");
        assert!(read_dataset(&path, FileFormat::Json, UTF_8).is_err());
    }
}
