//! Error taxonomy for the load engine.
//!
//! Severity classes map to how far an error propagates:
//!
//! - **Config**: invalid mode combination or missing required setting.
//!   Fatal before any file is touched.
//! - **File**: unreadable input, undetectable format, or a table-mode
//!   conflict. Aborts that file only; a batch keeps going.
//! - **Storage**: connectivity or persistence failure in the target store.
//!   Fatal to the current file and usually the whole batch.
//!
//! Row-level problems are not `Err` values at all; they travel as
//! [`crate::data::RowError`] records so the transactional writer can apply
//! its threshold logic.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("file error for {path:?}: {message}")]
    File { path: PathBuf, message: String },
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl LoadError {
    pub fn config(message: impl Into<String>) -> Self {
        LoadError::Config(message.into())
    }

    pub fn file(path: &Path, message: impl Into<String>) -> Self {
        LoadError::File {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// File-level errors are contained; everything else aborts the batch.
    pub fn aborts_batch(&self) -> bool {
        !matches!(self, LoadError::File { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_errors_do_not_abort_the_batch() {
        let err = LoadError::file(Path::new("a.csv"), "unreadable");
        assert!(!err.aborts_batch());
        assert!(LoadError::config("bad mode").aborts_batch());
    }
}
