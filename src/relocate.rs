//! File relocation collaborator.
//!
//! The load engine only signals an outcome; the move itself belongs to the
//! relocator implementation. [`SubdirRelocator`] mirrors the conventional
//! layout of sibling `processed/` and `error/` directories next to the
//! source file. A failed move never changes a recorded job status.

use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Processed,
    Error,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Processed => "processed",
            Destination::Error => "error",
        }
    }
}

pub trait FileRelocator {
    fn relocate(&self, path: &Path, destination: Destination) -> Result<PathBuf>;
}

/// Moves files into `processed/` or `error/` beside the source file.
#[derive(Debug, Default)]
pub struct SubdirRelocator;

impl FileRelocator for SubdirRelocator {
    fn relocate(&self, path: &Path, destination: Destination) -> Result<PathBuf> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let target_dir = parent.join(destination.as_str());
        fs::create_dir_all(&target_dir)
            .with_context(|| format!("Creating {:?} directory", target_dir))?;
        let file_name = path
            .file_name()
            .with_context(|| format!("Source path {path:?} has no file name"))?;
        let target = target_dir.join(file_name);
        fs::rename(path, &target)
            .with_context(|| format!("Moving {path:?} to {target:?}"))?;
        info!("Moved {path:?} to {}", destination.as_str());
        Ok(target)
    }
}

/// Leaves files in place. Used when relocation is disabled and for probing.
#[derive(Debug, Default)]
pub struct NullRelocator;

impl FileRelocator for NullRelocator {
    fn relocate(&self, path: &Path, _destination: Destination) -> Result<PathBuf> {
        Ok(path.to_path_buf())
    }
}
