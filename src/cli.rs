use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{ddl::TableMode, writer::TransactionMode};

#[derive(Debug, Parser)]
#[command(author, version, about = "Load delimited and JSON files into SQL tables", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load a single CSV, PSV, or JSON file into a table
    Load(LoadArgs),
    /// Load every eligible file in a directory as one resumable batch
    Batch(BatchArgs),
    /// Infer the table schema for a file and print the CREATE TABLE statement
    Probe(ProbeArgs),
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Input file to load
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Loader configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Database path, overriding the configuration
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Target table name (derived from the file name if omitted)
    #[arg(short, long)]
    pub table: Option<String>,
    /// Table handling when the target exists
    #[arg(long = "table-mode", value_enum)]
    pub table_mode: Option<TableMode>,
    /// Transaction strategy for row-level failures
    #[arg(long = "transaction-mode", value_enum)]
    pub transaction_mode: Option<TransactionMode>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Directory holding the files to load
    #[arg(short = 'd', long = "directory")]
    pub directory: PathBuf,
    /// Loader configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Database path, overriding the configuration
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Start a fresh batch even when an incomplete one could be resumed
    #[arg(long = "no-resume")]
    pub no_resume: bool,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Input file to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Loader configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Table name to use in the printed DDL
    #[arg(short, long)]
    pub table: Option<String>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}
