pub mod batch;
pub mod cli;
pub mod config;
pub mod data;
pub mod db;
pub mod ddl;
pub mod error;
pub mod ingest;
pub mod load;
pub mod notify;
pub mod profile;
pub mod recorder;
pub mod relocate;
pub mod schema;
pub mod upsert;
pub mod writer;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sql_loader", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Load(args) => load::execute(&args),
        Commands::Batch(args) => batch::execute(&args),
        Commands::Probe(args) => load::probe(&args),
    }
}
