//! End-to-end repair run from a [`RepairConfig`].

use std::io;

use log::info;

use super::program::{ProgramError, SourceProgram};
use super::report::RepairReport;
use super::search::TabuSearch;
use crate::schema::{ConfigError, RepairConfig, SearchProgress};

/// Errors surfaced before or after the search itself.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Program setup failed: {0}")]
    Program(#[from] ProgramError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Resolve and validate `config`, search for repairs and clean up the
/// scratch variants.
pub fn run_repair<F>(config: &RepairConfig, callback: F) -> Result<RepairReport, RepairError>
where
    F: Fn(&SearchProgress) + Sync,
{
    let config = config.resolved()?;
    config.validate()?;

    let program = SourceProgram::new(&config.program)?;
    let mut search = TabuSearch::new(program, config.search.clone())?;
    info!(
        "Searching {} target file(s) with seed {}",
        config.program.target_files.len(),
        search.seed()
    );

    let report = search.run_with_callback(callback);
    search.finish()?;
    Ok(report)
}
