//! Tabu search for automated program repair.
//!
//! # Overview
//!
//! The repair system consists of:
//!
//! - **Fitness Classifiers** (`fitness`): Turn test-runner output into a status and fitness
//! - **Patches** (`patch`): Edit sequences and the seedable random source
//! - **Programs** (`program`, `source`, `runner`): Materialize variants and run their tests
//! - **Search** (`search`): Tabu search with per-epoch restarts
//! - **Reports** (`report`): Aggregation of epoch results
//! - **Driver** (`driver`): Config-to-report run used by the binary
//!
//! # Example
//!
//! ```rust,no_run
//! use tabu_repair::repair::{SourceProgram, TabuSearch};
//! use tabu_repair::schema::{ProgramConfig, SearchConfig};
//!
//! let program = SourceProgram::new(&ProgramConfig::default()).unwrap();
//! let mut search = TabuSearch::new(program, SearchConfig::default()).unwrap();
//! let report = search.run_with_callback(|progress| {
//!     println!("Epoch {} iteration {}: {:?}", progress.epoch, progress.iteration, progress.fitness);
//! });
//!
//! println!("{report}");
//! search.finish().unwrap();
//! ```

mod driver;
mod fitness;
mod patch;
mod program;
mod report;
mod runner;
mod search;
mod source;

pub use driver::{RepairError, run_repair};
pub use fitness::{ExitCodeClassifier, FitnessClassifier, PytestSummaryClassifier, classifier_for};
pub use patch::{Patch, SearchRng};
pub use program::{Program, ProgramError, SourceProgram};
pub use report::RepairReport;
pub use runner::{CommandOutput, run_with_timeout};
pub use search::{
    MAX_NEIGHBOUR_ATTEMPTS, TabuSearch, TabuSet, get_neighbour, is_better_than_the_best,
    stopping_criterion,
};
pub use source::{SourceEdit, SourceFile, UnitRef};
