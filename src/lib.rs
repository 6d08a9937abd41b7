//! Tabu Repair - Automated program repair by tabu search.
//!
//! This crate searches for a small patch that makes a failing program pass
//! its test suite. Candidate patches are mutated one edit at a time, the
//! test command is run against each variant and its summary line is turned
//! into a fitness score (lower is better, 0 means every test passed).
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration, evaluation and epoch result types
//! - `repair`: Fitness classification, the program collaborator, tabu search and reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use tabu_repair::{RepairConfig, SourceProgram, TabuSearch};
//!
//! let config: RepairConfig = serde_json::from_str(r#"{
//!     "program": {
//!         "project_path": "repairs",
//!         "target_files": ["QuixBugs/python_programs/gcd.py"],
//!         "test_command": "pytest -s QuixBugs/python_testcases/test_gcd.py",
//!         "granularity": "line"
//!     },
//!     "search": { "epoch": 5, "max_iter": 100, "random_seed": 42 }
//! }"#).unwrap();
//!
//! let program = SourceProgram::new(&config.program).unwrap();
//! let mut search = TabuSearch::new(program, config.search).unwrap();
//! let report = search.run();
//!
//! println!("{} distinct repairs found", report.unique_repair_count());
//! search.finish().unwrap();
//! ```

pub mod repair;
pub mod schema;

// Re-export commonly used types
pub use repair::{Patch, Program, RepairReport, SourceProgram, TabuSearch};
pub use schema::{EpochResult, EvaluationResult, RepairConfig, SearchConfig, Status};
