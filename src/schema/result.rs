//! Evaluation and epoch result types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fitness assigned to candidates that break compilation or execution.
///
/// Pinned above the valid `[0, 1]` range.
pub const INVALID_FITNESS: f64 = 2.0;

/// Outcome category of a single patch evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Every test passed.
    Success,
    /// Tests ran and some failed.
    Failing { failed: u64, total: u64 },
    /// The variant failed to build or run.
    Invalid,
    /// The test command exceeded its time budget.
    Timeout,
    /// The test output did not match the expected summary grammar.
    ParseError,
}

impl Status {
    /// Whether this outcome may compete for the best patch.
    #[inline]
    pub fn is_comparable(&self) -> bool {
        !matches!(self, Status::Invalid | Status::Timeout)
    }

    /// Whether this outcome counts towards the invalid-patch tally.
    #[inline]
    pub fn is_invalid(&self) -> bool {
        !self.is_comparable()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "SUCCESS"),
            Status::Failing { failed, total } => write!(f, "FAILING({failed}/{total})"),
            Status::Invalid => write!(f, "INVALID"),
            Status::Timeout => write!(f, "TIMEOUT"),
            Status::ParseError => write!(f, "PARSE_ERROR"),
        }
    }
}

/// Result of running the test command against one variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub status: Status,
    /// Lower is better; `None` when the run produced no comparable score.
    pub fitness: Option<f64>,
    pub stdout: String,
    pub stderr: String,
    /// Exit code, absent when the process was killed by a signal.
    pub return_code: Option<i32>,
    pub elapsed_seconds: f64,
}

impl EvaluationResult {
    /// Result for a run killed after exceeding its time budget.
    pub fn timeout(stdout: String, stderr: String, elapsed_seconds: f64) -> Self {
        Self {
            status: Status::Timeout,
            fitness: None,
            stdout,
            stderr,
            return_code: None,
            elapsed_seconds,
        }
    }

    /// Result for a variant that could not be materialized or launched.
    pub fn invalid(reason: String) -> Self {
        Self {
            status: Status::Invalid,
            fitness: Some(INVALID_FITNESS),
            stdout: String::new(),
            stderr: reason,
            return_code: None,
            elapsed_seconds: 0.0,
        }
    }
}

/// Outcome of one search epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochResult {
    /// One-based epoch number.
    pub epoch: usize,
    /// Whether a zero-fitness candidate was found.
    pub success: bool,
    /// Evaluations performed when the epoch ended.
    pub fitness_evaluations: usize,
    /// Candidates that were invalid or timed out.
    pub invalid_patch_count: usize,
    pub best_fitness: Option<f64>,
    /// Human-readable edits of the best patch.
    pub best_patch: Vec<String>,
    /// Unified diff of the best patch against the original program.
    pub diff: String,
    pub elapsed_seconds: f64,
}

/// Current phase of the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchPhase {
    /// Measuring the unmodified program.
    #[default]
    Warmup,
    /// Evaluating candidates.
    Searching,
    /// An epoch just finished.
    EpochComplete,
}

/// Snapshot passed to progress callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProgress {
    pub phase: SearchPhase,
    pub epoch: usize,
    pub total_epochs: usize,
    pub iteration: usize,
    pub max_iter: usize,
    pub status: Option<Status>,
    pub fitness: Option<f64>,
    pub best_fitness: Option<f64>,
    pub patch_len: usize,
    pub improved: bool,
}
