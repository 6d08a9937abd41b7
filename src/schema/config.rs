//! Configuration types for the repair program and the tabu search.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level repair configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Program under repair.
    pub program: ProgramConfig,
    /// Search settings.
    #[serde(default)]
    pub search: SearchConfig,
}

/// Program under repair: where it lives and how it is tested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramConfig {
    /// Root directory of the project. Copied once per variant slot.
    pub project_path: PathBuf,
    /// JSON [`TargetFile`] (relative to `project_path`) supplying
    /// `target_files` and `test_command`. See [`ProgramConfig::resolved`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_config: Option<PathBuf>,
    /// Files (relative to `project_path`) that edits may touch.
    #[serde(default)]
    pub target_files: Vec<PathBuf>,
    /// Shell command run in the variant directory.
    #[serde(default)]
    pub test_command: String,
    /// Edit granularity.
    #[serde(default)]
    pub granularity: Granularity,
    /// Strategy turning test output into fitness.
    #[serde(default)]
    pub classifier: ClassifierKind,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            project_path: PathBuf::from("repairs"),
            target_config: None,
            target_files: vec![PathBuf::from("QuixBugs/python_programs/gcd.py")],
            test_command: "pytest -s QuixBugs/python_testcases/test_gcd.py".to_string(),
            granularity: Granularity::default(),
            classifier: ClassifierKind::default(),
        }
    }
}

/// Target description stored as JSON next to a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetFile {
    pub target_files: Vec<PathBuf>,
    pub test_command: String,
}

impl ProgramConfig {
    /// Load target files and test command from a JSON file relative to `project_path`.
    pub fn from_target_file<P: AsRef<Path>, Q: AsRef<Path>>(
        project_path: P,
        config_file: Q,
    ) -> Result<Self, ConfigError> {
        Self {
            project_path: project_path.as_ref().to_path_buf(),
            target_config: Some(config_file.as_ref().to_path_buf()),
            target_files: Vec::new(),
            test_command: String::new(),
            granularity: Granularity::default(),
            classifier: ClassifierKind::default(),
        }
        .resolved()
    }

    /// Copy of this configuration with `target_config` loaded.
    ///
    /// The file's `target_files` and `test_command` replace the inline ones.
    /// Without a `target_config` this is a plain clone.
    pub fn resolved(&self) -> Result<Self, ConfigError> {
        let Some(config_file) = &self.target_config else {
            return Ok(self.clone());
        };

        let path = self.project_path.join(config_file);
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let target: TargetFile = serde_json::from_str(&content)?;

        Ok(Self {
            project_path: self.project_path.clone(),
            target_config: None,
            target_files: target.target_files,
            test_command: target.test_command,
            granularity: self.granularity,
            classifier: self.classifier,
        })
    }

    /// Validate program configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.test_command.trim().is_empty() {
            return Err(ConfigError::MissingTestCommand);
        }
        if self.target_files.is_empty() {
            return Err(ConfigError::NoTargetFiles);
        }
        Ok(())
    }
}

/// Unit of source that a single edit manipulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One physical line.
    Line,
    /// One logical statement (may span several lines).
    #[default]
    Statement,
}

/// Fitness classification strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Parse the pytest-style `N failed, M passed` summary line.
    #[default]
    PytestSummary,
    /// Use only the process exit code.
    ExitCode,
}

/// Kind of edit appended to a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOperator {
    /// Overwrite a unit with a copy of another unit.
    Replacement,
    /// Insert a copy of a unit before another unit.
    Insertion,
    /// Remove a unit.
    Deletion,
}

impl EditOperator {
    /// All operators, in canonical order.
    pub const ALL: [EditOperator; 3] = [
        EditOperator::Replacement,
        EditOperator::Insertion,
        EditOperator::Deletion,
    ];
}

/// How the program picks the site of a new edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// Uniform over editable units.
    Random,
    /// Proportional to per-unit weights held by the program.
    #[default]
    Weighted,
}

/// Tabu search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Evaluations of the unmodified program used for the baseline fitness.
    #[serde(default = "default_warmup_reps")]
    pub warmup_reps: usize,
    /// Number of independent restarts.
    #[serde(default = "default_epoch")]
    pub epoch: usize,
    /// Candidate evaluations per epoch.
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Wall-clock bound per evaluation, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    /// Operators the neighbour generator draws from.
    #[serde(default = "default_operators")]
    pub operators: Vec<EditOperator>,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Run epochs concurrently on the rayon pool.
    #[serde(default)]
    pub parallel_epochs: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            warmup_reps: default_warmup_reps(),
            epoch: default_epoch(),
            max_iter: default_max_iter(),
            timeout_secs: default_timeout_secs(),
            operators: default_operators(),
            random_seed: None,
            parallel_epochs: false,
        }
    }
}

fn default_warmup_reps() -> usize {
    1
}
fn default_epoch() -> usize {
    10
}
fn default_max_iter() -> usize {
    100
}
fn default_timeout_secs() -> f64 {
    10.0
}
fn default_operators() -> Vec<EditOperator> {
    EditOperator::ALL.to_vec()
}

impl SearchConfig {
    /// Per-evaluation timeout as a `Duration`.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.timeout_secs)
    }

    /// Validate search parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epoch == 0 {
            return Err(ConfigError::InvalidEpoch);
        }
        if self.max_iter == 0 {
            return Err(ConfigError::InvalidMaxIter);
        }
        if !(self.timeout_secs.is_finite() && self.timeout_secs > 0.0) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }
        if self.operators.is_empty() {
            return Err(ConfigError::NoOperators);
        }
        let mut seen = HashSet::new();
        for op in &self.operators {
            if !seen.insert(op) {
                return Err(ConfigError::DuplicateOperator(*op));
            }
        }
        Ok(())
    }
}

impl RepairConfig {
    /// Copy of this configuration with the program's `target_config` loaded.
    pub fn resolved(&self) -> Result<Self, ConfigError> {
        Ok(Self {
            program: self.program.resolved()?,
            search: self.search.clone(),
        })
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.program.validate()?;
        self.search.validate()
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Test command must not be empty")]
    MissingTestCommand,
    #[error("At least one target file is required")]
    NoTargetFiles,
    #[error("Epoch count must be at least 1")]
    InvalidEpoch,
    #[error("Iterations per epoch must be at least 1")]
    InvalidMaxIter,
    #[error("Timeout must be a positive number of seconds, got {0}")]
    InvalidTimeout(f64),
    #[error("Operator set must not be empty")]
    NoOperators,
    #[error("Operator {0:?} listed more than once")]
    DuplicateOperator(EditOperator),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
