//! Program under repair.
//!
//! The search engine only sees the [`Program`] trait. [`SourceProgram`] is
//! the on-disk implementation: it copies the project into a scratch
//! directory, rewrites the target files for each patch and runs the test
//! command there.

use std::collections::HashSet;
use std::fmt::Debug;
use std::fs;
use std::hash::Hash;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rand::distributions::{Distribution, WeightedIndex};
use rand::prelude::*;
use tempfile::TempDir;
use walkdir::WalkDir;

use super::fitness::{FitnessClassifier, classifier_for};
use super::patch::Patch;
use super::runner::run_with_timeout;
use super::source::{SourceEdit, SourceFile, UnitRef};
use crate::schema::{ConfigError, EditOperator, EvaluationResult, ProgramConfig, SelectionMethod};

/// Collaborator contract consumed by the tabu search.
pub trait Program: Sync {
    /// A single edit; patches are sequences of these.
    type Edit: Clone + Eq + Hash + Debug + Send + Sync;

    /// Materialize `patch`, run the tests with a hard `timeout` and classify
    /// the outcome. Never fails: problems are reported through the status.
    fn evaluate_patch(&self, patch: &Patch<Self::Edit>, timeout: Duration) -> EvaluationResult;

    /// Unified diff of `patch` against the unmodified program.
    fn diff(&self, patch: &Patch<Self::Edit>) -> String;

    /// Create a new edit of kind `operator`. `None` if the program has
    /// nothing to edit.
    fn create_edit(
        &self,
        operator: EditOperator,
        method: SelectionMethod,
        rng: &mut StdRng,
    ) -> Option<Self::Edit>;

    /// Human-readable form of an edit.
    fn describe_edit(&self, edit: &Self::Edit) -> String {
        format!("{edit:?}")
    }

    /// Release temporary artifacts created during evaluation.
    fn remove_tmp_variant(&mut self) -> io::Result<()>;
}

/// Program setup errors.
#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to read target file {path}: {source}")]
    ReadTarget {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create scratch directory: {0}")]
    Scratch(#[source] io::Error),
    #[error("{0} is not a target file")]
    UnknownTarget(PathBuf),
    #[error("Expected {expected} weights for {path}, got {actual}")]
    WeightCount {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("Weights must be finite and non-negative")]
    InvalidWeight,
}

/// Target files of a project edited at line or statement granularity.
pub struct SourceProgram {
    project_path: PathBuf,
    test_command: String,
    files: Vec<SourceFile>,
    classifier: Box<dyn FitnessClassifier>,
    scratch: Option<TempDir>,
    /// Variant slots whose project copy already exists.
    ready_slots: Mutex<HashSet<usize>>,
}

impl SourceProgram {
    /// Read and split the target files described by `config`.
    pub fn new(config: &ProgramConfig) -> Result<Self, ProgramError> {
        config.validate()?;

        let files = config
            .target_files
            .iter()
            .map(|relative| {
                let path = config.project_path.join(relative);
                let text = fs::read_to_string(&path)
                    .map_err(|source| ProgramError::ReadTarget { path, source })?;
                Ok(SourceFile::parse(relative, &text, config.granularity))
            })
            .collect::<Result<Vec<_>, ProgramError>>()?;

        let scratch = tempfile::Builder::new()
            .prefix("tabu-repair-")
            .tempdir()
            .map_err(ProgramError::Scratch)?;

        Ok(Self {
            project_path: config.project_path.clone(),
            test_command: config.test_command.clone(),
            files,
            classifier: classifier_for(config.classifier),
            scratch: Some(scratch),
            ready_slots: Mutex::new(HashSet::new()),
        })
    }

    /// Replace the fitness classifier.
    pub fn with_classifier(mut self, classifier: Box<dyn FitnessClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Split target files.
    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    /// Set the edit-site weights of one target file.
    pub fn set_weights<P: AsRef<Path>>(
        &mut self,
        target: P,
        weights: Vec<f64>,
    ) -> Result<(), ProgramError> {
        let target = target.as_ref();
        let file = self
            .files
            .iter_mut()
            .find(|f| f.path() == target)
            .ok_or_else(|| ProgramError::UnknownTarget(target.to_path_buf()))?;

        if weights.len() != file.unit_count() {
            return Err(ProgramError::WeightCount {
                path: target.to_path_buf(),
                expected: file.unit_count(),
                actual: weights.len(),
            });
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ProgramError::InvalidWeight);
        }

        file.set_weights(weights);
        Ok(())
    }

    /// Contents of every target file with `patch` applied.
    pub fn render(&self, patch: &Patch<SourceEdit>) -> Vec<String> {
        self.files
            .iter()
            .enumerate()
            .map(|(index, file)| file.render(index, patch.edits()))
            .collect()
    }

    /// Directory holding the variant for the calling worker, copied from the
    /// project on first use.
    fn prepare_slot(&self) -> io::Result<PathBuf> {
        let scratch = self
            .scratch
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Scratch directory removed"))?;

        let slot = rayon::current_thread_index().map_or(0, |i| i + 1);
        let dir = scratch.path().join(format!("variant-{slot}"));

        let mut ready = self.ready_slots.lock().unwrap_or_else(|e| e.into_inner());
        if !ready.contains(&slot) {
            copy_dir(&self.project_path, &dir)?;
            ready.insert(slot);
        }
        Ok(dir)
    }

    fn write_variant(&self, dir: &Path, patch: &Patch<SourceEdit>) -> io::Result<()> {
        for (file, contents) in self.files.iter().zip(self.render(patch)) {
            let path = dir.join(file.path());
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, contents)?;
        }
        Ok(())
    }

    fn pick_target(&self, file: usize, method: SelectionMethod, rng: &mut StdRng) -> usize {
        let source = &self.files[file];
        let count = source.unit_count();
        match method {
            SelectionMethod::Random => rng.gen_range(0..count),
            SelectionMethod::Weighted => match WeightedIndex::new(source.weights()) {
                Ok(dist) => dist.sample(rng),
                // All-zero weights
                Err(_) => rng.gen_range(0..count),
            },
        }
    }
}

impl Program for SourceProgram {
    type Edit = SourceEdit;

    fn evaluate_patch(&self, patch: &Patch<SourceEdit>, timeout: Duration) -> EvaluationResult {
        let dir = match self.prepare_slot() {
            Ok(dir) => dir,
            Err(e) => return EvaluationResult::invalid(format!("Failed to prepare variant: {e}")),
        };
        if let Err(e) = self.write_variant(&dir, patch) {
            return EvaluationResult::invalid(format!("Failed to write variant: {e}"));
        }

        match run_with_timeout(&self.test_command, &dir, timeout) {
            Ok(out) if out.timed_out => {
                EvaluationResult::timeout(out.stdout, out.stderr, out.elapsed.as_secs_f64())
            }
            Ok(out) => self.classifier.classify(
                &out.stdout,
                out.return_code,
                &out.stderr,
                out.elapsed.as_secs_f64(),
            ),
            Err(e) => EvaluationResult::invalid(format!("Failed to run test command: {e}")),
        }
    }

    fn diff(&self, patch: &Patch<SourceEdit>) -> String {
        self.files
            .iter()
            .zip(self.render(patch))
            .map(|(file, modified)| file.diff(&modified))
            .collect()
    }

    fn create_edit(
        &self,
        operator: EditOperator,
        method: SelectionMethod,
        rng: &mut StdRng,
    ) -> Option<SourceEdit> {
        let editable: Vec<usize> = (0..self.files.len())
            .filter(|&i| self.files[i].unit_count() > 0)
            .collect();
        let file = *editable.choose(rng)?;

        let target = UnitRef {
            file,
            unit: self.pick_target(file, method, rng),
        };
        let ingredient = UnitRef {
            file,
            unit: rng.gen_range(0..self.files[file].unit_count()),
        };

        Some(match operator {
            EditOperator::Replacement => SourceEdit::Replacement { target, ingredient },
            EditOperator::Insertion => SourceEdit::Insertion { target, ingredient },
            EditOperator::Deletion => SourceEdit::Deletion { target },
        })
    }

    fn describe_edit(&self, edit: &SourceEdit) -> String {
        let loc = |r: &UnitRef| format!("{}:{}", self.files[r.file].path().display(), r.unit);
        match edit {
            SourceEdit::Replacement { target, ingredient } => {
                format!("Replacement({}, {})", loc(target), loc(ingredient))
            }
            SourceEdit::Insertion { target, ingredient } => {
                format!("Insertion({}, {})", loc(target), loc(ingredient))
            }
            SourceEdit::Deletion { target } => format!("Deletion({})", loc(target)),
        }
    }

    fn remove_tmp_variant(&mut self) -> io::Result<()> {
        self.ready_slots
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        match self.scratch.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

/// Recursively copy `from` into `to`.
///
/// Symlinks are recreated rather than followed. A link that stays inside
/// the project keeps its target; one that escapes it points at the
/// resolved original so it still works from the scratch directory.
fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    let root = fs::canonicalize(from)?;
    for entry in WalkDir::new(from) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            let link = match fs::canonicalize(entry.path()) {
                Ok(resolved) if link.is_relative() && !resolved.starts_with(&root) => resolved,
                Ok(resolved) if link.is_absolute() && resolved.starts_with(&root) => {
                    to.join(resolved.strip_prefix(&root).unwrap_or(&resolved))
                }
                _ => link,
            };
            symlink(&link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(link: &Path, at: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, at)
}

#[cfg(windows)]
fn symlink(link: &Path, at: &Path) -> io::Result<()> {
    let resolved = at.parent().map_or_else(|| link.to_path_buf(), |p| p.join(link));
    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(link, at)
    } else {
        std::os::windows::fs::symlink_file(link, at)
    }
}
