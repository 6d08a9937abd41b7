//! Aggregation of epoch results into a repair report.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::schema::EpochResult;

/// Results of a complete multi-epoch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairReport {
    /// Baseline fitness of the unmodified program.
    pub original_fitness: Option<f64>,
    /// Epoch results in epoch order.
    pub epochs: Vec<EpochResult>,
    /// Wall-clock time of the whole run.
    pub elapsed_seconds: f64,
}

impl RepairReport {
    /// Build a report from epoch results.
    pub fn from_epochs(epochs: Vec<EpochResult>) -> Self {
        Self {
            original_fitness: None,
            epochs,
            elapsed_seconds: 0.0,
        }
    }

    pub fn with_original_fitness(mut self, fitness: Option<f64>) -> Self {
        self.original_fitness = fitness;
        self
    }

    pub fn with_elapsed(mut self, seconds: f64) -> Self {
        self.elapsed_seconds = seconds;
        self
    }

    /// Epochs that found a repair.
    pub fn successful(&self) -> impl Iterator<Item = &EpochResult> {
        self.epochs.iter().filter(|e| e.success)
    }

    /// Epochs that ran out of iterations.
    pub fn unsuccessful(&self) -> impl Iterator<Item = &EpochResult> {
        self.epochs.iter().filter(|e| !e.success)
    }

    pub fn success_count(&self) -> usize {
        self.successful().count()
    }

    /// Distinct repair diffs, in the order they were first found.
    pub fn unique_repairs(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.successful()
            .map(|e| e.diff.as_str())
            .filter(|diff| seen.insert(*diff))
            .collect()
    }

    pub fn unique_repair_count(&self) -> usize {
        self.unique_repairs().len()
    }

    /// Fraction of epochs that found a repair; 0 for an empty run.
    pub fn success_rate(&self) -> f64 {
        if self.epochs.is_empty() {
            0.0
        } else {
            self.success_count() as f64 / self.epochs.len() as f64
        }
    }

    /// Mean evaluations needed by successful epochs.
    pub fn average_evaluations_to_success(&self) -> Option<f64> {
        let evaluations: Vec<usize> = self.successful().map(|e| e.fitness_evaluations).collect();
        if evaluations.is_empty() {
            None
        } else {
            Some(evaluations.iter().sum::<usize>() as f64 / evaluations.len() as f64)
        }
    }

    /// Write the report as pretty JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }

    /// Read a report written by [`save_json`](Self::save_json).
    pub fn load_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

const RULE: &str = "----------------------------------------";

impl fmt::Display for RepairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "======================RESULTS======================")?;
        for epoch in &self.epochs {
            writeln!(f, "{RULE}")?;
            writeln!(f, "Epoch: {}", epoch.epoch)?;
            writeln!(f, "Success: {}", epoch.success)?;
            writeln!(f, "Fitted at iteration: {}", epoch.fitness_evaluations)?;
            writeln!(f, "Invalid Patch: {}", epoch.invalid_patch_count)?;
            match epoch.best_fitness {
                Some(fitness) => writeln!(f, "Best fitness: {fitness}")?,
                None => writeln!(f, "Best fitness: none")?,
            }
            writeln!(f, "Diff: \n{}", epoch.diff)?;
            writeln!(f, "{RULE}\n")?;
        }

        writeln!(f, "======================SUCCESS PATCHES======================")?;
        let repairs = self.unique_repairs();
        for diff in &repairs {
            writeln!(f, "{RULE}\n")?;
            writeln!(f, "{diff}")?;
            writeln!(f, "{RULE}\n")?;
        }
        writeln!(f, "{} types of success patches found.", repairs.len())?;
        write!(
            f,
            "Success rate: {}/{} ({:.1}%)",
            self.success_count(),
            self.epochs.len(),
            self.success_rate() * 100.0
        )?;
        if let Some(avg) = self.average_evaluations_to_success() {
            write!(f, ", {avg:.1} evaluations to success on average")?;
        }
        writeln!(f)
    }
}
