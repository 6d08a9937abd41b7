//! Fitness classification of test-runner output.
//!
//! A classifier turns the raw output of one test command invocation into a
//! [`Status`] and a fitness score. Lower fitness is better and `0.0` is the
//! only success value. Outcomes that must never count as progress are either
//! pinned at [`INVALID_FITNESS`] or carry no fitness at all.

use std::num::ParseIntError;

use log::warn;
use regex::Regex;

use crate::schema::{ClassifierKind, EvaluationResult, INVALID_FITNESS, Status};

/// Strategy turning test output into an [`EvaluationResult`].
pub trait FitnessClassifier: Send + Sync {
    fn classify(
        &self,
        stdout: &str,
        return_code: Option<i32>,
        stderr: &str,
        elapsed_seconds: f64,
    ) -> EvaluationResult;
}

/// Build the classifier selected by configuration.
pub fn classifier_for(kind: ClassifierKind) -> Box<dyn FitnessClassifier> {
    match kind {
        ClassifierKind::PytestSummary => Box::new(PytestSummaryClassifier::new()),
        ClassifierKind::ExitCode => Box::new(ExitCodeClassifier),
    }
}

/// Parses the final `N failed, M passed in Xs` line printed by pytest.
pub struct PytestSummaryClassifier {
    failed: Regex,
    passed: Regex,
    error: Regex,
}

impl Default for PytestSummaryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PytestSummaryClassifier {
    pub fn new() -> Self {
        Self {
            failed: count_pattern("failed"),
            passed: count_pattern("passed"),
            error: count_pattern("error"),
        }
    }

    /// Extract the decorated summary line from the full output.
    pub fn summary_line(stdout: &str) -> String {
        let trimmed = stdout.strip_suffix('\n').unwrap_or(stdout);
        let last = match trimmed.rfind('\n') {
            Some(pos) => &trimmed[pos + 1..],
            None => trimmed,
        };
        last.replace('=', "").trim().to_string()
    }

    /// Compute `(status, fitness)` from a summary line.
    pub fn score(&self, summary: &str) -> (Status, Option<f64>) {
        match first_count(&self.error, summary) {
            // A count too large for u64 is still a positive error count.
            Some(Err(_)) => return (Status::Invalid, Some(INVALID_FITNESS)),
            Some(Ok(errors)) if errors > 0 => return (Status::Invalid, Some(INVALID_FITNESS)),
            _ => {}
        }

        let (failed, passed) = match (
            first_count(&self.failed, summary).transpose(),
            first_count(&self.passed, summary).transpose(),
        ) {
            (Ok(None), Ok(None)) => return (Status::ParseError, None),
            (Ok(failed), Ok(passed)) => (failed.unwrap_or(0), passed.unwrap_or(0)),
            _ => return (Status::ParseError, None),
        };
        let Some(total) = failed.checked_add(passed) else {
            return (Status::ParseError, None);
        };

        let fitness = if total > 0 {
            failed as f64 / total as f64
        } else {
            1.0
        };

        let status = if fitness == 0.0 {
            Status::Success
        } else {
            Status::Failing { failed, total }
        };
        (status, Some(fitness))
    }
}

impl FitnessClassifier for PytestSummaryClassifier {
    fn classify(
        &self,
        stdout: &str,
        return_code: Option<i32>,
        stderr: &str,
        elapsed_seconds: f64,
    ) -> EvaluationResult {
        let summary = Self::summary_line(stdout);
        let (status, fitness) = self.score(&summary);

        if status == Status::ParseError {
            warn!("Unrecognized test summary, raw stdout:\n{stdout}");
        }

        EvaluationResult {
            status,
            fitness,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            return_code,
            elapsed_seconds,
        }
    }
}

/// Scores a run by exit code alone: zero passes, anything else fails.
pub struct ExitCodeClassifier;

impl FitnessClassifier for ExitCodeClassifier {
    fn classify(
        &self,
        stdout: &str,
        return_code: Option<i32>,
        stderr: &str,
        elapsed_seconds: f64,
    ) -> EvaluationResult {
        let (status, fitness) = match return_code {
            Some(0) => (Status::Success, Some(0.0)),
            Some(_) => (Status::Failing { failed: 1, total: 1 }, Some(1.0)),
            None => (Status::Invalid, Some(INVALID_FITNESS)),
        };

        EvaluationResult {
            status,
            fitness,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            return_code,
            elapsed_seconds,
        }
    }
}

fn count_pattern(word: &str) -> Regex {
    Regex::new(&format!(r"([0-9]+) {word}")).expect("count pattern is a valid regex")
}

/// First count matched by `pattern`; `Some(Err)` if it does not fit in a u64.
fn first_count(pattern: &Regex, text: &str) -> Option<Result<u64, ParseIntError>> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn classify(stdout: &str) -> EvaluationResult {
        PytestSummaryClassifier::new().classify(stdout, Some(1), "", 0.1)
    }

    #[test]
    fn test_failing_summary() {
        let result = classify("collected 10 items\n\ntest_gcd.py ..FF\n== 2 failed, 8 passed in 1.02s ==\n");
        assert_eq!(result.status, Status::Failing { failed: 2, total: 10 });
        assert_eq!(result.fitness, Some(0.2));
    }

    #[test]
    fn test_passing_summary() {
        let result = classify("banner\n0 failed, 10 passed in 0.50s\n");
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.fitness, Some(0.0));
    }

    #[test]
    fn test_only_passed_reported() {
        let result = classify("....\n===== 10 passed in 0.12s =====\n");
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.fitness, Some(0.0));
    }

    #[test]
    fn test_error_is_invalid() {
        let result = classify("Traceback ...\n1 error");
        assert_eq!(result.status, Status::Invalid);
        assert!(result.fitness.unwrap() > 1.0);
    }

    #[test]
    fn test_error_dominates_counts() {
        let result = classify("x\n1 failed, 3 passed, 2 errors in 0.3s\n");
        assert_eq!(result.status, Status::Invalid);
        assert_eq!(result.fitness, Some(INVALID_FITNESS));
    }

    #[test]
    fn test_zero_errors_not_invalid() {
        let result = classify("x\n1 failed, 1 passed, 0 errors\n");
        assert_eq!(result.status, Status::Failing { failed: 1, total: 2 });
    }

    #[test]
    fn test_degenerate_zero_counts() {
        let result = classify("x\n0 failed, 0 passed\n");
        assert_eq!(result.status, Status::Failing { failed: 0, total: 0 });
        assert_eq!(result.fitness, Some(1.0));
    }

    #[test]
    fn test_huge_counts_do_not_panic() {
        let result = classify("x\n18446744073709551615 failed, 1 passed\n");
        assert_eq!(result.status, Status::ParseError);
        assert_eq!(result.fitness, None);

        let result = classify("x\n99999999999999999999999 failed, 1 passed\n");
        assert_eq!(result.status, Status::ParseError);

        let result = classify("x\n1 passed, 99999999999999999999999 errors\n");
        assert_eq!(result.status, Status::Invalid);
    }

    #[test]
    fn test_parse_error_keeps_stdout() {
        let stdout = "Segmentation fault\nno summary here\n";
        let result = classify(stdout);
        assert_eq!(result.status, Status::ParseError);
        assert_eq!(result.fitness, None);
        assert_eq!(result.stdout, stdout);
    }

    #[test]
    fn test_only_last_line_is_read() {
        let result = classify("3 failed, 1 passed\nsomething else\n");
        assert_eq!(result.status, Status::ParseError);
    }

    #[test]
    fn test_summary_line() {
        assert_eq!(
            PytestSummaryClassifier::summary_line("a\n=== 1 passed in 0.1s ===\n"),
            "1 passed in 0.1s"
        );
        assert_eq!(PytestSummaryClassifier::summary_line("1 failed"), "1 failed");
    }

    #[test]
    fn test_exit_code_classifier() {
        let c = ExitCodeClassifier;
        assert_eq!(c.classify("", Some(0), "", 0.0).status, Status::Success);
        assert_eq!(c.classify("", Some(3), "", 0.0).fitness, Some(1.0));
        assert_eq!(c.classify("", None, "", 0.0).status, Status::Invalid);
    }

    proptest! {
        #[test]
        fn prop_fitness_is_failure_ratio(f in 0u64..500, p in 0u64..500) {
            prop_assume!(f + p > 0);
            let result = classify(&format!("noise\n{f} failed, {p} passed in 0.01s\n"));
            let expected = f as f64 / (f + p) as f64;
            prop_assert_eq!(result.fitness, Some(expected));
            prop_assert_eq!(result.status == Status::Success, f == 0);
        }

        #[test]
        fn prop_errors_are_invalid(e in 1u64..100, f in 0u64..100, p in 0u64..100) {
            let result = classify(&format!("x\n{f} failed, {p} passed, {e} error in 1s\n"));
            prop_assert_eq!(result.status, Status::Invalid);
            prop_assert!(result.fitness.unwrap() > 1.0);
        }

        #[test]
        fn prop_unmatched_is_parse_error(line in "[a-z ]{0,40}") {
            prop_assume!(!line.contains("failed") && !line.contains("passed") && !line.contains("error"));
            let result = classify(&format!("{line}\n"));
            prop_assert_eq!(result.status, Status::ParseError);
        }
    }
}
