//! Tabu search over patches.

use std::collections::HashSet;
use std::hash::Hash;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::schema::{
    ConfigError, EditOperator, EpochResult, SearchConfig, SearchPhase, SearchProgress,
    SelectionMethod,
};

use super::patch::{Patch, SearchRng};
use super::program::Program;
use super::report::RepairReport;

/// Upper bound on draws spent looking for a patch outside the tabu set.
pub const MAX_NEIGHBOUR_ATTEMPTS: usize = 1000;

/// Patches already generated in the current epoch.
#[derive(Debug)]
pub struct TabuSet<E> {
    seen: HashSet<Patch<E>>,
}

impl<E> Default for TabuSet<E> {
    fn default() -> Self {
        Self {
            seen: HashSet::new(),
        }
    }
}

impl<E: Eq + Hash> TabuSet<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, patch: &Patch<E>) -> bool {
        self.seen.contains(patch)
    }

    /// Register a patch; returns false if it was already present.
    pub fn insert(&mut self, patch: Patch<E>) -> bool {
        self.seen.insert(patch)
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Whether `fitness` should replace `best_fitness`.
///
/// An undefined best accepts any defined fitness; an undefined fitness never wins.
pub fn is_better_than_the_best(fitness: Option<f64>, best_fitness: Option<f64>) -> bool {
    match (fitness, best_fitness) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(f), Some(best)) => f < best,
    }
}

/// Whether a candidate with `fitness` repairs the program.
pub fn stopping_criterion(fitness: Option<f64>) -> bool {
    fitness == Some(0.0)
}

/// Derive a fresh neighbour of `patch` that is not in `tabu`.
///
/// Removes a random edit with probability one half when the patch is
/// non-empty, otherwise appends a new edit from a uniformly chosen operator.
/// The returned patch is registered in `tabu`. Returns `None` when no fresh
/// neighbour turns up within [`MAX_NEIGHBOUR_ATTEMPTS`] draws.
pub fn get_neighbour<P: Program>(
    program: &P,
    operators: &[EditOperator],
    tabu: &mut TabuSet<P::Edit>,
    rng: &mut SearchRng,
    patch: &Patch<P::Edit>,
) -> Option<Patch<P::Edit>> {
    for _ in 0..MAX_NEIGHBOUR_ATTEMPTS {
        let mut candidate = patch.clone();
        if !candidate.is_empty() && rng.coin() {
            candidate.remove(rng.index(candidate.len()));
        } else {
            let operator = *rng.choose(operators)?;
            let edit = program.create_edit(operator, SelectionMethod::Weighted, rng.inner())?;
            candidate.add(edit);
        }

        if !tabu.contains(&candidate) {
            tabu.insert(candidate.clone());
            return Some(candidate);
        }
    }
    None
}

/// Tabu search engine driving a [`Program`].
pub struct TabuSearch<P: Program> {
    program: P,
    config: SearchConfig,
    seed: u64,
    rng: SearchRng,
    cancelled: Arc<AtomicBool>,
}

impl<P: Program> TabuSearch<P> {
    /// Create a new search over `program`.
    pub fn new(program: P, config: SearchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let seed = config.random_seed.unwrap_or_else(rand::random);

        Ok(Self {
            program,
            config,
            seed,
            rng: SearchRng::new(seed),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The program under repair.
    pub fn program(&self) -> &P {
        &self.program
    }

    /// Seed actually used, for reproducing a run.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Average fitness of the unmodified program over `warmup_reps` runs.
    ///
    /// Invalid and timed-out runs are ignored; `None` if nothing remains.
    pub fn warmup<F>(&self, callback: &F) -> Option<f64>
    where
        F: Fn(&SearchProgress),
    {
        let empty = Patch::new();
        let mut samples = Vec::with_capacity(self.config.warmup_reps);

        for rep in 1..=self.config.warmup_reps {
            let run = self.program.evaluate_patch(&empty, self.config.timeout());
            debug!("warmup {rep}: {} fitness={:?}", run.status, run.fitness);
            if run.status.is_comparable()
                && let Some(fitness) = run.fitness
            {
                samples.push(fitness);
            }

            callback(&SearchProgress {
                phase: SearchPhase::Warmup,
                epoch: 0,
                total_epochs: self.config.epoch,
                iteration: rep,
                max_iter: self.config.warmup_reps,
                status: Some(run.status),
                fitness: run.fitness,
                best_fitness: None,
                patch_len: 0,
                improved: false,
            });
        }

        if samples.is_empty() {
            None
        } else {
            Some(samples.iter().sum::<f64>() / samples.len() as f64)
        }
    }

    /// Run warmup and every epoch, reporting progress along the way.
    pub fn run_with_callback<F>(&mut self, callback: F) -> RepairReport
    where
        F: Fn(&SearchProgress) + Sync,
    {
        let start = Instant::now();
        let original_fitness = self.warmup(&callback);
        info!("Original fitness: {original_fitness:?}");

        let ctx = EpochContext {
            program: &self.program,
            config: &self.config,
            cancelled: &self.cancelled,
            callback: &callback,
            original_fitness,
        };

        let epochs: Vec<EpochResult> = if self.config.parallel_epochs {
            let seed = self.seed;
            (1..=self.config.epoch)
                .into_par_iter()
                .filter_map(|epoch| {
                    if ctx.is_cancelled() {
                        return None;
                    }
                    let mut rng = SearchRng::derive(seed, epoch as u64);
                    Some(ctx.run(epoch, &mut rng))
                })
                .collect()
        } else {
            let mut epochs = Vec::with_capacity(self.config.epoch);
            for epoch in 1..=self.config.epoch {
                if ctx.is_cancelled() {
                    break;
                }
                epochs.push(ctx.run(epoch, &mut self.rng));
            }
            epochs
        };

        RepairReport::from_epochs(epochs)
            .with_original_fitness(original_fitness)
            .with_elapsed(start.elapsed().as_secs_f64())
    }

    /// Run the search (blocking).
    pub fn run(&mut self) -> RepairReport {
        self.run_with_callback(|_| {})
    }

    /// Release the program's temporary artifacts and hand it back.
    pub fn finish(mut self) -> io::Result<P> {
        self.program.remove_tmp_variant()?;
        Ok(self.program)
    }
}

/// Shared, read-only state of the epochs of one run.
struct EpochContext<'a, P, F> {
    program: &'a P,
    config: &'a SearchConfig,
    cancelled: &'a AtomicBool,
    callback: &'a F,
    original_fitness: Option<f64>,
}

impl<P, F> EpochContext<'_, P, F>
where
    P: Program,
    F: Fn(&SearchProgress),
{
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// One independent restart from the empty patch.
    fn run(&self, epoch: usize, rng: &mut SearchRng) -> EpochResult {
        let start = Instant::now();
        let timeout = self.config.timeout();

        let mut tabu = TabuSet::new();
        let mut best_patch = Patch::new();
        let mut best_fitness = self.original_fitness;
        let mut evaluations = 0;
        let mut invalid = 0;
        let mut success = false;

        for iteration in 1..=self.config.max_iter {
            if self.is_cancelled() {
                break;
            }

            let Some(candidate) = get_neighbour(
                self.program,
                &self.config.operators,
                &mut tabu,
                rng,
                &best_patch,
            ) else {
                warn!("Epoch {epoch}: no untried neighbour left after {evaluations} evaluations");
                break;
            };

            let run = self.program.evaluate_patch(&candidate, timeout);
            evaluations += 1;
            if run.status.is_invalid() {
                invalid += 1;
            }

            let comparable = run.status.is_comparable();
            let solved = comparable && stopping_criterion(run.fitness);
            let improved = comparable && is_better_than_the_best(run.fitness, best_fitness);
            let patch_len = candidate.len();

            debug!(
                "epoch {epoch} iter {iteration}: {} fitness={:?} len={patch_len}{}",
                run.status,
                run.fitness,
                if improved { " *" } else { "" }
            );

            // A repairing candidate is always kept so the reported diff is the repair.
            if improved || solved {
                best_fitness = run.fitness;
                best_patch = candidate;
            }

            (self.callback)(&SearchProgress {
                phase: SearchPhase::Searching,
                epoch,
                total_epochs: self.config.epoch,
                iteration,
                max_iter: self.config.max_iter,
                status: Some(run.status),
                fitness: run.fitness,
                best_fitness,
                patch_len,
                improved,
            });

            if solved {
                success = true;
                break;
            }
        }

        let result = EpochResult {
            epoch,
            success,
            fitness_evaluations: evaluations,
            invalid_patch_count: invalid,
            best_fitness,
            best_patch: best_patch
                .edits()
                .iter()
                .map(|e| self.program.describe_edit(e))
                .collect(),
            diff: self.program.diff(&best_patch),
            elapsed_seconds: start.elapsed().as_secs_f64(),
        };

        info!(
            "Epoch {epoch}/{}: success={} evaluations={} invalid={} best={:?}",
            self.config.epoch, result.success, evaluations, invalid, best_fitness
        );

        (self.callback)(&SearchProgress {
            phase: SearchPhase::EpochComplete,
            epoch,
            total_epochs: self.config.epoch,
            iteration: evaluations,
            max_iter: self.config.max_iter,
            status: None,
            fitness: None,
            best_fitness,
            patch_len: best_patch.len(),
            improved: false,
        });

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EvaluationResult, INVALID_FITNESS, Status};
    use rand::Rng;
    use rand::rngs::StdRng;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    type Judge = Box<dyn Fn(&Patch<u32>) -> EvaluationResult + Send + Sync>;

    /// In-memory program whose edits are integer tokens.
    struct TokenProgram {
        alphabet: u32,
        judge: Judge,
        evaluations: AtomicUsize,
        evaluated: Mutex<Vec<Patch<u32>>>,
        removed: bool,
    }

    impl TokenProgram {
        fn new<J>(alphabet: u32, judge: J) -> Self
        where
            J: Fn(&Patch<u32>) -> EvaluationResult + Send + Sync + 'static,
        {
            Self {
                alphabet,
                judge: Box::new(judge),
                evaluations: AtomicUsize::new(0),
                evaluated: Mutex::new(Vec::new()),
                removed: false,
            }
        }
    }

    impl Program for TokenProgram {
        type Edit = u32;

        fn evaluate_patch(&self, patch: &Patch<u32>, _timeout: Duration) -> EvaluationResult {
            self.evaluations.fetch_add(1, Ordering::Relaxed);
            self.evaluated.lock().unwrap().push(patch.clone());
            (self.judge)(patch)
        }

        fn diff(&self, patch: &Patch<u32>) -> String {
            patch.edits().iter().map(|t| format!("+{t}\n")).collect()
        }

        fn create_edit(
            &self,
            _operator: EditOperator,
            _method: SelectionMethod,
            rng: &mut StdRng,
        ) -> Option<u32> {
            (self.alphabet > 0).then(|| rng.gen_range(0..self.alphabet))
        }

        fn remove_tmp_variant(&mut self) -> io::Result<()> {
            self.removed = true;
            Ok(())
        }
    }

    fn scored(status: Status, fitness: Option<f64>) -> EvaluationResult {
        EvaluationResult {
            status,
            fitness,
            stdout: String::new(),
            stderr: String::new(),
            return_code: Some(0),
            elapsed_seconds: 0.0,
        }
    }

    fn failing(fitness: f64) -> EvaluationResult {
        scored(Status::Failing { failed: 1, total: 2 }, Some(fitness))
    }

    fn passing() -> EvaluationResult {
        scored(Status::Success, Some(0.0))
    }

    fn config(epoch: usize, max_iter: usize) -> SearchConfig {
        SearchConfig {
            warmup_reps: 1,
            epoch,
            max_iter,
            random_seed: Some(42),
            ..Default::default()
        }
    }

    #[test]
    fn test_is_better_than_the_best() {
        assert!(is_better_than_the_best(Some(0.7), None));
        assert!(is_better_than_the_best(Some(0.1), Some(0.2)));
        assert!(!is_better_than_the_best(Some(0.2), Some(0.2)));
        assert!(!is_better_than_the_best(None, None));
        assert!(!is_better_than_the_best(None, Some(1.0)));
    }

    #[test]
    fn test_stopping_criterion() {
        assert!(stopping_criterion(Some(0.0)));
        assert!(!stopping_criterion(Some(0.1)));
        assert!(!stopping_criterion(None));
    }

    #[test]
    fn test_empty_patch_always_grows() {
        let program = TokenProgram::new(1000, |_| failing(0.5));
        let mut tabu = TabuSet::new();
        let mut rng = SearchRng::new(3);
        for _ in 0..50 {
            let n = get_neighbour(&program, &EditOperator::ALL, &mut tabu, &mut rng, &Patch::new())
                .unwrap();
            assert_eq!(n.len(), 1);
        }
    }

    #[test]
    fn test_neighbour_is_one_step_and_fresh() {
        let program = TokenProgram::new(1000, |_| failing(0.5));
        let base: Patch<u32> = [1, 2, 3].into_iter().collect();
        let mut tabu = TabuSet::new();
        let mut rng = SearchRng::new(9);
        let mut seen = HashSet::new();

        for _ in 0..40 {
            let n = get_neighbour(&program, &EditOperator::ALL, &mut tabu, &mut rng, &base).unwrap();
            assert!(n.len() == 2 || n.len() == 4);
            assert!(seen.insert(n.clone()), "neighbour returned twice: {n:?}");
            assert!(tabu.contains(&n));
        }
        assert_eq!(tabu.len(), 40);
    }

    #[test]
    fn test_neighbourhood_exhaustion() {
        let program = TokenProgram::new(2, |_| failing(0.5));
        let mut tabu = TabuSet::new();
        let mut rng = SearchRng::new(5);
        let empty = Patch::new();
        assert!(get_neighbour(&program, &EditOperator::ALL, &mut tabu, &mut rng, &empty).is_some());
        assert!(get_neighbour(&program, &EditOperator::ALL, &mut tabu, &mut rng, &empty).is_some());
        assert!(get_neighbour(&program, &EditOperator::ALL, &mut tabu, &mut rng, &empty).is_none());
    }

    #[test]
    fn test_unsuccessful_epoch_uses_all_iterations() {
        let program = TokenProgram::new(1_000_000, |_| failing(0.5));
        let mut search = TabuSearch::new(program, config(1, 50)).unwrap();
        let report = search.run();

        let epoch = &report.epochs[0];
        assert!(!epoch.success);
        assert_eq!(epoch.fitness_evaluations, 50);
        assert_eq!(epoch.best_fitness, Some(0.5));
        assert!(epoch.best_patch.is_empty());
        assert!(epoch.diff.is_empty());
        // Warmup plus every iteration.
        assert_eq!(search.program().evaluations.load(Ordering::Relaxed), 51);
    }

    #[test]
    fn test_successful_epoch_stops_early() {
        let program = TokenProgram::new(10, |p| {
            if p.edits().contains(&7) {
                passing()
            } else {
                failing(0.5)
            }
        });
        let mut search = TabuSearch::new(program, config(1, 100)).unwrap();
        let report = search.run();

        let epoch = &report.epochs[0];
        assert!(epoch.success);
        assert!(epoch.fitness_evaluations <= 10);
        assert_eq!(epoch.best_fitness, Some(0.0));
        assert_eq!(epoch.diff, "+7\n");
    }

    #[test]
    fn test_improvement_is_kept() {
        // Fitness drops with every 1 in the patch; two 1s repair it.
        let program = TokenProgram::new(3, |p| {
            let ones = p.edits().iter().filter(|&&t| t == 1).count();
            let others = p.len() - ones;
            match (ones, others) {
                (2, 0) => passing(),
                (1, 0) => failing(0.5),
                _ => failing(1.0),
            }
        });
        let mut search = TabuSearch::new(program, config(1, 200)).unwrap();
        let report = search.run();
        let epoch = &report.epochs[0];
        assert!(epoch.success);
        assert_eq!(epoch.diff, "+1\n+1\n");
    }

    #[test]
    fn test_epochs_reset_tabu_and_best() {
        let program = TokenProgram::new(3, |_| failing(0.5));
        let mut search = TabuSearch::new(program, config(2, 50)).unwrap();
        let report = search.run();

        assert_eq!(report.epochs.len(), 2);
        for epoch in &report.epochs {
            // Only three single-token neighbours of the empty patch exist.
            assert_eq!(epoch.fitness_evaluations, 3);
            assert!(epoch.best_patch.is_empty());
        }

        let evaluated = search.program().evaluated.lock().unwrap().clone();
        // Skip the warmup run.
        let first: HashSet<_> = evaluated[1..4].iter().cloned().collect();
        let second: HashSet<_> = evaluated[4..7].iter().cloned().collect();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_warmup_accepts_first_valid() {
        let program = TokenProgram::new(1_000_000, |p| {
            if p.is_empty() {
                scored(Status::Invalid, Some(INVALID_FITNESS))
            } else {
                failing(0.9)
            }
        });
        let mut search = TabuSearch::new(program, config(1, 5)).unwrap();
        let report = search.run();

        assert_eq!(report.original_fitness, None);
        let epoch = &report.epochs[0];
        assert_eq!(epoch.best_fitness, Some(0.9));
        assert_eq!(epoch.best_patch.len(), 1);
    }

    #[test]
    fn test_invalid_and_timeout_never_win() {
        let program = TokenProgram::new(1_000_000, |p| match p.edits().first() {
            None => failing(0.5),
            Some(t) if t % 2 == 0 => scored(Status::Timeout, None),
            Some(_) => scored(Status::Invalid, Some(INVALID_FITNESS)),
        });
        let mut search = TabuSearch::new(program, config(1, 20)).unwrap();
        let report = search.run();

        let epoch = &report.epochs[0];
        assert_eq!(epoch.invalid_patch_count, 20);
        assert_eq!(epoch.best_fitness, Some(0.5));
        assert!(epoch.best_patch.is_empty());
    }

    #[test]
    fn test_zero_fitness_timeout_is_not_success() {
        let program = TokenProgram::new(1_000_000, |p| {
            if p.is_empty() {
                failing(0.5)
            } else {
                scored(Status::Timeout, Some(0.0))
            }
        });
        let mut search = TabuSearch::new(program, config(1, 5)).unwrap();
        let report = search.run();
        assert!(!report.epochs[0].success);
        assert_eq!(report.epochs[0].fitness_evaluations, 5);
    }

    #[test]
    fn test_repair_kept_when_baseline_already_zero() {
        let program = TokenProgram::new(1_000_000, |_| passing());
        let mut search = TabuSearch::new(program, config(1, 10)).unwrap();
        let report = search.run();

        let epoch = &report.epochs[0];
        assert!(epoch.success);
        assert_eq!(epoch.fitness_evaluations, 1);
        assert_eq!(epoch.best_patch.len(), 1);
    }

    #[test]
    fn test_seeded_runs_reproducible() {
        let judge = |p: &Patch<u32>| failing(1.0 / (1.0 + p.len() as f64));
        let mut a = TabuSearch::new(TokenProgram::new(50, judge), config(2, 30)).unwrap();
        let mut b = TabuSearch::new(TokenProgram::new(50, judge), config(2, 30)).unwrap();
        let ra = a.run();
        let rb = b.run();
        for (x, y) in ra.epochs.iter().zip(&rb.epochs) {
            assert_eq!(x.best_patch, y.best_patch);
            assert_eq!(x.best_fitness, y.best_fitness);
        }
    }

    #[test]
    fn test_parallel_epochs_keep_order() {
        let program = TokenProgram::new(1_000_000, |_| failing(0.5));
        let config = SearchConfig {
            parallel_epochs: true,
            ..config(4, 10)
        };
        let mut search = TabuSearch::new(program, config).unwrap();
        let report = search.run();

        let order: Vec<usize> = report.epochs.iter().map(|e| e.epoch).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert!(report.epochs.iter().all(|e| e.fitness_evaluations == 10));
    }

    #[test]
    fn test_cancellation() {
        let program = TokenProgram::new(1_000_000, |_| failing(0.5));
        let mut search = TabuSearch::new(program, config(3, 10)).unwrap();
        search.cancel_handle().store(true, Ordering::Relaxed);
        let report = search.run();
        assert!(report.epochs.is_empty());
    }

    #[test]
    fn test_progress_callback() {
        let program = TokenProgram::new(1_000_000, |_| failing(0.5));
        let mut search = TabuSearch::new(program, config(2, 5)).unwrap();
        let calls = AtomicUsize::new(0);
        let completed = AtomicUsize::new(0);
        search.run_with_callback(|p| {
            calls.fetch_add(1, Ordering::Relaxed);
            if p.phase == SearchPhase::EpochComplete {
                completed.fetch_add(1, Ordering::Relaxed);
            }
        });
        // 1 warmup + 2 * (5 iterations + 1 completion)
        assert_eq!(calls.load(Ordering::Relaxed), 13);
        assert_eq!(completed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_finish_removes_variant() {
        let program = TokenProgram::new(10, |_| failing(0.5));
        let search = TabuSearch::new(program, config(1, 1)).unwrap();
        let program = search.finish().unwrap();
        assert!(program.removed);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let program = TokenProgram::new(10, |_| failing(0.5));
        let config = SearchConfig {
            operators: vec![],
            ..Default::default()
        };
        assert!(matches!(
            TabuSearch::new(program, config),
            Err(ConfigError::NoOperators)
        ));
    }
}
