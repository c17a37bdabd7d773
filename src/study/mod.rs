//! Monte Carlo driver
//!
//! A study is a grid of cells, one per (repetition, delta). Each cell owns a
//! generator seeded from the master seed, simulates one count matrix, runs the
//! estimator once and emits one record per FDR threshold.

mod fdp;
mod record;

pub use fdp::{false_discoveries, fdp, rejections};
pub use record::ResultRecord;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::StudyConfig;
use crate::design::DesignMatrix;
use crate::error::{Result, SimError};
use crate::estimator::{EffectEstimator, NbWaldEstimator};
use crate::rng::{cell_rng, experiment_rng};
use crate::simulate::{Assignment, CountSimulator, MeanGenerator};

/// A cell dropped after a recoverable failure
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedCell {
    pub rep: usize,
    pub delta: f64,
    pub reason: String,
}

/// Records in rep-major, then delta, then q order
#[derive(Debug, Clone)]
pub struct StudyOutcome {
    pub records: Vec<ResultRecord>,
    pub skipped: Vec<SkippedCell>,
}

enum CellOutcome {
    Done(Vec<ResultRecord>),
    Skipped(SkippedCell),
    Cancelled,
}

pub struct Study {
    config: StudyConfig,
    estimator: Box<dyn EffectEstimator>,
    design: DesignMatrix,
    assignment: Assignment,
    generator: MeanGenerator,
    simulator: CountSimulator,
    tested: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl Study {
    /// Validate the configuration and build everything shared by the cells
    pub fn new(config: StudyConfig, estimator: Box<dyn EffectEstimator>) -> Result<Self> {
        config.validate()?;
        let design = config.build_design()?;
        let affected = config.resolve_affected(&design)?;
        let tested = config.resolve_tested(&design)?;

        let mut rng = experiment_rng(config.seed);
        let assignment = Assignment::generate(
            config.n_features,
            config.n_signal,
            config.signal_style(),
            &mut rng,
        )?;
        let generator = MeanGenerator::new(config.gamma_prior(), affected)?;
        let simulator = CountSimulator::new(config.emission)?;

        log::debug!(
            "Design {}x{} ({}), testing column {} '{}', {} null features",
            design.n_samples(),
            design.n_coefs(),
            design.column_names().join(", "),
            tested,
            design.column_names()[tested],
            assignment.n_null()
        );

        Ok(Self {
            config,
            estimator,
            design,
            assignment,
            generator,
            simulator,
            tested,
            cancel: None,
        })
    }

    /// Study using the built-in negative binomial Wald estimator
    pub fn with_default_estimator(config: StudyConfig) -> Result<Self> {
        let estimator = NbWaldEstimator::new(config.fit_type, config.independent_filtering);
        Self::new(config, Box::new(estimator))
    }

    /// Stop scheduling new cells once `flag` is set
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    pub fn design(&self) -> &DesignMatrix {
        &self.design
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    pub fn tested_coefficient(&self) -> usize {
        self.tested
    }

    /// reps x |deltas| x |q_grid|
    pub fn expected_records(&self) -> usize {
        self.n_cells() * self.config.q_grid.len()
    }

    fn n_cells(&self) -> usize {
        self.config.reps * self.config.deltas.len()
    }

    /// Run every cell in parallel and gather the records in deterministic order
    pub fn run(&self) -> Result<StudyOutcome> {
        let n_deltas = self.config.deltas.len();
        let total = self.n_cells();
        let progress_step = (total / 10).max(1);
        let done = AtomicUsize::new(0);

        log::info!(
            "Running {} cells ({} reps x {} deltas) with estimator '{}'",
            total,
            self.config.reps,
            n_deltas,
            self.estimator.name()
        );

        let outcomes: Vec<Result<CellOutcome>> = (0..total)
            .into_par_iter()
            .map(|cell| {
                if self.is_cancelled() {
                    return Ok(CellOutcome::Cancelled);
                }
                let (rep, delta_index) = (cell / n_deltas, cell % n_deltas);
                let outcome = self.run_cell(rep, delta_index);

                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                if finished % progress_step == 0 || finished == total {
                    log::info!("Completed {}/{} cells", finished, total);
                }
                outcome
            })
            .collect();

        let mut records = Vec::with_capacity(self.expected_records());
        let mut skipped = Vec::new();
        let mut cancelled = false;
        for outcome in outcomes {
            match outcome? {
                CellOutcome::Done(cell_records) => records.extend(cell_records),
                CellOutcome::Skipped(cell) => skipped.push(cell),
                CellOutcome::Cancelled => cancelled = true,
            }
        }

        if cancelled {
            return Err(SimError::Cancelled {
                completed: done.load(Ordering::Relaxed),
                total,
            });
        }
        if !skipped.is_empty() {
            log::warn!("{} of {} cells skipped", skipped.len(), total);
        }
        Ok(StudyOutcome { records, skipped })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn run_cell(&self, rep: usize, delta_index: usize) -> Result<CellOutcome> {
        let delta = self.config.deltas[delta_index];
        match self.simulate_and_score(rep, delta_index, delta) {
            Ok(records) => Ok(CellOutcome::Done(records)),
            Err(e) if e.is_recoverable() => {
                log::warn!("Skipping rep {} delta {}: {}", rep, delta, e);
                Ok(CellOutcome::Skipped(SkippedCell {
                    rep,
                    delta,
                    reason: e.to_string(),
                }))
            }
            Err(e) => Err(e),
        }
    }

    fn simulate_and_score(&self, rep: usize, delta_index: usize, delta: f64) -> Result<Vec<ResultRecord>> {
        let mut rng = cell_rng(self.config.seed, rep, delta_index);
        let means = self.generator.generate(&self.design, &self.assignment, &mut rng)?;
        if means.redrawn > 0 {
            log::debug!("rep {}: {} features redrawn for positive means", rep, means.redrawn);
        }
        let counts = self.simulator.simulate(&means.means, delta, &mut rng)?;
        let padj = self
            .estimator
            .adjusted_pvalues(&counts, &self.design, self.tested)?;
        if padj.len() != self.config.n_features {
            return Err(SimError::DimensionMismatch {
                expected: format!("{} adjusted p-values", self.config.n_features),
                got: format!("{}", padj.len()),
            });
        }

        let null_mask = self.assignment.null_mask();
        Ok(self
            .config
            .q_grid
            .iter()
            .map(|&q| {
                let rejected = rejections(&padj, q);
                ResultRecord {
                    delta,
                    rep,
                    q,
                    fdp: fdp(&rejected, &null_mask),
                    n_rejected: rejected.len(),
                    n_false: false_discoveries(&rejected, &null_mask),
                }
            })
            .collect())
    }
}
