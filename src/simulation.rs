//! End-to-end simulated recoveries and the queue worker.
//!
//! [`run_simulation`] generates through-focus truth from known coefficients,
//! recovers them with the chosen driver and assembles a [`ResultDocument`].
//! [`Worker`] drains a [`PersistentQueue`] of truth vectors into a [`Database`].

use crate::codex::Codex;
use crate::cost::CostPipeline;
use crate::document::{prepare_document, ResultDocument};
use crate::objective::ProblemContext;
use crate::optics::{ForwardModel, SetupParameters, ZernikeTerm};
use crate::optimization::{
    GlobalDriver, GlobalOptions, LocalDriver, LocalOptions, OptimizationError, WavefrontOptimizer,
};
use crate::store::{Database, PersistentQueue, StoreError};
use crate::truth::TruthData;
use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which driver a simulation runs, with its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    Local(LocalOptions),
    Global(GlobalOptions),
}

impl Default for SolverKind {
    fn default() -> Self {
        SolverKind::Global(GlobalOptions::default())
    }
}

impl SolverKind {
    pub fn driver(&self) -> Box<dyn WavefrontOptimizer> {
        match self {
            SolverKind::Local(options) => Box::new(LocalDriver::new(options.clone())),
            SolverKind::Global(options) => Box::new(GlobalDriver::new(options.clone())),
        }
    }
}

/// Simulates truth from `truth_params`, recovers it from `guess` and documents the run.
///
/// # Errors
///
/// * [`OptimizationError::CodexLengthMismatch`] if the truth or the guess does
///   not fit the codex; checked before any simulation work.
/// * Errors from the forward model and the driver.
pub fn run_simulation(
    model: Arc<dyn ForwardModel>,
    setup: &SetupParameters,
    codex: &Codex,
    truth_params: &[f64],
    guess: &[f64],
    solver: &SolverKind,
    pipeline: &CostPipeline,
) -> Result<ResultDocument, OptimizationError> {
    codex.check_len(guess)?;
    let wavefront = codex.to_wavefront(truth_params, 0.0, setup.focus_normed)?;
    let truth = TruthData::simulate(model.as_ref(), setup, &wavefront)?;
    let context = ProblemContext::new(
        setup.clone(),
        codex.clone(),
        truth,
        pipeline.clone(),
        model,
    )?;

    let mut driver = solver.driver();
    let result = driver.optimize(Arc::new(context), guess)?;
    prepare_document(setup, codex, truth_params, pipeline, result)
}

/// Random truth coefficient vectors for `codex`.
///
/// Values are uniform in `[-peak, peak]`, or `[0, peak]` when not
/// `symmetric`. The defocus slot, if the codex has one, is zero.
pub fn generate_random_axial_truth<R: Rng>(
    codex: &Codex,
    peak: f64,
    count: usize,
    symmetric: bool,
    rng: &mut R,
) -> Vec<Vec<f64>> {
    let defocus = codex.position(ZernikeTerm::DEFOCUS);
    (0..count)
        .map(|_| {
            (0..codex.len())
                .map(|slot| {
                    if Some(slot) == defocus {
                        return 0.0;
                    }
                    let u: f64 = rng.gen();
                    if symmetric {
                        (u - 0.5) * 2.0 * peak
                    } else {
                        u * peak
                    }
                })
                .collect()
        })
        .collect()
}

#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error("Worker needs a job count or a time budget")]
    NoBudget,
    #[error(transparent)]
    Optimization(#[from] OptimizationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How long a worker keeps taking jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkBudget {
    Jobs(usize),
    Time(Duration),
}

/// One unit of worker output: a document for a truth vector.
pub trait SimulationJob {
    fn simulate(&self, truth_params: &[f64]) -> Result<ResultDocument, OptimizationError>;
}

/// Inputs shared by every job of a worker.
pub struct SimulationTemplate {
    pub model: Arc<dyn ForwardModel>,
    pub setup: SetupParameters,
    pub codex: Codex,
    pub guess: Vec<f64>,
    pub solver: SolverKind,
    pub pipeline: CostPipeline,
}

impl SimulationJob for SimulationTemplate {
    fn simulate(&self, truth_params: &[f64]) -> Result<ResultDocument, OptimizationError> {
        run_simulation(
            Arc::clone(&self.model),
            &self.setup,
            &self.codex,
            truth_params,
            &self.guess,
            &self.solver,
            &self.pipeline,
        )
    }
}

/// Summary of one [`Worker::start`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkReport {
    pub completed: usize,
    pub requeued: usize,
}

/// Takes truth vectors from a queue, simulates them and stores the documents.
pub struct Worker<J: SimulationJob = SimulationTemplate> {
    queue: PersistentQueue<Vec<f64>>,
    database: Database,
    job: J,
    budget: WorkBudget,
}

impl<J: SimulationJob> Worker<J> {
    pub fn new(
        queue: PersistentQueue<Vec<f64>>,
        database: Database,
        job: J,
        budget: WorkBudget,
    ) -> Result<Self, WorkerError> {
        match budget {
            WorkBudget::Jobs(0) => Err(WorkerError::NoBudget),
            WorkBudget::Time(d) if d.is_zero() => Err(WorkerError::NoBudget),
            _ => Ok(Worker {
                queue,
                database,
                job,
                budget,
            }),
        }
    }

    pub fn queue(&self) -> &PersistentQueue<Vec<f64>> {
        &self.queue
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Works until the budget is spent or the queue is empty.
    ///
    /// Jobs failing with a transient error go to the back of the queue and
    /// count against the budget; any other error stops the worker with the
    /// job left at the front.
    pub fn start(&mut self) -> Result<WorkReport, WorkerError> {
        let started = Instant::now();
        let mut report = WorkReport::default();
        let mut jobs = 0usize;
        loop {
            let Some(truth) = self.queue.peek().cloned() else {
                info!("Stopping: queue exhausted");
                break;
            };
            match self.job.simulate(&truth) {
                Ok(document) => {
                    let id = self.database.append(&document)?;
                    self.queue.mark_done()?;
                    report.completed += 1;
                    info!("Stored document {id} for truth {truth:?}");
                }
                Err(err) if err.is_transient() => {
                    warn!("Requeueing {truth:?}: {err}");
                    self.queue.requeue_front()?;
                    report.requeued += 1;
                }
                Err(err) => return Err(err.into()),
            }
            jobs += 1;
            let done = match self.budget {
                WorkBudget::Jobs(limit) => jobs >= limit,
                WorkBudget::Time(limit) => started.elapsed() >= limit,
            };
            if done {
                break;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optics::testing::{recovery_setup, small_setup};
    use crate::optics::AutocorrelationModel;
    use crate::objective::Parallelism;
    use crate::optimization::IterationHistory;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn quick_local() -> SolverKind {
        SolverKind::Local(LocalOptions {
            tolerance: 1e-8,
            max_iterations: 10,
            ..LocalOptions::default()
        })
    }

    #[test]
    fn test_random_truth_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let codex = Codex::spherical();
        let truths = generate_random_axial_truth(&codex, 0.1, 50, true, &mut rng);
        assert_eq!(truths.len(), 50);
        for truth in &truths {
            assert_eq!(truth.len(), 4);
            assert_eq!(truth[0], 0.0);
            assert!(truth.iter().all(|v| v.abs() <= 0.1));
        }
        assert!(truths.iter().any(|t| t[1] < 0.0));
        let positive = generate_random_axial_truth(&codex, 0.1, 50, false, &mut rng);
        assert!(positive.iter().flatten().all(|v| (0.0..=0.1).contains(v)));
    }

    #[test]
    fn test_run_simulation_local_document() {
        let setup = recovery_setup();
        let solver = SolverKind::Local(LocalOptions {
            tolerance: 1e-5,
            max_iterations: 200,
            parallelism: Parallelism::Pool { threads: Some(2) },
            ..LocalOptions::default()
        });
        let doc = run_simulation(
            Arc::new(AutocorrelationModel),
            &setup,
            &Codex::spherical(),
            &[0.0, 0.125, 0.0, 0.0],
            &[0.0; 4],
            &solver,
            &CostPipeline::default(),
        )
        .unwrap();
        let IterationHistory::Local { parameters, costs } = &doc.history else {
            panic!("expected local history");
        };
        assert_eq!(parameters.len(), costs.len() + 1);
        assert!(doc.final_rms < doc.first_rms);
        assert!(doc.final_rms < 1e-2, "Residual too high: {}", doc.final_rms);
        assert!(doc.truth_rms > 0.1);
        assert!(doc.final_cost <= doc.first_cost);
    }

    #[test]
    fn test_guess_checked_before_simulation() {
        let err = run_simulation(
            Arc::new(AutocorrelationModel),
            &small_setup(),
            &Codex::spherical(),
            &[0.0, 0.125, 0.0, 0.0],
            &[0.0; 3],
            &quick_local(),
            &CostPipeline::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            OptimizationError::CodexLengthMismatch { codex: 4, params: 3 }
        ));
    }

    /// Reports stale worker state for the first `failures` jobs.
    struct FlakyJob {
        inner: SimulationTemplate,
        failures: AtomicUsize,
    }

    impl SimulationJob for FlakyJob {
        fn simulate(&self, truth_params: &[f64]) -> Result<ResultDocument, OptimizationError> {
            let remaining = self.failures.load(Ordering::Relaxed);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::Relaxed);
                return Err(OptimizationError::WorkerState("stale context".to_string()));
            }
            self.inner.simulate(truth_params)
        }
    }

    fn template(model: Arc<dyn ForwardModel>) -> SimulationTemplate {
        SimulationTemplate {
            model,
            setup: small_setup(),
            codex: Codex::spherical(),
            guess: vec![0.0; 4],
            solver: quick_local(),
            pipeline: CostPipeline::default(),
        }
    }

    #[test]
    fn test_worker_drains_queue_into_database() {
        let dir = tempdir().unwrap();
        let mut queue = PersistentQueue::open(dir.path().join("queue.json"), false).unwrap();
        queue
            .put_many([vec![0.0, 0.1, 0.0, 0.0], vec![0.0, 0.05, 0.0, 0.0]])
            .unwrap();
        let database =
            Database::create(dir.path().join("db"), &["final_cost", "success"], false).unwrap();
        let job = FlakyJob {
            inner: template(Arc::new(AutocorrelationModel)),
            failures: AtomicUsize::new(1),
        };
        let mut worker = Worker::new(queue, database, job, WorkBudget::Jobs(5)).unwrap();

        let report = worker.start().unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(report.completed, 2);
        assert!(worker.queue().is_empty());
        assert_eq!(worker.database().len(), 2);

        // The first truth failed once and was processed after the second.
        let reopened = Database::open(dir.path().join("db")).unwrap();
        let doc: ResultDocument = reopened.get_document(&reopened.ids()[0]).unwrap();
        assert_eq!(doc.truth_params, vec![0.0, 0.05, 0.0, 0.0]);
        let doc: ResultDocument = reopened.get_document(&reopened.ids()[1]).unwrap();
        assert_eq!(doc.truth_params, vec![0.0, 0.1, 0.0, 0.0]);
    }

    #[test]
    fn test_worker_job_budget_and_fatal_errors() {
        let dir = tempdir().unwrap();
        let mut queue = PersistentQueue::open(dir.path().join("queue.json"), false).unwrap();
        queue
            .put_many([vec![0.0, 0.1, 0.0, 0.0], vec![0.0, 0.1, 0.0], vec![0.0; 4]])
            .unwrap();
        let database = Database::create(dir.path().join("db"), &["nit"], false).unwrap();
        let mut worker = Worker::new(
            queue,
            database,
            template(Arc::new(AutocorrelationModel)),
            WorkBudget::Jobs(1),
        )
        .unwrap();
        assert_eq!(worker.start().unwrap().completed, 1);
        assert_eq!(worker.queue().len(), 2);

        // The malformed truth is not transient: the worker stops and keeps it.
        let err = worker.start().unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Optimization(OptimizationError::CodexLengthMismatch { .. })
        ));
        assert_eq!(worker.queue().len(), 2);
        assert!(matches!(
            Worker::new(
                PersistentQueue::open(dir.path().join("other.json"), true).unwrap(),
                Database::create(dir.path().join("db2"), &[], false).unwrap(),
                template(Arc::new(AutocorrelationModel)),
                WorkBudget::Jobs(0),
            ),
            Err(WorkerError::NoBudget)
        ));
    }
}
