//! Local driver: one bounded L-BFGS minimization with iterate histories.

use crate::objective::{Objective, Parallelism, ProblemContext};
use crate::optimization::history::CallLog;
use crate::optimization::problem::{Bounds, WavefrontProblem};
use crate::optimization::result::{IterationHistory, OptimizationResult, Provenance, SolverState};
use crate::optimization::trace::{parse_iterate_costs, IterationObserver, TraceBuffer};
use crate::optimization::{OptimizationError, WavefrontOptimizer};
use argmin::core::observers::ObserverMode;
use argmin::core::{Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Settings of the local minimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalOptions {
    /// Stop when the cost changes by less than this between iterates.
    pub tolerance: f64,
    /// Stop when the gradient norm drops below this.
    pub gradient_tolerance: f64,
    pub max_iterations: u64,
    /// Number of correction pairs kept by L-BFGS.
    pub memory: usize,
    /// Box constraints; unbounded when `None`.
    pub bounds: Option<Bounds>,
    pub parallelism: Parallelism,
}

impl Default for LocalOptions {
    fn default() -> Self {
        LocalOptions {
            tolerance: 1e-2,
            gradient_tolerance: 1e-8,
            max_iterations: 15000,
            memory: 10,
            bounds: None,
            parallelism: Parallelism::Sequential,
        }
    }
}

impl LocalOptions {
    /// # Errors
    ///
    /// Returns [`OptimizationError::InvalidOptions`] for negative or non-finite
    /// tolerances, zero memory or zero iterations.
    pub fn validate(&self) -> Result<(), OptimizationError> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(OptimizationError::InvalidOptions(format!(
                "tolerance must be finite and non-negative, got {}",
                self.tolerance
            )));
        }
        if !self.gradient_tolerance.is_finite() || self.gradient_tolerance < 0.0 {
            return Err(OptimizationError::InvalidOptions(format!(
                "gradient tolerance must be finite and non-negative, got {}",
                self.gradient_tolerance
            )));
        }
        if self.memory == 0 {
            return Err(OptimizationError::InvalidOptions(
                "L-BFGS memory must be at least 1".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(OptimizationError::InvalidOptions(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Bounds for a problem of `dimension` parameters.
    pub fn resolve_bounds(&self, dimension: usize) -> Result<Bounds, OptimizationError> {
        match &self.bounds {
            Some(bounds) if bounds.len() != dimension => {
                Err(OptimizationError::InvalidOptions(format!(
                    "{} bounds given for {dimension} parameters",
                    bounds.len()
                )))
            }
            Some(bounds) => Ok(bounds.clone()),
            None => Ok(Bounds::unbounded(dimension)),
        }
    }
}

/// Outcome of a single local minimization.
#[derive(Debug, Clone)]
pub(crate) struct LocalRun {
    pub x: Vec<f64>,
    pub fun: f64,
    pub success: bool,
    pub message: String,
    pub nit: usize,
    pub nfev: usize,
    pub state: SolverState,
    /// Iterate parameters, without the starting point.
    pub parameters: Vec<Vec<f64>>,
}

/// Runs L-BFGS from `start` and appends one trace section to `trace`.
///
/// Solver failures (line search breakdown and the like) are reported as a
/// failed run holding the best point evaluated so far. Errors raised by the
/// objective itself are configuration or shared-state problems and are
/// returned as `Err`.
pub(crate) fn minimize_once(
    objective: &Objective,
    start: &[f64],
    options: &LocalOptions,
    bounds: &Bounds,
    trace: &TraceBuffer,
    calls: Option<CallLog>,
) -> Result<LocalRun, OptimizationError> {
    let problem = WavefrontProblem::new(objective, bounds.clone(), calls);
    let tally = problem.tally();
    let parameters = Arc::new(Mutex::new(Vec::new()));
    let observer = IterationObserver::new(trace.clone(), Arc::clone(&parameters), bounds.clone());

    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, options.memory)
        .with_tolerance_grad(options.gradient_tolerance)
        .map_err(|e| OptimizationError::InvalidOptions(format!("gradient tolerance: {e}")))?
        .with_tolerance_cost(options.tolerance)
        .map_err(|e| OptimizationError::InvalidOptions(format!("tolerance: {e}")))?;

    trace.begin_run(start.len(), options.memory);
    let x0 = bounds.project(start);
    let max_iterations = options.max_iterations;
    let outcome = Executor::new(problem, solver)
        .configure(|state| state.param(x0).max_iters(max_iterations))
        .add_observer(observer, ObserverMode::Always)
        .run();

    let parameters = std::mem::take(&mut *parameters.lock());
    let nfev = tally.evaluations();
    match outcome {
        Ok(res) => {
            let state = res.state();
            let termination = state.get_termination_status();
            let solver_state = match termination {
                TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached) => {
                    SolverState::Converged
                }
                TerminationStatus::Terminated(TerminationReason::MaxItersReached) => {
                    SolverState::MaxIterationsReached
                }
                _ => SolverState::Failed,
            };
            let (x, fun) = match (state.get_best_param(), tally.best()) {
                (Some(best), _) => (bounds.project(best), state.get_best_cost()),
                (None, Some(best)) => (best.params, best.cost),
                (None, None) => (bounds.project(start), f64::NAN),
            };
            Ok(LocalRun {
                x,
                fun,
                success: solver_state == SolverState::Converged,
                message: termination.to_string(),
                nit: state.get_iter() as usize,
                nfev,
                state: solver_state,
                parameters,
            })
        }
        Err(err) => match err.downcast::<OptimizationError>() {
            Ok(fatal) => Err(fatal),
            Err(err) => {
                warn!("Local minimization aborted: {err}");
                let (x, fun) = match tally.best() {
                    Some(best) => (best.params, best.cost),
                    None => (bounds.project(start), f64::NAN),
                };
                Ok(LocalRun {
                    x,
                    fun,
                    success: false,
                    message: format!("Solver failed: {err}"),
                    nit: parameters.len(),
                    nfev,
                    state: SolverState::Failed,
                    parameters,
                })
            }
        },
    }
}

/// Bounded quasi-Newton driver.
///
/// The history holds the starting point followed by one parameter vector per
/// iterate, and one cost per iterate recovered from the iteration trace.
#[derive(Debug, Clone, Default)]
pub struct LocalDriver {
    options: LocalOptions,
    state: SolverState,
}

impl LocalDriver {
    pub fn new(options: LocalOptions) -> Self {
        LocalDriver {
            options,
            state: SolverState::Idle,
        }
    }

    pub fn options(&self) -> &LocalOptions {
        &self.options
    }
}

impl WavefrontOptimizer for LocalDriver {
    fn optimize(
        &mut self,
        context: Arc<ProblemContext>,
        guess: &[f64],
    ) -> Result<OptimizationResult, OptimizationError> {
        context.codex.check_len(guess)?;
        self.options.validate()?;
        let bounds = self.options.resolve_bounds(guess.len())?;

        self.state = SolverState::Running;
        let started = Instant::now();
        let trace = TraceBuffer::new();
        let run = Objective::prepare(context, self.options.parallelism).and_then(|objective| {
            minimize_once(&objective, guess, &self.options, &bounds, &trace, None)
        });
        let run = match run {
            Ok(run) => run,
            Err(err) => {
                self.state = SolverState::Failed;
                return Err(err);
            }
        };
        self.state = run.state;

        let costs = parse_iterate_costs(&trace.contents());
        let mut parameters = Vec::with_capacity(run.parameters.len() + 1);
        parameters.push(bounds.project(guess));
        parameters.extend(run.parameters);
        if costs.len() + 1 != parameters.len() {
            warn!(
                "Iteration trace holds {} costs for {} iterates",
                costs.len(),
                parameters.len() - 1
            );
        }
        debug!("Local trace:\n{}", trace.contents());

        let result = OptimizationResult {
            x: run.x,
            fun: run.fun,
            success: run.success,
            message: run.message,
            nit: run.nit,
            nfev: run.nfev,
            time: started.elapsed().as_secs_f64(),
            provenance: Provenance::Local,
            history: IterationHistory::Local { parameters, costs },
        };
        info!("{result:?}");
        Ok(result)
    }

    fn provenance(&self) -> Provenance {
        Provenance::Local
    }

    fn state(&self) -> SolverState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostPipeline;
    use crate::objective::testing::{recovery_context, spherical_context};

    const TRUTH: [f64; 4] = [0.0, 0.125, 0.0, 0.0];

    fn context() -> Arc<ProblemContext> {
        Arc::new(spherical_context(&TRUTH, CostPipeline::default()))
    }

    fn assert_recovered(x: &[f64]) {
        for (x_i, t) in x.iter().zip(TRUTH) {
            assert!((x_i - t).abs() < 1e-3, "Recovered {x:?}, truth {TRUTH:?}");
        }
    }

    #[test]
    fn test_history_lengths_and_descent() {
        let context = context();
        let objective = Objective::prepare(Arc::clone(&context), Parallelism::Sequential).unwrap();
        let guess = [0.0, 0.05, 0.0, 0.0];
        let initial = objective.value(&guess).unwrap();

        let mut driver = LocalDriver::new(LocalOptions {
            tolerance: 1e-8,
            max_iterations: 30,
            ..LocalOptions::default()
        });
        assert_eq!(driver.state(), SolverState::Idle);
        let result = driver.optimize(context, &guess).unwrap();

        let IterationHistory::Local { parameters, costs } = &result.history else {
            panic!("local driver must produce a local history");
        };
        assert!(!costs.is_empty(), "Trace should record iterates");
        assert_eq!(parameters.len(), costs.len() + 1);
        assert_eq!(parameters[0], guess.to_vec());
        assert!(result.fun <= initial, "{} > {}", result.fun, initial);
        assert!(result.nfev > result.nit);
        assert!(driver.state().is_terminal());
        assert_eq!(result.provenance, Provenance::Local);
    }

    #[test]
    fn test_recovers_primary_spherical() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut driver = LocalDriver::new(LocalOptions {
            tolerance: 1e-12,
            gradient_tolerance: 1e-10,
            max_iterations: 200,
            ..LocalOptions::default()
        });
        let result = driver
            .optimize(Arc::new(recovery_context(&TRUTH)), &[0.0; 4])
            .unwrap();
        assert!(result.fun < 1e-4, "Final cost too high: {}", result.fun);
        assert_recovered(&result.x);
    }

    #[test]
    fn test_loose_tolerance_recovers_on_pool() {
        let mut driver = LocalDriver::new(LocalOptions {
            tolerance: 1e-5,
            max_iterations: 200,
            parallelism: Parallelism::Pool { threads: Some(2) },
            ..LocalOptions::default()
        });
        let result = driver
            .optimize(Arc::new(recovery_context(&TRUTH)), &[0.0; 4])
            .unwrap();
        assert!(result.fun < 1e-4, "Final cost too high: {}", result.fun);
        assert_recovered(&result.x);
    }

    #[test]
    fn test_codex_mismatch_before_optimizer() {
        let mut driver = LocalDriver::default();
        let err = driver.optimize(context(), &[0.0, 0.1, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            OptimizationError::CodexLengthMismatch { codex: 4, params: 3 }
        ));
        // The driver never left Idle.
        assert_eq!(driver.state(), SolverState::Idle);
    }

    #[test]
    fn test_bounds_are_respected() {
        let bounds = Bounds::new(vec![(-0.05, 0.05), (0.0, 0.08), (-0.05, 0.05), (-0.05, 0.05)])
            .unwrap();
        let mut driver = LocalDriver::new(LocalOptions {
            tolerance: 1e-10,
            max_iterations: 50,
            bounds: Some(bounds),
            ..LocalOptions::default()
        });
        let result = driver
            .optimize(Arc::new(recovery_context(&TRUTH)), &[0.0; 4])
            .unwrap();
        assert!(result.x[1] <= 0.08 + 1e-12);
        assert!(result.x[1] > 0.04, "Spherical should move toward its bound, got {:?}", result.x);
        let IterationHistory::Local { parameters, .. } = &result.history else {
            panic!("expected local history");
        };
        assert!(parameters.iter().all(|p| p[1] <= 0.08 + 1e-12));
    }

    #[test]
    fn test_invalid_options() {
        let mut driver = LocalDriver::new(LocalOptions {
            memory: 0,
            ..LocalOptions::default()
        });
        assert!(matches!(
            driver.optimize(context(), &[0.0; 4]),
            Err(OptimizationError::InvalidOptions(_))
        ));
        let mismatched = LocalOptions {
            bounds: Some(Bounds::unbounded(2)),
            ..LocalOptions::default()
        };
        assert!(mismatched.resolve_bounds(4).is_err());
    }
}
