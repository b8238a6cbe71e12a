//! Global driver: basin hopping around the local L-BFGS minimizer.
//!
//! Each hop perturbs the current point uniformly within `±step_size`, runs a
//! local minimization from there and accepts the new basin with the
//! Metropolis criterion at `temperature`. The step size adapts every
//! `interval` hops towards an acceptance rate of one half.
//!
//! Hops only report their final point, so per-restart histories are rebuilt
//! afterwards: the iteration trace gives the iterate costs of every local run
//! and the raw call log is split to match them (see [`super::history`]).

use crate::objective::{Objective, ProblemContext};
use crate::optimization::history::{partition_calls, CallLog};
use crate::optimization::local::{minimize_once, LocalOptions, LocalRun};
use crate::optimization::result::{IterationHistory, OptimizationResult, Provenance, SolverState};
use crate::optimization::trace::{parse_iterate_costs, split_runs, TraceBuffer};
use crate::optimization::{OptimizationError, WavefrontOptimizer};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

const TARGET_ACCEPT_RATE: f64 = 0.5;
const STEP_FACTOR: f64 = 0.9;

/// Settings of the basin-hopping search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalOptions {
    /// Options of every local minimization.
    pub local: LocalOptions,
    /// Stop once this many local minimizations (including the first) have run.
    pub max_starts: usize,
    /// Upper limit on the number of hops.
    pub hops: usize,
    /// Half-width of the uniform perturbation.
    pub step_size: f64,
    /// Metropolis temperature; zero accepts only improvements.
    pub temperature: f64,
    /// Hops between step-size adjustments.
    pub interval: usize,
    pub seed: u64,
    /// Stop once a hop finds a minimum below this cost.
    pub target_cost: f64,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        let local = LocalOptions::default();
        GlobalOptions {
            target_cost: local.tolerance,
            local,
            max_starts: 100,
            hops: 100,
            step_size: 0.05,
            temperature: 75.0,
            interval: 2,
            seed: 1234,
        }
    }
}

impl GlobalOptions {
    /// # Errors
    ///
    /// Returns [`OptimizationError::InvalidOptions`] for invalid local options,
    /// a non-positive step, a negative temperature or a zero interval.
    pub fn validate(&self) -> Result<(), OptimizationError> {
        self.local.validate()?;
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(OptimizationError::InvalidOptions(format!(
                "step size must be positive, got {}",
                self.step_size
            )));
        }
        if !(self.temperature.is_finite() && self.temperature >= 0.0) {
            return Err(OptimizationError::InvalidOptions(format!(
                "temperature must be non-negative, got {}",
                self.temperature
            )));
        }
        if self.interval == 0 {
            return Err(OptimizationError::InvalidOptions(
                "step adjustment interval must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metropolis acceptance of a move from `current` to `candidate`.
///
/// `draw` is a uniform sample from `[0, 1)`.
pub fn metropolis_accept(current: f64, candidate: f64, temperature: f64, draw: f64) -> bool {
    if candidate < current {
        return true;
    }
    if temperature <= 0.0 || candidate.is_nan() {
        return false;
    }
    (-(candidate - current) / temperature).exp() >= draw
}

/// Step size after an interval with acceptance rate `rate`.
pub fn adjust_step(step: f64, rate: f64) -> f64 {
    if rate > TARGET_ACCEPT_RATE {
        step / STEP_FACTOR
    } else {
        step * STEP_FACTOR
    }
}

/// Basin-hopping driver.
#[derive(Debug, Clone, Default)]
pub struct GlobalDriver {
    options: GlobalOptions,
    state: SolverState,
}

impl GlobalDriver {
    pub fn new(options: GlobalOptions) -> Self {
        GlobalDriver {
            options,
            state: SolverState::Idle,
        }
    }

    pub fn options(&self) -> &GlobalOptions {
        &self.options
    }

    fn search(
        &self,
        objective: &Objective,
        guess: &[f64],
        trace: &TraceBuffer,
        calls: &CallLog,
    ) -> Result<(LocalRun, usize, String), OptimizationError> {
        let options = &self.options;
        let bounds = options.local.resolve_bounds(guess.len())?;
        let mut rng = StdRng::seed_from_u64(options.seed);
        let minimize = |start: &[f64]| {
            minimize_once(objective, start, &options.local, &bounds, trace, Some(calls.clone()))
        };

        let first = minimize(guess)?;
        let mut current = (first.x.clone(), first.fun);
        let mut best = first;
        let mut step = options.step_size;
        let mut accepted = 0usize;
        let mut starts = 1usize;
        let mut hops = 0usize;
        let mut message = "requested number of basinhopping iterations completed successfully"
            .to_string();

        while hops < options.hops {
            hops += 1;
            let trial: Vec<f64> = current
                .0
                .iter()
                .map(|x| x + rng.gen_range(-step..step))
                .collect();
            let run = minimize(&bounds.project(&trial))?;
            starts += 1;

            let accept = metropolis_accept(current.1, run.fun, options.temperature, rng.gen::<f64>());
            debug!(
                "Hop {hops}: f = {:e}, accepted = {accept}, step = {step:.4}",
                run.fun
            );
            if accept {
                current = (run.x.clone(), run.fun);
                accepted += 1;
            }
            let found = run.fun;
            if run.fun < best.fun || best.fun.is_nan() {
                best = run;
            }

            if hops % options.interval == 0 {
                step = adjust_step(step, accepted as f64 / options.interval as f64);
                accepted = 0;
            }

            if found < options.target_cost {
                message = format!("cost {found:e} below target {:e}", options.target_cost);
                break;
            }
            if starts >= options.max_starts {
                message = format!("reached {starts} starts");
                break;
            }
        }
        Ok((best, hops, message))
    }
}

impl WavefrontOptimizer for GlobalDriver {
    fn optimize(
        &mut self,
        context: Arc<ProblemContext>,
        guess: &[f64],
    ) -> Result<OptimizationResult, OptimizationError> {
        context.codex.check_len(guess)?;
        self.options.validate()?;

        self.state = SolverState::Running;
        let started = Instant::now();
        let trace = TraceBuffer::new();
        let calls = CallLog::new();
        let outcome = Objective::prepare(context, self.options.local.parallelism)
            .and_then(|objective| self.search(&objective, guess, &trace, &calls));
        let (best, hops, message) = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                self.state = SolverState::Failed;
                return Err(err);
            }
        };
        self.state = if best.success {
            SolverState::Converged
        } else {
            best.state
        };

        let contents = trace.contents();
        let costs: Vec<Vec<f64>> = split_runs(&contents)
            .into_iter()
            .map(parse_iterate_costs)
            .collect();
        let parameters = partition_calls(&calls.snapshot(), &costs);

        let result = OptimizationResult {
            x: best.x,
            fun: best.fun,
            success: best.success,
            message,
            nit: hops,
            nfev: calls.len(),
            time: started.elapsed().as_secs_f64(),
            provenance: Provenance::Global,
            history: IterationHistory::Global { parameters, costs },
        };
        info!("{result:?}");
        Ok(result)
    }

    fn provenance(&self) -> Provenance {
        Provenance::Global
    }

    fn state(&self) -> SolverState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostPipeline;
    use crate::objective::testing::spherical_context;
    use crate::objective::Parallelism;
    use approx::assert_relative_eq;

    const TRUTH: [f64; 4] = [0.0, 0.125, 0.0, 0.0];

    fn options(hops: usize) -> GlobalOptions {
        GlobalOptions {
            local: LocalOptions {
                tolerance: 1e-6,
                max_iterations: 15,
                ..LocalOptions::default()
            },
            hops,
            target_cost: 0.0,
            ..GlobalOptions::default()
        }
    }

    #[test]
    fn test_metropolis_and_step_rules() {
        assert!(metropolis_accept(1.0, 0.5, 0.0, 0.99));
        assert!(!metropolis_accept(1.0, 1.5, 0.0, 0.0));
        // exp(-0.5 / 1) ≈ 0.607
        assert!(metropolis_accept(1.0, 1.5, 1.0, 0.6));
        assert!(!metropolis_accept(1.0, 1.5, 1.0, 0.61));
        assert!((adjust_step(0.09, 1.0) - 0.1).abs() < 1e-15);
        assert!((adjust_step(0.1, 0.5) - 0.09).abs() < 1e-15);
    }

    #[test]
    fn test_segment_lengths_match_cost_histories() {
        let context = Arc::new(spherical_context(&TRUTH, CostPipeline::default()));
        let mut driver = GlobalDriver::new(options(2));
        let result = driver.optimize(context, &[0.0, 0.05, 0.0, 0.0]).unwrap();

        let IterationHistory::Global { parameters, costs } = &result.history else {
            panic!("global driver must produce a global history");
        };
        // The first local run plus one per hop.
        assert_eq!(costs.len(), 3);
        assert_eq!(parameters.len(), costs.len());
        for (segment, history) in parameters.iter().zip(costs) {
            assert_eq!(segment.len(), history.len());
        }
        assert_eq!(result.nit, 2);
        assert!(result.nfev >= result.history.cost_count());
        assert_eq!(result.provenance, Provenance::Global);
        assert!(driver.state().is_terminal());
    }

    #[test]
    fn test_pooled_segments_reproduce_their_costs() {
        let context = Arc::new(spherical_context(&TRUTH, CostPipeline::default()));
        let mut pooled = options(3);
        pooled.local.parallelism = Parallelism::Pool { threads: Some(2) };
        let mut driver = GlobalDriver::new(pooled);
        let result = driver
            .optimize(Arc::clone(&context), &[0.0, 0.05, 0.0, 0.0])
            .unwrap();

        let IterationHistory::Global { parameters, costs } = &result.history else {
            panic!("expected global history");
        };
        assert_eq!(costs.len(), 4);
        assert!(costs.iter().all(|history| !history.is_empty()));
        let objective = Objective::prepare(context, Parallelism::Sequential).unwrap();
        for (segment, history) in parameters.iter().zip(costs) {
            assert_eq!(segment.len(), history.len());
            for (params, &cost) in segment.iter().zip(history) {
                // Trace costs carry nine significant digits.
                assert_relative_eq!(
                    objective.value(params).unwrap(),
                    cost,
                    epsilon = 1e-15,
                    max_relative = 1e-6
                );
            }
        }
    }

    #[test]
    fn test_early_stop_by_target_and_starts() {
        let context = Arc::new(spherical_context(&TRUTH, CostPipeline::default()));

        let mut by_target = GlobalDriver::new(GlobalOptions {
            target_cost: f64::INFINITY,
            ..options(10)
        });
        let result = by_target.optimize(Arc::clone(&context), &[0.0; 4]).unwrap();
        assert_eq!(result.nit, 1, "Callback never runs before the first hop");

        let mut by_starts = GlobalDriver::new(GlobalOptions {
            max_starts: 3,
            ..options(10)
        });
        let result = by_starts.optimize(context, &[0.0; 4]).unwrap();
        assert_eq!(result.nit, 2);
        let IterationHistory::Global { costs, .. } = &result.history else {
            panic!("expected global history");
        };
        assert_eq!(costs.len(), 3);
    }

    #[test]
    fn test_best_point_not_worse_than_first_run() {
        let context = Arc::new(spherical_context(&TRUTH, CostPipeline::default()));
        let objective = Objective::prepare(Arc::clone(&context), Default::default()).unwrap();
        let guess = [0.0, 0.05, 0.0, 0.0];
        let initial = objective.value(&guess).unwrap();
        let mut driver = GlobalDriver::new(options(3));
        let result = driver.optimize(context, &guess).unwrap();
        assert!(result.fun <= initial);
        assert!((objective.value(&result.x).unwrap() - result.fun).abs() < 1e-12);
    }

    #[test]
    fn test_codex_mismatch_before_optimizer() {
        let context = Arc::new(spherical_context(&TRUTH, CostPipeline::default()));
        let mut driver = GlobalDriver::default();
        assert!(matches!(
            driver.optimize(context, &[0.0; 3]),
            Err(OptimizationError::CodexLengthMismatch { codex: 4, params: 3 })
        ));
        assert_eq!(driver.state(), SolverState::Idle);
    }
}
