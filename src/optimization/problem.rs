//! argmin adapter around the aggregate objective.
//!
//! Box constraints are handled by projection: every evaluation is done at the
//! clamped point, and gradient components that would push a coordinate
//! further outside an active bound are zeroed.

use crate::objective::Objective;
use crate::optimization::history::{CallLog, CallRecord};
use crate::optimization::OptimizationError;
use argmin::core::{CostFunction, Error, Gradient};
use finitediff::FiniteDiff;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const BOUND_EPS: f64 = 1e-12;

/// Lower and upper limits per parameter; infinite limits leave a slot free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    limits: Vec<(f64, f64)>,
}

impl Bounds {
    /// # Errors
    ///
    /// Returns [`OptimizationError::InvalidOptions`] if a lower limit exceeds
    /// its upper limit or a limit is NaN.
    pub fn new(limits: Vec<(f64, f64)>) -> Result<Self, OptimizationError> {
        for (i, (lo, hi)) in limits.iter().enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(OptimizationError::InvalidOptions(format!(
                    "bound {i} is empty: [{lo}, {hi}]"
                )));
            }
        }
        Ok(Bounds { limits })
    }

    pub fn unbounded(len: usize) -> Self {
        Bounds {
            limits: vec![(f64::NEG_INFINITY, f64::INFINITY); len],
        }
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    /// Clamps `params` into the box.
    pub fn project(&self, params: &[f64]) -> Vec<f64> {
        params
            .iter()
            .zip(&self.limits)
            .map(|(&v, &(lo, hi))| v.clamp(lo, hi))
            .collect()
    }

    /// Zeroes gradient components pointing out of an active bound at `params`.
    pub fn project_gradient(&self, params: &[f64], mut gradient: Vec<f64>) -> Vec<f64> {
        for ((g, &x), &(lo, hi)) in gradient.iter_mut().zip(params).zip(&self.limits) {
            if (x <= lo + BOUND_EPS && *g > 0.0) || (x >= hi - BOUND_EPS && *g < 0.0) {
                *g = 0.0;
            }
        }
        gradient
    }

    /// Infinity norm of the projected gradient, as reported in iteration traces.
    pub fn projected_gradient_norm(&self, params: &[f64], gradient: &[f64]) -> f64 {
        self.project_gradient(params, gradient.to_vec())
            .iter()
            .fold(0.0, |acc, g| acc.max(g.abs()))
    }
}

/// Evaluation count and best point seen, shared with the driver while the
/// executor owns the problem.
#[derive(Debug, Default)]
pub struct EvaluationTally {
    evaluations: AtomicUsize,
    best: Mutex<Option<CallRecord>>,
}

impl EvaluationTally {
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Lowest-cost evaluation so far.
    pub fn best(&self) -> Option<CallRecord> {
        self.best.lock().clone()
    }

    fn record(&self, params: &[f64], cost: f64) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let mut best = self.best.lock();
        let improves = match best.as_ref() {
            Some(current) => cost < current.cost,
            None => !cost.is_nan(),
        };
        if improves {
            *best = Some(CallRecord {
                params: params.to_vec(),
                cost,
            });
        }
    }
}

/// The problem handed to the argmin executor.
pub struct WavefrontProblem<'a> {
    objective: &'a Objective,
    bounds: Bounds,
    calls: Option<CallLog>,
    tally: Arc<EvaluationTally>,
}

impl<'a> WavefrontProblem<'a> {
    /// # Arguments
    ///
    /// * `objective` - Prepared objective to minimize.
    /// * `bounds` - Box constraints, one pair per parameter.
    /// * `calls` - When set, every evaluation (including those made for finite
    ///   differences) is appended to this log.
    pub fn new(objective: &'a Objective, bounds: Bounds, calls: Option<CallLog>) -> Self {
        WavefrontProblem {
            objective,
            bounds,
            calls,
            tally: Arc::new(EvaluationTally::default()),
        }
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Handle on the evaluation count and best point, valid after the problem
    /// has been moved into an executor.
    pub fn tally(&self) -> Arc<EvaluationTally> {
        Arc::clone(&self.tally)
    }

    /// Evaluates the objective at the projection of `params`.
    pub fn evaluate(&self, params: &[f64]) -> Result<f64, OptimizationError> {
        let clamped = self.bounds.project(params);
        let cost = self.objective.value(&clamped)?;
        self.tally.record(&clamped, cost);
        if let Some(calls) = &self.calls {
            calls.record(clamped, cost);
        }
        Ok(cost)
    }
}

impl CostFunction for WavefrontProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.evaluate(params)?)
    }
}

impl Gradient for WavefrontProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    /// Central differences at the projected point, with any evaluation error
    /// captured and returned after the sweep.
    fn gradient(&self, params: &Self::Param) -> Result<Self::Gradient, Error> {
        let clamped = self.bounds.project(params);
        let closure_err: RefCell<Option<OptimizationError>> = RefCell::new(None);
        let f = |p: &Vec<f64>| -> f64 {
            match self.evaluate(p) {
                Ok(cost) => cost,
                Err(err) => {
                    closure_err.borrow_mut().get_or_insert(err);
                    f64::NAN
                }
            }
        };
        let gradient = clamped.central_diff(&f);
        if let Some(err) = closure_err.take() {
            return Err(err.into());
        }
        Ok(self.bounds.project_gradient(&clamped, gradient))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostPipeline;
    use crate::objective::testing::spherical_context;
    use crate::objective::Parallelism;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    #[test]
    fn test_bounds_projection() {
        let bounds = Bounds::new(vec![(-1.0, 1.0), (0.0, f64::INFINITY)]).unwrap();
        assert_eq!(bounds.project(&[2.0, -3.0]), vec![1.0, 0.0]);
        assert_eq!(bounds.project(&[0.5, 7.0]), vec![0.5, 7.0]);
        // At the lower bound of slot 1 a positive gradient would push outward.
        assert_eq!(
            bounds.project_gradient(&[0.0, 0.0], vec![0.3, 0.4]),
            vec![0.3, 0.0]
        );
        assert_eq!(
            bounds.project_gradient(&[1.0, 2.0], vec![-0.3, 0.4]),
            vec![0.0, 0.4]
        );
        assert_relative_eq!(bounds.projected_gradient_norm(&[0.0, 0.0], &[-0.3, 0.4]), 0.3);
        assert!(Bounds::new(vec![(1.0, 0.0)]).is_err());
    }

    #[test]
    fn test_problem_logs_every_evaluation() {
        let context = Arc::new(spherical_context(&[0.0, 0.125, 0.0, 0.0], CostPipeline::default()));
        let objective = Objective::prepare(context, Parallelism::Sequential).unwrap();
        let calls = CallLog::new();
        let problem = WavefrontProblem::new(&objective, Bounds::unbounded(4), Some(calls.clone()));

        let x = vec![0.0, 0.1, 0.0, 0.0];
        let cost = problem.cost(&x).unwrap();
        let gradient = problem.gradient(&x).unwrap();
        assert_eq!(gradient.len(), 4);
        // Moving spherical toward the truth lowers the cost.
        assert!(gradient[1] < 0.0, "Gradient should point away from truth");
        // One direct evaluation plus two per parameter for central differences.
        let tally = problem.tally();
        assert_eq!(tally.evaluations(), 9);
        assert_eq!(calls.len(), 9);
        assert_eq!(calls.snapshot()[0].cost, cost);
        let best = tally.best().unwrap();
        assert!(best.cost <= cost);
        assert!(calls.snapshot().iter().all(|c| c.cost >= best.cost));
    }

    #[test]
    fn test_problem_propagates_configuration_errors() {
        let context = Arc::new(spherical_context(&[0.0, 0.125, 0.0, 0.0], CostPipeline::default()));
        let objective = Objective::prepare(context, Parallelism::Sequential).unwrap();
        let problem = WavefrontProblem::new(&objective, Bounds::unbounded(3), None);
        let err = problem.gradient(&vec![0.0, 0.1, 0.0]).unwrap_err();
        let err = err.downcast::<OptimizationError>().unwrap();
        assert!(matches!(err, OptimizationError::CodexLengthMismatch { .. }));
    }
}
