//! The `optimization` module recovers wavefront coefficients from through-focus MTF.
//!
//! This module defines the [`WavefrontOptimizer`] trait, the common interface of
//! the two solver drivers:
//!
//! * [`LocalDriver`] runs a bounded quasi-Newton minimizer (argmin L-BFGS with
//!   numerical gradients) and records the parameter and cost history of every
//!   iteration.
//! * [`GlobalDriver`] wraps the local minimizer in a basin-hopping search and
//!   reconstructs per-restart histories from the raw objective call log.
//!
//! Both drivers evaluate the aggregate objective of [`crate::objective`] and
//! return an [`OptimizationResult`].

use crate::codex::CodexMismatch;
use crate::cost::CostError;
use crate::objective::ProblemContext;
use crate::optics::OpticsError;
use std::sync::Arc;

pub mod global;
pub mod history;
pub mod local;
pub mod problem;
pub mod result;
pub mod trace;

pub use global::{GlobalDriver, GlobalOptions};
pub use local::{LocalDriver, LocalOptions};
pub use result::{IterationHistory, OptimizationResult, Provenance, SolverState};

#[derive(thiserror::Error, Debug)]
pub enum OptimizationError {
    #[error("Codex has {codex} terms but the parameter vector has {params}")]
    CodexLengthMismatch { codex: usize, params: usize },
    #[error(
        "Focus plane {plane}: {azimuth} truth has {found} samples but the frequency grid has {expected}"
    )]
    FrequencyGridMismatch {
        plane: usize,
        azimuth: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Objective evaluated before its shared context was prepared")]
    NotInitialized,
    #[error("Worker has no problem context: {0}")]
    WorkerState(String),
    #[error("Worker pool error: {0}")]
    Pool(String),
    #[error("Invalid solver options: {0}")]
    InvalidOptions(String),
    #[error("Solver error: {0}")]
    Solver(String),
    #[error("Optics error: {0}")]
    Optics(#[from] OpticsError),
    #[error("Cost error: {0}")]
    Cost(#[from] CostError),
}

impl OptimizationError {
    /// Errors caused by a worker seeing stale or missing shared state.
    ///
    /// Callers abandon the current job and requeue it instead of stopping.
    pub fn is_transient(&self) -> bool {
        matches!(self, OptimizationError::WorkerState(_))
    }
}

impl From<CodexMismatch> for OptimizationError {
    fn from(err: CodexMismatch) -> Self {
        OptimizationError::CodexLengthMismatch {
            codex: err.codex,
            params: err.params,
        }
    }
}

impl From<argmin::core::Error> for OptimizationError {
    fn from(err: argmin::core::Error) -> Self {
        OptimizationError::Solver(err.to_string())
    }
}

/// A solver driver that minimizes the aggregate MTF objective.
pub trait WavefrontOptimizer {
    /// Minimizes the objective of `context` starting from `guess`.
    ///
    /// # Arguments
    ///
    /// * `context` - Shared, read-only problem data. The driver builds its own
    ///   worker pool from it and tears the pool down before returning.
    /// * `guess` - Initial coefficients, one per codex slot.
    ///
    /// # Returns
    ///
    /// * `Ok(OptimizationResult)` - Also when the minimizer did not converge;
    ///   check [`OptimizationResult::success`].
    /// * `Err(OptimizationError)` - Configuration, pool or shared-state failures.
    fn optimize(
        &mut self,
        context: Arc<ProblemContext>,
        guess: &[f64],
    ) -> Result<OptimizationResult, OptimizationError>;

    /// Which driver produced the results.
    fn provenance(&self) -> Provenance;

    /// Lifecycle state after the most recent call to [`WavefrontOptimizer::optimize`].
    fn state(&self) -> SolverState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(OptimizationError::WorkerState("stale".to_string()).is_transient());
        assert!(!OptimizationError::NotInitialized.is_transient());
        assert!(!OptimizationError::CodexLengthMismatch { codex: 4, params: 3 }.is_transient());
    }

    #[test]
    fn test_codex_mismatch_conversion() {
        let err: OptimizationError = CodexMismatch { codex: 4, params: 3 }.into();
        assert_eq!(
            err.to_string(),
            "Codex has 4 terms but the parameter vector has 3"
        );
    }
}
