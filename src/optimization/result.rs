//! Results, histories and lifecycle state of the solver drivers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which driver produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Local,
    Global,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Local => write!(f, "local"),
            Provenance::Global => write!(f, "global"),
        }
    }
}

/// Driver lifecycle: `Idle → Running → {Converged, MaxIterationsReached, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverState {
    #[default]
    Idle,
    Running,
    Converged,
    MaxIterationsReached,
    Failed,
}

impl SolverState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SolverState::Converged | SolverState::MaxIterationsReached | SolverState::Failed
        )
    }
}

/// Parameter and cost history of a run.
///
/// Local runs hold one flat history whose parameter list starts with the guess,
/// so it is one entry longer than the cost list. Global runs hold one segment per
/// restart, with equal parameter and cost lengths in every segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IterationHistory {
    Local {
        parameters: Vec<Vec<f64>>,
        costs: Vec<f64>,
    },
    Global {
        parameters: Vec<Vec<Vec<f64>>>,
        costs: Vec<Vec<f64>>,
    },
}

impl IterationHistory {
    /// Total number of recorded iterate costs.
    pub fn cost_count(&self) -> usize {
        match self {
            IterationHistory::Local { costs, .. } => costs.len(),
            IterationHistory::Global { costs, .. } => costs.iter().map(Vec::len).sum(),
        }
    }

    /// First recorded cost, if any.
    pub fn first_cost(&self) -> Option<f64> {
        match self {
            IterationHistory::Local { costs, .. } => costs.first().copied(),
            IterationHistory::Global { costs, .. } => costs.iter().flatten().next().copied(),
        }
    }

    /// Last recorded cost, if any.
    pub fn last_cost(&self) -> Option<f64> {
        match self {
            IterationHistory::Local { costs, .. } => costs.last().copied(),
            IterationHistory::Global { costs, .. } => costs.iter().flatten().last().copied(),
        }
    }

    /// Every recorded parameter vector in order, regardless of segmentation.
    pub fn flat_parameters(&self) -> Vec<&[f64]> {
        match self {
            IterationHistory::Local { parameters, .. } => {
                parameters.iter().map(Vec::as_slice).collect()
            }
            IterationHistory::Global { parameters, .. } => {
                parameters.iter().flatten().map(Vec::as_slice).collect()
            }
        }
    }
}

/// Outcome of one driver run. Non-convergence is reported through `success`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Best parameter vector.
    pub x: Vec<f64>,
    /// Objective value at `x`.
    pub fun: f64,
    pub success: bool,
    pub message: String,
    /// Iterations (local) or hops (global).
    pub nit: usize,
    /// Objective evaluations, including those spent on finite differences.
    pub nfev: usize,
    /// Wall-clock seconds.
    pub time: f64,
    pub provenance: Provenance,
    pub history: IterationHistory,
}

impl fmt::Debug for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult Summary:\n provenance: {}\n success: {} ({})\n x: {:?}\n fun: {:e}\n nit: {}, nfev: {}, time: {:.3}s",
            self.provenance,
            self.success,
            self.message,
            self.x,
            self.fun,
            self.nit,
            self.nfev,
            self.time
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_accessors() {
        let local = IterationHistory::Local {
            parameters: vec![vec![0.0], vec![0.5], vec![1.0]],
            costs: vec![0.25, 0.0],
        };
        assert_eq!(local.cost_count(), 2);
        assert_eq!(local.first_cost(), Some(0.25));
        assert_eq!(local.last_cost(), Some(0.0));
        assert_eq!(local.flat_parameters().len(), 3);

        let global = IterationHistory::Global {
            parameters: vec![vec![vec![1.0]], vec![], vec![vec![2.0], vec![3.0]]],
            costs: vec![vec![0.5], vec![], vec![0.2, 0.1]],
        };
        assert_eq!(global.cost_count(), 3);
        assert_eq!(global.first_cost(), Some(0.5));
        assert_eq!(global.last_cost(), Some(0.1));
        assert_eq!(global.flat_parameters(), vec![&[1.0][..], &[2.0][..], &[3.0][..]]);
    }

    #[test]
    fn test_state_and_provenance() {
        assert_eq!(SolverState::default(), SolverState::Idle);
        assert!(!SolverState::Running.is_terminal());
        assert!(SolverState::Failed.is_terminal());
        assert_eq!(Provenance::Global.to_string(), "global");
        assert_eq!(serde_json::to_string(&Provenance::Local).unwrap(), "\"local\"");
    }
}
