//! Per-plane evaluator and the aggregate through-focus objective.
//!
//! A [`ProblemContext`] holds everything an evaluation reads: setup, codex,
//! truth curves, the diffraction-limited curve, the cost pipeline and the
//! forward model. It is built once, wrapped in an `Arc`, and never mutated.
//! [`Objective`] maps a parameter vector to one scalar by evaluating every
//! focus plane, sequentially or on a [`WorkerPool`].

use crate::codex::Codex;
use crate::cost::{CostPipeline, DifferencePair};
use crate::optics::{diffraction_limited_mtf, ForwardModel, SetupParameters};
use crate::optimization::OptimizationError;
use crate::truth::TruthData;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod pool;

pub use pool::WorkerPool;

/// Read-only data shared by every objective evaluation of one run.
pub struct ProblemContext {
    pub setup: SetupParameters,
    pub codex: Codex,
    pub truth: TruthData,
    pub pipeline: CostPipeline,
    /// Diffraction-limited MTF at `setup.freqs`.
    pub diffraction: Vec<f64>,
    model: Arc<dyn ForwardModel>,
}

impl ProblemContext {
    /// Validates the inputs and precomputes the diffraction-limited curve.
    ///
    /// # Errors
    ///
    /// * [`OptimizationError::Optics`] if the setup is invalid.
    /// * [`OptimizationError::FrequencyGridMismatch`] if any truth curve does
    ///   not have one sample per setup frequency.
    pub fn new(
        setup: SetupParameters,
        codex: Codex,
        truth: TruthData,
        pipeline: CostPipeline,
        model: Arc<dyn ForwardModel>,
    ) -> Result<Self, OptimizationError> {
        setup.validate_params()?;
        let expected = setup.freqs.len();
        for plane in 0..truth.planes() {
            let curves = [("tangential", &truth.tan[plane]), ("sagittal", &truth.sag[plane])];
            for (azimuth, curve) in curves {
                if curve.len() != expected {
                    return Err(OptimizationError::FrequencyGridMismatch {
                        plane,
                        azimuth,
                        expected,
                        found: curve.len(),
                    });
                }
            }
        }
        let diffraction = diffraction_limited_mtf(setup.fno, setup.wavelength, &setup.freqs);
        Ok(ProblemContext {
            setup,
            codex,
            truth,
            pipeline,
            diffraction,
            model,
        })
    }

    pub fn model(&self) -> &dyn ForwardModel {
        self.model.as_ref()
    }

    pub fn planes(&self) -> usize {
        self.truth.planes()
    }

    /// Cost of focus plane `plane` for `params`.
    pub fn evaluate_plane(&self, params: &[f64], plane: usize) -> Result<f64, OptimizationError> {
        let focus_plane = FocusPlane {
            index: plane,
            defocus: self.truth.focus_diversity[plane],
            truth_tan: &self.truth.tan[plane],
            truth_sag: &self.truth.sag[plane],
        };
        evaluate_focus_plane(
            self.model(),
            &self.setup,
            &self.codex,
            params,
            focus_plane,
            &self.pipeline,
            &self.diffraction,
        )
    }
}

impl fmt::Debug for ProblemContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProblemContext Summary:\n codex: {:?}\n planes: {}, freqs: {}, pipeline: {}",
            self.codex.labels(),
            self.planes(),
            self.setup.freqs.len(),
            self.pipeline.describe()
        )
    }
}

/// Truth data and defocus of one focus plane.
#[derive(Debug, Clone, Copy)]
pub struct FocusPlane<'a> {
    pub index: usize,
    /// Defocus added to the Z4 slot, in Z4 coefficient units.
    pub defocus: f64,
    pub truth_tan: &'a [f64],
    pub truth_sag: &'a [f64],
}

/// Simulates one focus plane and scores it against its truth curves.
///
/// The plane's defocus is added on top of any Z4 coefficient in `params`.
///
/// # Errors
///
/// * [`OptimizationError::CodexLengthMismatch`] if `params` does not fit the codex.
/// * [`OptimizationError::FrequencyGridMismatch`] if the simulated and truth
///   curves differ in length.
/// * Forward-model and cost errors are propagated.
pub fn evaluate_focus_plane(
    model: &dyn ForwardModel,
    setup: &SetupParameters,
    codex: &Codex,
    params: &[f64],
    plane: FocusPlane<'_>,
    pipeline: &CostPipeline,
    diffraction: &[f64],
) -> Result<f64, OptimizationError> {
    let wavefront = codex.to_wavefront(params, plane.defocus, setup.focus_normed)?;
    let simulated = model.mtf_ts(setup, &wavefront)?;
    for (azimuth, truth, sim) in [
        ("tangential", plane.truth_tan, &simulated.tan),
        ("sagittal", plane.truth_sag, &simulated.sag),
    ] {
        if truth.len() != sim.len() {
            return Err(OptimizationError::FrequencyGridMismatch {
                plane: plane.index,
                azimuth,
                expected: sim.len(),
                found: truth.len(),
            });
        }
    }
    let pair = DifferencePair::new(
        plane.truth_tan,
        plane.truth_sag,
        &simulated.tan,
        &simulated.sag,
    )?;
    Ok(pipeline.apply(pair, diffraction)?)
}

/// Averages per-plane costs so grids of different density give comparable values.
///
/// Returns `Δν / (N · ν_max) · Σ costs`, where `Δν` is the spacing of the first
/// two frequencies, `ν_max` the last frequency and `N` the plane count.
pub fn average_focus_planes(costs: &[f64], freqs: &[f64]) -> f64 {
    let (Some(first), Some(second), Some(last)) = (freqs.first(), freqs.get(1), freqs.last())
    else {
        return costs.iter().sum();
    };
    if costs.is_empty() {
        return 0.0;
    }
    let coefficient = (second - first) / (costs.len() as f64 * last);
    coefficient * costs.iter().sum::<f64>()
}

/// How focus planes of one evaluation are distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parallelism {
    #[default]
    Sequential,
    /// Fixed-size worker pool; `None` uses all logical cores but one.
    Pool { threads: Option<usize> },
}

/// The aggregate objective of one optimization run.
///
/// An `Objective` either holds a prepared context (and optionally a worker
/// pool) or is uninitialized; evaluating an uninitialized objective fails with
/// [`OptimizationError::NotInitialized`]. Dropping it tears the pool down.
#[derive(Default)]
pub struct Objective {
    context: Option<Arc<ProblemContext>>,
    pool: Option<WorkerPool>,
}

impl Objective {
    /// An objective with no shared state.
    pub fn uninitialized() -> Self {
        Objective::default()
    }

    /// Shares `context` with the coordinating thread and, for
    /// [`Parallelism::Pool`], with every worker of a freshly spawned pool.
    pub fn prepare(
        context: Arc<ProblemContext>,
        parallelism: Parallelism,
    ) -> Result<Self, OptimizationError> {
        let pool = match parallelism {
            Parallelism::Sequential => None,
            Parallelism::Pool { threads } => {
                let threads = threads.unwrap_or_else(pool::default_pool_size);
                Some(WorkerPool::spawn(&context, threads)?)
            }
        };
        debug!("Objective prepared: {context:?}");
        Ok(Objective {
            context: Some(context),
            pool,
        })
    }

    pub fn context(&self) -> Option<&Arc<ProblemContext>> {
        self.context.as_ref()
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    /// Per-plane costs in plane order.
    pub fn plane_costs(&self, params: &[f64]) -> Result<Vec<f64>, OptimizationError> {
        let context = self
            .context
            .as_ref()
            .ok_or(OptimizationError::NotInitialized)?;
        context.codex.check_len(params)?;
        match &self.pool {
            Some(pool) => pool.evaluate_planes(params),
            None => (0..context.planes())
                .map(|plane| context.evaluate_plane(params, plane))
                .collect(),
        }
    }

    /// Scalar cost of `params`.
    pub fn value(&self, params: &[f64]) -> Result<f64, OptimizationError> {
        let costs = self.plane_costs(params)?;
        let freqs = &self
            .context
            .as_ref()
            .ok_or(OptimizationError::NotInitialized)?
            .setup
            .freqs;
        Ok(average_focus_planes(&costs, freqs))
    }

    /// Releases the pool and the shared context.
    pub fn teardown(&mut self) {
        if let Some(pool) = self.pool.take() {
            debug!("Tearing down worker pool of {} threads", pool.threads());
        }
        self.context = None;
    }
}

impl Drop for Objective {
    fn drop(&mut self) {
        self.teardown();
    }
}
