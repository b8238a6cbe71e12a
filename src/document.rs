//! Flat result records for simulated wavefront recoveries.
//!
//! [`prepare_document`] turns an [`OptimizationResult`] plus the run metadata
//! into a [`ResultDocument`]. Residual RMS wavefront errors compare each iterate
//! against the known truth, so documents only make sense for simulated runs.

use crate::codex::Codex;
use crate::cost::CostPipeline;
use crate::optics::{Pupil, SetupParameters, Wavefront};
use crate::optimization::{IterationHistory, OptimizationError, OptimizationResult, Provenance};
use serde::{Deserialize, Serialize};

/// Residual RMS wavefront error per iterate, shaped like the parameter history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResidualHistory {
    Local(Vec<f64>),
    Global(Vec<Vec<f64>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub setup: SetupParameters,
    pub codex: Codex,
    pub truth_params: Vec<f64>,
    /// RMS wavefront error of the truth, in waves.
    pub truth_rms: f64,
    pub normed: bool,
    pub pipeline: String,
    pub provenance: Provenance,
    pub final_params: Vec<f64>,
    pub history: IterationHistory,
    pub residual_rms: ResidualHistory,
    pub first_cost: f64,
    pub final_cost: f64,
    pub first_rms: f64,
    pub final_rms: f64,
    pub time: f64,
    pub nit: usize,
    pub nfev: usize,
    pub success: bool,
    pub message: String,
}

/// Computes residual RMS errors against one truth wavefront.
struct ResidualEvaluator<'a> {
    codex: &'a Codex,
    truth: Wavefront,
    samples: usize,
    rms_norm: bool,
}

impl<'a> ResidualEvaluator<'a> {
    fn new(
        codex: &'a Codex,
        truth_params: &[f64],
        samples: usize,
        rms_norm: bool,
    ) -> Result<Self, OptimizationError> {
        Ok(ResidualEvaluator {
            codex,
            truth: codex.to_wavefront(truth_params, 0.0, rms_norm)?,
            samples,
            rms_norm,
        })
    }

    fn truth_rms(&self) -> Result<f64, OptimizationError> {
        Ok(Pupil::from_wavefront(&self.truth, self.samples)?.rms())
    }

    fn residual(&self, params: &[f64]) -> Result<f64, OptimizationError> {
        let estimate = self.codex.to_wavefront(params, 0.0, self.rms_norm)?;
        let residual = self.truth.difference(&estimate)?;
        Ok(Pupil::from_wavefront(&residual, self.samples)?.rms())
    }

    fn residuals(&self, params: &[Vec<f64>]) -> Result<Vec<f64>, OptimizationError> {
        params.iter().map(|p| self.residual(p)).collect()
    }
}

/// Assembles the result document of one run.
///
/// # Arguments
///
/// * `setup` - Setup the truth was simulated with.
/// * `codex` - Codex shared by the truth and the solution.
/// * `truth_params` - Coefficients the truth was generated from.
/// * `pipeline` - Cost pipeline of the run.
/// * `result` - Driver output.
///
/// # Errors
///
/// Returns [`OptimizationError::CodexLengthMismatch`] if the truth or any
/// recorded iterate does not fit the codex.
pub fn prepare_document(
    setup: &SetupParameters,
    codex: &Codex,
    truth_params: &[f64],
    pipeline: &CostPipeline,
    result: OptimizationResult,
) -> Result<ResultDocument, OptimizationError> {
    let evaluator = ResidualEvaluator::new(codex, truth_params, setup.samples, setup.focus_normed)?;
    let residual_rms = match &result.history {
        IterationHistory::Local { parameters, .. } => {
            ResidualHistory::Local(evaluator.residuals(parameters)?)
        }
        IterationHistory::Global { parameters, .. } => ResidualHistory::Global(
            parameters
                .iter()
                .map(|segment| evaluator.residuals(segment))
                .collect::<Result<_, _>>()?,
        ),
    };
    let first_rms = match result.history.flat_parameters().first() {
        Some(first) => evaluator.residual(first)?,
        None => evaluator.residual(&result.x)?,
    };

    Ok(ResultDocument {
        setup: setup.clone(),
        codex: codex.clone(),
        truth_params: truth_params.to_vec(),
        truth_rms: evaluator.truth_rms()?,
        normed: setup.focus_normed,
        pipeline: pipeline.describe(),
        provenance: result.provenance,
        first_cost: result.history.first_cost().unwrap_or(result.fun),
        final_cost: result.fun,
        first_rms,
        final_rms: evaluator.residual(&result.x)?,
        final_params: result.x,
        history: result.history,
        residual_rms,
        time: result.time,
        nit: result.nit,
        nfev: result.nfev,
        success: result.success,
        message: result.message,
    })
}

/// Prints a human-readable summary of a document.
pub fn display_document_summary(doc: &ResultDocument) {
    println!("\n📊 Wavefront Recovery ({}):", doc.provenance);
    println!("  Codex: {:?}", doc.codex.labels());
    println!("  Truth: {:?}", doc.truth_params);
    println!("  Final: {:?}", doc.final_params);
    println!("  Truth RMS WFE: {:.6} waves", doc.truth_rms);
    println!(
        "  Residual RMS WFE: {:.6} → {:.6} waves",
        doc.first_rms, doc.final_rms
    );
    println!("  Cost: {:e} → {:e}", doc.first_cost, doc.final_cost);
    println!(
        "  Iterations: {}, evaluations: {}, time: {:.2}s",
        doc.nit, doc.nfev, doc.time
    );
    println!("  Converged: {} ({})", doc.success, doc.message);
}
