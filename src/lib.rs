//! Wavefront Tools Library
//!
//! Recovers Zernike wavefront coefficients from through-focus MTF measurements.
//! The library provides:
//! - A thin-lens focus model and an autocorrelation-based MTF forward model
//! - Codices mapping parameter vectors to Zernike terms
//! - Cost primitives and a per-plane, frequency-weighted objective
//! - A worker pool for evaluating focus planes in parallel
//! - Local (L-BFGS) and global (basin-hopping) solver drivers built on argmin
//! - Result documents, a JSON document database and a persistent work queue
//!   for running simulated recovery campaigns

pub mod codex;
pub mod cost;
pub mod document;
pub mod objective;
pub mod optics;
pub mod optimization;
pub mod simulation;
pub mod store;
pub mod truth;

// Re-export commonly used types
pub use codex::Codex;
pub use cost::{CostError, CostPipeline, Reducer, Transform};
pub use document::{display_document_summary, prepare_document, ResultDocument};
pub use objective::{Objective, Parallelism, ProblemContext};
pub use optics::{
    AutocorrelationModel, ForwardModel, MtfSamples, OpticsError, SetupParameters, Wavefront,
    ZernikeTerm,
};
pub use optimization::{
    GlobalDriver, GlobalOptions, IterationHistory, LocalDriver, LocalOptions, OptimizationError,
    OptimizationResult, Provenance, SolverState, WavefrontOptimizer,
};
pub use simulation::{run_simulation, SimulationJob, SimulationTemplate, SolverKind, Worker};
pub use store::{Database, PersistentQueue, StoreError};
pub use truth::TruthData;
