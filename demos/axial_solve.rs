//! Axial Wavefront Recovery Example
//!
//! Simulates through-focus MTF for a known set of Zernike coefficients and
//! recovers them with either the local or the global solver.
//!
//! Usage:
//! ```bash
//! cargo run --example axial_solve -- \
//!   --setup-path samples/axial_f2.yaml \
//!   --solver global \
//!   --truth 0.0,0.125,0.0,0.0 \
//!   --output-path output/axial_f2.json
//! ```

use clap::Parser;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::{error, info};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use wavefront_tools::cost::CostPipeline;
use wavefront_tools::document::display_document_summary;
use wavefront_tools::objective::Parallelism;
use wavefront_tools::optimization::{GlobalOptions, LocalOptions};
use wavefront_tools::simulation::{run_simulation, SolverKind};
use wavefront_tools::{AutocorrelationModel, Codex, SetupParameters};

/// Axial wavefront recovery from simulated through-focus MTF
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML file with a `setup` section and a `codex` list
    #[arg(short = 's', long)]
    setup_path: PathBuf,

    /// Solver to run: local or global
    #[arg(long, default_value = "local")]
    solver: String,

    /// Truth coefficients in waves, one per codex term
    #[arg(short = 't', long, value_delimiter = ',', allow_hyphen_values = true)]
    truth: Vec<f64>,

    /// Starting guess; zeros when omitted
    #[arg(short = 'g', long, value_delimiter = ',', allow_hyphen_values = true)]
    guess: Option<Vec<f64>>,

    /// Convergence tolerance on the cost change
    #[arg(long, default_value_t = 1e-6)]
    tolerance: f64,

    /// Normalize residuals by the diffraction-limited MTF
    #[arg(long)]
    diffraction_weighted: bool,

    /// Worker threads for focus-plane evaluation; 1 evaluates sequentially
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Where to write the result document as JSON
    #[arg(short = 'o', long)]
    output_path: Option<PathBuf>,
}

fn solver_from_cli(cli: &Cli) -> Result<SolverKind, Box<dyn std::error::Error>> {
    let local = LocalOptions {
        tolerance: cli.tolerance,
        parallelism: if cli.threads > 1 {
            Parallelism::Pool {
                threads: Some(cli.threads),
            }
        } else {
            Parallelism::Sequential
        },
        ..LocalOptions::default()
    };
    match cli.solver.as_str() {
        "local" => Ok(SolverKind::Local(local)),
        "global" => Ok(SolverKind::Global(GlobalOptions {
            target_cost: cli.tolerance,
            local,
            ..GlobalOptions::default()
        })),
        other => {
            error!("Unsupported solver: {}", other);
            Err("Unsupported solver".into())
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();
    let setup_path = cli.setup_path.to_str().ok_or("Setup path is not valid UTF-8")?;
    let setup = SetupParameters::load_from_yaml(setup_path)?;
    let codex = Codex::load_from_yaml(setup_path)?;
    info!("Loaded setup {:?} with codex {:?}", setup, codex.labels());

    let guess = cli.guess.clone().unwrap_or_else(|| vec![0.0; codex.len()]);
    let pipeline = if cli.diffraction_weighted {
        CostPipeline::diffraction_weighted()
    } else {
        CostPipeline::default()
    };
    let solver = solver_from_cli(&cli)?;

    let document = run_simulation(
        Arc::new(AutocorrelationModel),
        &setup,
        &codex,
        &cli.truth,
        &guess,
        &solver,
        &pipeline,
    )?;
    display_document_summary(&document);

    if let Some(path) = &cli.output_path {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&document)?)?;
        info!("Saved result document to {}", path.display());
    }
    Ok(())
}
