//! Simulation Campaign Worker Example
//!
//! Fills a persistent queue with random spherical truths, then drains it into
//! a document database. Stopping and restarting the worker resumes where it
//! left off.
//!
//! Usage:
//! ```bash
//! cargo run --example queue_worker -- \
//!   --setup-path samples/axial_f2.yaml \
//!   --campaign-dir output/campaign \
//!   --fill 20 --jobs 5
//! ```

use clap::Parser;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use wavefront_tools::cost::CostPipeline;
use wavefront_tools::optimization::LocalOptions;
use wavefront_tools::simulation::{
    generate_random_axial_truth, SimulationTemplate, SolverKind, WorkBudget, Worker,
};
use wavefront_tools::store::{Database, PersistentQueue};
use wavefront_tools::{AutocorrelationModel, Codex, SetupParameters};

const INDEX_FIELDS: [&str; 7] = [
    "provenance",
    "truth_rms",
    "first_rms",
    "final_rms",
    "final_cost",
    "nit",
    "success",
];

/// Queue-driven simulation worker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML file with a `setup` section and a `codex` list
    #[arg(short = 's', long)]
    setup_path: PathBuf,

    /// Directory holding the queue and the database
    #[arg(short = 'c', long)]
    campaign_dir: PathBuf,

    /// Number of random truths to enqueue before working
    #[arg(long, default_value_t = 0)]
    fill: usize,

    /// Peak coefficient magnitude of random truths, in waves
    #[arg(long, default_value_t = 0.1)]
    peak: f64,

    /// Seed for truth generation
    #[arg(long, default_value_t = 1234)]
    seed: u64,

    /// Stop after this many jobs
    #[arg(long)]
    jobs: Option<usize>,

    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<u64>,

    /// Use the global solver instead of the local one
    #[arg(long)]
    global: bool,
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

    let mut queue: PersistentQueue<Vec<f64>> =
        PersistentQueue::open(cli.campaign_dir.join("queue.json"), false)?;
    if cli.fill > 0 {
        let mut rng = StdRng::seed_from_u64(cli.seed);
        queue.put_many(generate_random_axial_truth(
            &codex, cli.peak, cli.fill, true, &mut rng,
        ))?;
        info!("Enqueued {} truths", cli.fill);
    }

    let db_path = cli.campaign_dir.join("database");
    let database = if db_path.join("index.csv").is_file() {
        Database::open(&db_path)?
    } else {
        Database::create(&db_path, &INDEX_FIELDS, false)?
    };

    let budget = match (cli.jobs, cli.seconds) {
        (Some(jobs), _) => WorkBudget::Jobs(jobs),
        (None, Some(seconds)) => WorkBudget::Time(Duration::from_secs(seconds)),
        (None, None) => WorkBudget::Jobs(queue.len().max(1)),
    };
    let solver = if cli.global {
        SolverKind::default()
    } else {
        SolverKind::Local(LocalOptions::default())
    };
    let template = SimulationTemplate {
        model: Arc::new(AutocorrelationModel),
        guess: vec![0.0; codex.len()],
        setup,
        codex,
        solver,
        pipeline: CostPipeline::default(),
    };

    let mut worker = Worker::new(queue, database, template, budget)?;
    let report = worker.start()?;
    println!("\n📦 Campaign Progress:");
    println!("  Completed: {}", report.completed);
    println!("  Requeued: {}", report.requeued);
    println!("  Remaining in queue: {}", worker.queue().len());
    println!("  Documents in database: {}", worker.database().len());
    Ok(())
}
