//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs the log subscriber
//! - loads (or generates) the training and prediction tables
//! - runs selection, fitting and prediction
//! - prints reports and writes optional exports

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, DemoArgs, FitArgs, OutputArgs};
use crate::data::{SampleConfig, generate_sample};
use crate::domain::{Observation, SelectionConfig};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `cmom` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Demo(args) => handle_demo(args),
    }
}

fn init_tracing(directive: &str) -> Result<(), AppError> {
    let filter = EnvFilter::try_new(directive)
        .map_err(|e| AppError::new(2, format!("Invalid --log-level '{directive}': {e}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| AppError::new(2, format!("Failed to install log subscriber: {e}")))
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = args.selection.to_config();
    let train = crate::io::read_table(&args.train, true)?;
    let test = match &args.test {
        Some(path) => crate::io::read_table(path, false)?.observations,
        None => Vec::new(),
    };
    execute(&train.observations, &test, &config, &args.outputs)
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = args.selection.to_config();
    let sample = generate_sample(&SampleConfig {
        rows_per_cell: args.rows_per_cell,
        seed: args.sample_seed,
        noise_sd: args.noise_sd,
    })?;
    execute(&sample.train, &sample.test, &config, &args.outputs)
}

fn execute(
    train: &[Observation],
    test: &[Observation],
    config: &SelectionConfig,
    outputs: &OutputArgs,
) -> Result<(), AppError> {
    let run = pipeline::run(train, test, config)?;

    println!(
        "{}",
        crate::report::format_run_summary(run.n_train, &run.selection, config)
    );
    if !run.selection.families.is_empty() {
        println!("{}", crate::report::format_families(&run.selection.families));
    }
    print!(
        "{}",
        crate::report::format_intervals(&run.intervals, config.confidence_level)
    );
    if !run.holdout.is_empty() {
        println!("{}", crate::report::format_holdout(&run.holdout));
    }

    // Optional exports.
    if let Some(path) = &outputs.predictions {
        crate::io::write_predictions_csv(path, &run.predictions)?;
    }
    if let Some(path) = &outputs.intervals {
        crate::io::write_intervals_csv(path, &run.intervals)?;
    }
    if let Some(path) = &outputs.summary {
        let summary = crate::io::build_summary(&run.selection, config, &run.intervals, &run.holdout);
        crate::io::write_summary_json(path, &summary)?;
    }

    Ok(())
}
