//! Command-line parsing for the cluster-moment regression tool.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modelling code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::SelectionConfig;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "cmom", version, about = "Regression models for particle-cluster moments")]
pub struct Cli {
    /// Log filter directive (e.g. `info`, `debug`, `cluster_moments=trace`).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Select and fit the shared specification on a training CSV, then
    /// predict and export.
    Fit(FitArgs),
    /// Run the same pipeline on a seeded synthetic dataset.
    Demo(DemoArgs),
}

/// Options for fitting from files.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Training CSV with columns Re, Fr, St, R_moment_1..R_moment_4.
    #[arg(long, value_name = "CSV")]
    pub train: PathBuf,

    /// Prediction CSV with columns Re, Fr, St (moments optional).
    #[arg(long, value_name = "CSV")]
    pub test: Option<PathBuf>,

    #[command(flatten)]
    pub outputs: OutputArgs,

    #[command(flatten)]
    pub selection: SelectionArgs,
}

/// Options for the synthetic demo.
#[derive(Debug, Parser, Clone)]
pub struct DemoArgs {
    /// Simulation runs per (Re, Fr) cell.
    #[arg(long, default_value_t = 12)]
    pub rows_per_cell: usize,

    /// Seed for the synthetic data.
    #[arg(long, default_value_t = 7)]
    pub sample_seed: u64,

    /// Standard deviation of the log-scale noise.
    #[arg(long, default_value_t = 0.05)]
    pub noise_sd: f64,

    #[command(flatten)]
    pub outputs: OutputArgs,

    #[command(flatten)]
    pub selection: SelectionArgs,
}

/// Export destinations.
#[derive(Debug, Args, Clone)]
pub struct OutputArgs {
    /// Write the prediction table (inputs + four predicted moments).
    #[arg(long, value_name = "CSV")]
    pub predictions: Option<PathBuf>,

    /// Write the coefficient confidence-interval table.
    #[arg(long, value_name = "CSV")]
    pub intervals: Option<PathBuf>,

    /// Write the selection summary as JSON.
    #[arg(long, value_name = "JSON")]
    pub summary: Option<PathBuf>,
}

/// Selection and evaluation settings.
#[derive(Debug, Args, Clone)]
pub struct SelectionArgs {
    /// Significance level for interaction and degree tests.
    #[arg(long, default_value_t = 0.05)]
    pub alpha: f64,

    /// Highest St polynomial degree examined.
    #[arg(long, default_value_t = 8)]
    pub max_degree: usize,

    /// Number of cross-validation folds.
    #[arg(long, default_value_t = 10)]
    pub folds: usize,

    /// Seed for cross-validation fold assignment.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Smallest ridge penalty in the search grid.
    #[arg(long, default_value_t = 1e-4)]
    pub lambda_min: f64,

    /// Largest ridge penalty in the search grid.
    #[arg(long, default_value_t = 1e2)]
    pub lambda_max: f64,

    /// Number of log-spaced ridge penalties.
    #[arg(long, default_value_t = 25)]
    pub lambda_steps: usize,

    /// Coverage of the coefficient confidence intervals.
    #[arg(long, default_value_t = 0.95)]
    pub level: f64,

    /// Skip the ridge / natural-spline comparison.
    #[arg(long)]
    pub no_compare: bool,
}

impl SelectionArgs {
    pub fn to_config(&self) -> SelectionConfig {
        SelectionConfig {
            alpha: self.alpha,
            max_degree: self.max_degree,
            folds: self.folds,
            seed: self.seed,
            lambda_min: self.lambda_min,
            lambda_max: self.lambda_max,
            lambda_steps: self.lambda_steps,
            confidence_level: self.level,
            compare_families: !self.no_compare,
        }
    }
}
