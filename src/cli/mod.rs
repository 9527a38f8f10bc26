use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::checkpoint::DEFAULT_DATA_DICT_PATH;
use crate::data::SubsetLevel;

/// ICU mortality: window extraction, splitting and evaluation for hourly ICU timelines
#[derive(Parser, Debug)]
#[command(name = "icu-mortality")]
#[command(about = "Prepare ICU timelines for mortality prediction and evaluate model scores")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Pipeline configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Clean timelines and build the windowed data dictionary
    Prepare(PrepareArgs),

    /// Split a data dictionary into train and test arrays
    Split(SplitArgs),

    /// Score predictions of an external model
    Evaluate(EvaluateArgs),
}

/// Data dictionary arguments
#[derive(Parser, Debug)]
pub struct PrepareArgs {
    /// Hourly timeline table (CSV or TSV, optionally gzipped)
    #[arg(short, long, required = true)]
    pub timeline: PathBuf,

    /// Admission outcomes table
    #[arg(long, required = true)]
    pub outcomes: PathBuf,

    /// Output data dictionary; interrupted runs write `<stem>_temp` next to it
    #[arg(short, long, default_value = DEFAULT_DATA_DICT_PATH)]
    pub output: PathBuf,

    /// Timeline rows per window (overrides the config file)
    #[arg(short, long)]
    pub window_size: Option<usize>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Split arguments. Unset values fall back to the config file.
#[derive(Parser, Debug)]
pub struct SplitArgs {
    /// Data dictionary written by `prepare`
    #[arg(short, long, default_value = DEFAULT_DATA_DICT_PATH)]
    pub data_dict: PathBuf,

    /// Directory for x_train.csv, x_test.csv, y_train.csv, y_test.csv
    #[arg(short, long, default_value = "./split")]
    pub output: PathBuf,

    /// Share of admissions used for training
    #[arg(long)]
    pub split_ratio: Option<f64>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Share of admissions or windows to keep
    #[arg(long)]
    pub subset_proportion: Option<f64>,

    /// Subsetting granularity (admission, window)
    #[arg(long)]
    pub subset_level: Option<SubsetLevel>,
}

/// Evaluation arguments
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    /// CSV with `label` and `score` columns
    #[arg(short, long, required = true)]
    pub scores: PathBuf,

    /// Probability threshold for positive classification
    #[arg(long, default_value = "0.5")]
    pub threshold: f64,

    /// Directory for roc_curve.svg and pr_curve.svg
    #[arg(short, long)]
    pub plots: Option<PathBuf>,

    /// Output file for the evaluation report (JSON)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Parse CLI arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Setup logging based on verbosity
pub fn setup_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
