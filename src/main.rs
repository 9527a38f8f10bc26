use anyhow::{Context, Result};
use icu_mortality::checkpoint::{load_data_dict, CheckpointPaths};
use icu_mortality::cli::{parse_args, setup_logging, Commands, EvaluateArgs, PrepareArgs, SplitArgs};
use icu_mortality::config::PipelineConfig;
use icu_mortality::data::dictionary::{generate_data_dict, DataDictBuilder};
use icu_mortality::data::export::write_dataset;
use icu_mortality::data::loader::{load_dataframes, load_scores};
use icu_mortality::data::preprocessing::train_test_split;
use icu_mortality::metrics::EvaluationReport;
use icu_mortality::utils::{ensure_dir, format_duration, format_number};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

fn main() {
    let cli = parse_args();

    setup_logging(cli.verbose);

    info!("{}", icu_mortality::info());

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Prepare(args) => run_prepare(args, config),
        Commands::Split(args) => run_split(args, config),
        Commands::Evaluate(args) => run_evaluate(args),
    });

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path),
        None => Ok(PipelineConfig::default()),
    }
}

fn run_prepare(args: PrepareArgs, mut config: PipelineConfig) -> Result<()> {
    if let Some(window_size) = args.window_size {
        config.window.window_size = window_size;
    }
    config.validate().context("Invalid configuration")?;

    info!("Timeline file: {:?}", args.timeline);
    info!("Outcomes file: {:?}", args.outcomes);
    info!("Window size: {}", config.window.window_size);

    let interrupt = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&interrupt);
    ctrlc::set_handler(move || {
        warn!("Interrupt received, stopping after the current subject");
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to install interrupt handler")?;

    let start = Instant::now();
    let (timeline, outcomes) = load_dataframes(&config.columns, &args.timeline, &args.outcomes)
        .with_context(|| format!("Failed to load data from {:?} and {:?}", args.timeline, args.outcomes))?;
    info!(
        "Loaded {} timeline rows and {} admission outcomes",
        format_number(timeline.len()),
        format_number(outcomes.len())
    );

    let builder = DataDictBuilder::new(config.window)
        .with_interrupt(interrupt)
        .with_progress(!args.no_progress);
    let paths = CheckpointPaths::from_output(&args.output);
    let data_dict = generate_data_dict(&builder, &timeline, &outcomes, &paths)?;

    info!(
        "Prepared {} admissions, {} windows, {} features in {}",
        format_number(data_dict.len()),
        format_number(data_dict.total_windows()),
        data_dict.n_features(),
        format_duration(start.elapsed().as_secs_f64())
    );
    Ok(())
}

fn run_split(args: SplitArgs, mut config: PipelineConfig) -> Result<()> {
    let split = &mut config.split;
    if let Some(split_ratio) = args.split_ratio {
        split.split_ratio = split_ratio;
    }
    if let Some(seed) = args.seed {
        split.seed = seed;
    }
    if let Some(subset_proportion) = args.subset_proportion {
        split.subset_proportion = subset_proportion;
    }
    if let Some(subset_level) = args.subset_level {
        split.subset_level = subset_level;
    }
    config.split.validate().context("Invalid split parameters")?;

    let data_dict = load_data_dict(&args.data_dict)
        .with_context(|| format!("Failed to load data dictionary from {:?}", args.data_dict))?;

    let dataset = train_test_split(&data_dict, &config.split).context("Train test split failed")?;

    ensure_dir(&args.output)?;
    let files = write_dataset(&dataset, &data_dict.columns, &args.output)
        .with_context(|| format!("Failed to write arrays to {:?}", args.output))?;
    info!("Training features: {:?}", files.x_train);
    info!("Test features: {:?}", files.x_test);

    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let (labels, scores) = load_scores(&args.scores)
        .with_context(|| format!("Failed to load scores from {:?}", args.scores))?;

    let report = EvaluationReport::from_scores(&labels, &scores, args.threshold)
        .context("Evaluation failed")?;
    report.print();

    if let Some(dir) = args.plots {
        report.render_plots(&dir)?;
        info!("Curves saved to {:?}", dir);
    }

    if let Some(output) = args.output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&output, json)?;
        info!("Evaluation report saved to: {:?}", output);
    }

    Ok(())
}
