//! hostwatch - host telemetry anomaly scoring
//!
//! Usage:
//!   hostwatch train --input telemetry.jsonl --model model.bin
//!   hostwatch score --input latest.jsonl --model model.bin --output anomalies.jsonl
//!   hostwatch config > pipeline.json

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hostwatch::notify::{FanoutNotifier, JsonLinesNotifier, TracingNotifier};
use hostwatch::{FileModelStore, ModelStore, Pipeline, PipelineConfig, TelemetryRow, telemetry};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hostwatch")]
#[command(about = "Difference-feature anomaly detection for host telemetry")]
struct Cli {
    /// Pipeline configuration (JSON); built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a model on historical telemetry and persist it
    Train {
        /// Telemetry as JSON lines
        #[arg(short, long)]
        input: PathBuf,

        /// Destination model file
        #[arg(short, long, default_value = "model.bin")]
        model: PathBuf,
    },

    /// Score a telemetry batch and emit predicted anomalies
    Score {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "model.bin")]
        model: PathBuf,

        /// Write anomalies as JSON lines here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the configured notification cap
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print the effective configuration as JSON
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Train { input, model } => run_train(config, &input, &model),
        Commands::Score {
            input,
            model,
            output,
            limit,
        } => run_score(config, &input, &model, output.as_deref(), limit),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Read telemetry and apply the configured cleanup.
fn load_rows(config: &PipelineConfig, input: &Path) -> Result<Vec<TelemetryRow>> {
    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let mut rows = telemetry::read_json_lines(BufReader::new(file))
        .with_context(|| format!("reading telemetry from {}", input.display()))?;

    if let Some(column) = &config.cleanup.drop_negative {
        rows = telemetry::drop_negative(rows, column);
    }
    rows = telemetry::drop_columns(rows, &config.cleanup.drop_columns);
    telemetry::sort_chronologically(&mut rows);
    Ok(rows)
}

fn run_train(config: PipelineConfig, input: &Path, model_path: &Path) -> Result<()> {
    let rows = load_rows(&config, input)?;
    let pipeline = Pipeline::new(config)?;
    let store = FileModelStore::new(model_path);

    let outcome = pipeline
        .train_and_persist(&rows, &store)
        .context("training run failed")?;

    info!(
        model = %model_path.display(),
        training_rows = outcome.training_rows,
        threshold = outcome.stats.threshold,
        contamination = outcome.model.contamination(),
        "Training complete."
    );
    Ok(())
}

fn run_score(
    mut config: PipelineConfig,
    input: &Path,
    model_path: &Path,
    output: Option<&Path>,
    limit: Option<usize>,
) -> Result<()> {
    if let Some(limit) = limit {
        config.max_notifications = limit;
    }
    let rows = load_rows(&config, input)?;
    let pipeline = Pipeline::new(config)?;
    let model = FileModelStore::new(model_path)
        .load()
        .with_context(|| format!("loading model {}", model_path.display()))?;

    let stream = match output {
        Some(path) => {
            let mut notifier = TracingNotifier::new();
            pipeline
                .score_to_file(&model, &rows, &mut notifier, path)
                .with_context(|| format!("scoring into {}", path.display()))?
        }
        None => {
            let mut notifier = FanoutNotifier::new()
                .with(Box::new(TracingNotifier::new()))
                .with(Box::new(JsonLinesNotifier::new(std::io::stdout().lock())));
            pipeline
                .score_and_notify(&model, &rows, &mut notifier)
                .context("scoring run failed")?
        }
    };

    info!(
        scored = stream.scored_rows,
        anomalies = stream.total_anomalies,
        emitted = stream.records.len(),
        truncated = stream.truncated(),
        "Scoring complete."
    );
    Ok(())
}
