use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use spikewatch::benchmark;
use spikewatch::config::EngineConfig;
use spikewatch::{scheduler, SpikeEngine, SpikeEvent};

#[derive(Parser)]
#[command(
    name = "spikewatch",
    about = "Spike detection for per-keyword sentiment time series",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $SPIKEWATCH_CONFIG, then /etc/spikewatch/spikewatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect spikes in a batch of observations (JSON array)
    Detect {
        /// Input file; reads stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Ingest newline-delimited JSON observations from stdin with periodic detection
    Watch,

    /// Score every method against a synthetic series with known spikes
    Benchmark {
        /// Number of data points
        #[arg(long, default_value = "1000")]
        points: usize,

        /// Number of injected spikes
        #[arg(long, default_value = "10")]
        spikes: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Validate and print the effective configuration
    CheckConfig,
}

/// One input observation.
#[derive(Debug, Deserialize)]
struct Record {
    keyword: String,
    timestamp: DateTime<Utc>,
    value: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.json_logs || config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Detect { input } => {
            let raw = match &input {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read input: {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("failed to read stdin")?;
                    buf
                }
            };
            let records: Vec<Record> =
                serde_json::from_str(&raw).context("input must be a JSON array of observations")?;
            tracing::info!(observations = records.len(), "Running batch detection");

            let engine = SpikeEngine::new(&config)?;
            for record in records {
                ingest(&engine, record);
            }
            engine.trigger();

            let events = all_events(&engine);
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        Commands::Watch => {
            let engine = Arc::new(SpikeEngine::new(&config)?);
            let cadence = config.trigger.cadence();
            tracing::info!(cadence_secs = cadence.as_secs(), "Watching stdin");

            let loop_handle = tokio::spawn(scheduler::run_detection_loop(
                Arc::clone(&engine),
                cadence,
            ));

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Record>(line) {
                    Ok(record) => ingest(&engine, record),
                    Err(e) => tracing::warn!(error = %e, "skipping malformed line"),
                }
            }

            loop_handle.abort();
            let report = scheduler::run_detection_round(Arc::clone(&engine)).await;
            tracing::info!(?report, "Final detection round complete");

            println!("\n=== spikewatch summary ===");
            println!("{:<24} | {:>8} | {:>6}", "Keyword", "Points", "Spikes");
            println!("{:-<24}-|-{:->8}-|-{:->6}", "", "", "");
            for keyword in engine.keywords() {
                let points = engine.snapshot(&keyword).map_or(0, |s| s.len());
                println!("{:<24} | {:>8} | {:>6}", keyword, points, engine.count(&keyword));
            }

            println!("\n{:<24} | {:>8} | {:>9} | {:>9}", "Method", "Runs", "Mean (ms)", "Max (ms)");
            println!("{:-<24}-|-{:->8}-|-{:->9}-|-{:->9}", "", "", "", "");
            for t in engine.timings() {
                println!(
                    "{:<24} | {:>8} | {:>9.3} | {:>9.3}",
                    t.method.to_string(),
                    t.runs,
                    t.mean_ms,
                    t.max_ms
                );
            }
            println!();
        }
        Commands::Benchmark {
            points,
            spikes,
            seed,
            json,
        } => {
            let report = benchmark::run(&config.detection, points, spikes, seed)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "\nSpike benchmark: {} points, {} injected spikes, seed {}",
                    report.points, report.injected, report.seed
                );
                println!(
                    "{:<36} | {:>9} | {:>6} | {:>5} | {:>5} | {:>8} | {:>9}",
                    "Method", "Precision", "Recall", "F1", "FPR", "Detected", "Time (ms)"
                );
                println!(
                    "{:-<36}-|-{:->9}-|-{:->6}-|-{:->5}-|-{:->5}-|-{:->8}-|-{:->9}",
                    "", "", "", "", "", "", ""
                );
                for row in &report.results {
                    let e = &row.evaluation;
                    println!(
                        "{:<36} | {:>9.2} | {:>6.2} | {:>5.2} | {:>5.2} | {:>8} | {:>9.3}",
                        row.method,
                        e.precision,
                        e.recall,
                        e.f1,
                        e.false_positive_rate,
                        row.detected,
                        row.elapsed_ms
                    );
                }
                println!();
            }
        }
        Commands::CheckConfig => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Explicit path first; otherwise the environment / system / default chain.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::load_or_default()),
    }
}

fn ingest(engine: &SpikeEngine, record: Record) {
    if let Err(e) = engine.ingest(&record.keyword, record.timestamp, record.value) {
        tracing::warn!(error = %e, "observation rejected");
    }
}

fn all_events(engine: &SpikeEngine) -> Vec<SpikeEvent> {
    engine
        .registry()
        .keywords()
        .iter()
        .flat_map(|k| {
            engine
                .query(k, DateTime::<Utc>::MIN_UTC..=DateTime::<Utc>::MAX_UTC)
                .to_vec()
        })
        .collect()
}
