use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use loadlens::{AnalysisReport, EngineConfig};

#[derive(Parser)]
#[command(
    name = "loadlens",
    about = "Anomaly detection and attribution for performance-test metrics",
    version,
    long_about = None
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect and attribute anomalies in a run's metrics
    Analyze {
        /// Run metrics (JSON)
        #[arg(long)]
        input: PathBuf,

        /// Engine configuration (TOML); falls back to LOADLENS_CONFIG, then defaults
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write events here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Check a stored event report against the event schema
    Validate {
        /// Event report (JSON)
        #[arg(long)]
        events: PathBuf,
    },

    /// Print the default engine configuration as TOML
    DefaultConfig,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Analyze {
            input,
            config,
            output,
            pretty,
        } => {
            let engine_config = match config {
                Some(path) => EngineConfig::load(&path)?,
                None => EngineConfig::load_or_default(),
            };
            let report = loadlens::analyze_file(&input, engine_config)?;
            let json = report.to_json(pretty)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("failed to write events: {}", path.display()))?;
                    tracing::info!(
                        path = %path.display(),
                        events = report.event_count(),
                        "events written"
                    );
                }
                None => println!("{}", json),
            }
        }
        Commands::Validate { events } => {
            let content = std::fs::read_to_string(&events)
                .with_context(|| format!("failed to read events: {}", events.display()))?;
            let report = AnalysisReport::from_json(&content)
                .with_context(|| format!("invalid event report: {}", events.display()))?;
            println!(
                "OK: {} overall events, {} transaction events",
                report.overall.len(),
                report.transactions.len()
            );
        }
        Commands::DefaultConfig => {
            print!("{}", EngineConfig::default().to_toml()?);
        }
    }

    Ok(())
}
