//! Stroke Replay
//!
//! Runs a recorded session (CSV accelerometer data, optional CSV GPS fixes)
//! through the stroke sensing pipeline and prints the detected strokes and a
//! session summary. Useful for validating thresholds against reference
//! recordings.
//!
//! This is the entry point for the standalone binary. For library use, see lib.rs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stroke_sensing::replay::{load_accel_csv, load_gps_csv, replay};
use stroke_sensing::{EngineConfig, StrokePipeline};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    /// Human-readable, multi-line
    #[default]
    Pretty,
    /// Single-line
    Compact,
    /// Machine-readable JSON lines
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "stroke-replay")]
#[command(about = "Replay a recorded rowing session through the stroke sensing engine", long_about = None)]
struct Cli {
    /// Accelerometer CSV (timestamp_ms,x,y,z)
    #[arg(short, long)]
    input: PathBuf,

    /// GPS CSV (timestamp_ms,latitude,longitude,speed,accuracy)
    #[arg(short, long)]
    gps: Option<PathBuf>,

    /// Engine configuration (TOML); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Print every rate update, not just strokes
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact().with_ansi(false)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    }
    .context("Failed to initialize tracing")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => EngineConfig::default(),
    };

    let readings = load_accel_csv(&cli.input)
        .with_context(|| format!("Failed to read accelerometer CSV {:?}", cli.input))?;
    let fixes = match &cli.gps {
        Some(path) => {
            load_gps_csv(path).with_context(|| format!("Failed to read GPS CSV {:?}", path))?
        }
        None => Vec::new(),
    };
    tracing::info!(readings = readings.len(), fixes = fixes.len(), "Recording loaded");

    let mut pipeline = StrokePipeline::new(config);
    let summary = replay(&mut pipeline, &readings, &fixes).context("Replay failed")?;

    if cli.verbose {
        for (timestamp_ms, rate) in &summary.rate_updates {
            println!("rate    t={timestamp_ms:>8} ms  {rate:6.2} spm");
        }
    }
    for stroke in &summary.strokes {
        println!(
            "stroke  #{:<4} t={:>8} ms  {:6.2} spm",
            stroke.index, stroke.timestamp_ms, stroke.stroke_rate
        );
    }

    let metrics = summary.metrics;
    println!();
    println!("Readings:        {} ({} rejected)", summary.readings, summary.rejected_readings);
    println!("GPS fixes:       {}", summary.fixes);
    println!("Analysis ticks:  {} tables", summary.tables);
    println!("Strokes:         {}", metrics.stroke_count);
    match metrics.stroke_rate {
        Some(rate) => println!("Last rate:       {rate:.2} spm"),
        None => println!("Last rate:       n/a"),
    }
    println!("Distance:        {:.1} m", metrics.distance_m);
    if let Some(speed) = metrics.speed_mps {
        println!("Last speed:      {speed:.2} m/s");
    }

    Ok(())
}
