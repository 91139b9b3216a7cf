//! Live Canvas CLI.
//!
//! Commands:
//! - run: Regenerate the frames of a demo scene while its shapes drift

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use live_canvas_demo::session::{run_session, SessionOptions};
use live_canvas_kernel::config::LiveConfig;

#[derive(Parser)]
#[command(name = "live-canvas")]
#[command(version)]
#[command(about = "Continuously regenerate canvas frames with a realtime image model")]
struct Cli {
    /// JSON config file (defaults apply to anything left out)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live loop over the demo scene
    Run {
        /// Inference endpoint: application id or ws:// URL
        #[arg(long, env = "LIVE_CANVAS_ENDPOINT")]
        endpoint: Option<String>,

        /// Session key shared by clients of one realtime connection
        #[arg(long)]
        connection_key: Option<String>,

        /// Tick interval in milliseconds
        #[arg(long = "tick-ms")]
        tick_ms: Option<u64>,

        /// How long to run, in seconds
        #[arg(long, default_value = "10")]
        duration_secs: u64,

        /// Write the final frame images here
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Answer requests in-process instead of calling the service
        #[arg(long)]
        offline: bool,

        /// Loopback latency in milliseconds (with --offline)
        #[arg(long, default_value = "80")]
        latency_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let mut config = match &cli.config {
        Some(path) => LiveConfig::from_file(path)?,
        None => LiveConfig::default(),
    };

    match cli.command {
        Commands::Run {
            endpoint,
            connection_key,
            tick_ms,
            duration_secs,
            output_dir,
            offline,
            latency_ms,
        } => {
            if let Some(endpoint) = endpoint {
                config.endpoint = endpoint;
            }
            if let Some(key) = connection_key {
                config.connection_key = key;
            }
            if let Some(tick_ms) = tick_ms {
                config.tick_interval_ms = tick_ms;
            }
            config.validate()?;

            info!(
                endpoint = %config.endpoint,
                offline,
                duration_secs,
                "Starting live canvas"
            );

            let report = run_session(SessionOptions {
                config,
                duration: Duration::from_secs(duration_secs),
                output_dir,
                offline,
                loopback_latency: Duration::from_millis(latency_ms),
                ..Default::default()
            })
            .await?;

            println!("\n=== Live Canvas Session ===");
            println!("Ticks: {}", report.ticks);
            println!("Frames updated: {}/{}", report.frames_updated, report.frames);
            println!("Iterations started: {}", report.stats.started);
            println!("Requests sent: {}", report.stats.sent);
            println!("Images applied: {}", report.stats.applied);
            println!("Placeholders: {}", report.stats.placeholders);
            println!(
                "Dropped: {} stale, {} orphaned",
                report.stats.stale_dropped, report.stats.orphan_dropped
            );
            println!(
                "Failures: {} raster, {} result, {} send",
                report.stats.raster_failures,
                report.stats.result_failures,
                report.stats.send_failures
            );
            if !report.written.is_empty() {
                println!("\nImages:");
                for path in &report.written {
                    println!("  {}", path.display());
                }
            }
        }
    }

    Ok(())
}
