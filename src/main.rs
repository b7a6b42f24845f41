//! midislot - MIDI port-slot multiplexer
//!
//! Interactive front end: reads commands, turns them into action words for
//! the dispatch loop and prints its reports on stdout.

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use midislot::catalog::CatalogSnapshot;
use midislot::cli;
use midislot::config::{AppConfig, BackendKind};
use midislot::dispatch;
use midislot::platform::{MidiPlatform, MidirPlatform, VirtualBus};
use midislot::report::ConsoleReporter;
use midislot::types::Direction;

/// midislot - bind RX/TX slots to MIDI device ports
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "midislot.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Override the configured backend
    #[arg(short, long, value_enum)]
    backend: Option<BackendKind>,

    /// List available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Starting midislot...");
    info!("Configuration file: {}", args.config);

    let mut config = AppConfig::load_or_default(&args.config).await?;
    if let Some(kind) = args.backend {
        config.backend.kind = kind;
    }
    info!("Backend: {:?}", config.backend.kind);

    match config.backend.kind {
        BackendKind::Midir => {
            let client_name = config.backend.client_name.clone();
            let connect = move || MidirPlatform::new(client_name.clone());
            if args.list_ports {
                return list_ports(connect()?);
            }
            run_app(config, connect).await
        }
        BackendKind::Virtual => {
            let bus = VirtualBus::new(config.virtual_devices.clone());
            if args.list_ports {
                return list_ports(bus.platform());
            }
            run_app(config, move || Ok(bus.platform())).await
        }
    }
}

async fn run_app<P, F>(config: AppConfig, connect: F) -> Result<()>
where
    P: MidiPlatform + 'static,
    F: FnMut() -> midislot::error::Result<P> + Send + 'static,
{
    let reporter = ConsoleReporter::new(std::io::stdout());
    let (sender, dispatcher) = dispatch::spawn(config.dispatch, connect, reporter)?;
    info!("Dispatch loop running");

    let repl = tokio::task::spawn_blocking(move || cli::run_repl(sender));

    tokio::select! {
        result = repl => {
            if let Err(e) = result? {
                warn!("REPL stopped: {}", e);
            }
        }
        _ = shutdown_signal() => {
            // The REPL thread may be parked in readline and still owns the sender
            info!("midislot shutdown complete");
            std::process::exit(0);
        }
    }

    // Sender is gone with the REPL; the loop closes every slot and exits
    if dispatcher.join().is_err() {
        warn!("Dispatch thread panicked");
    }

    info!("midislot shutdown complete");
    Ok(())
}

fn list_ports<P: MidiPlatform>(mut platform: P) -> Result<()> {
    use colored::*;

    let devices = platform.enumerate_devices()?;

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());
    for (direction, title) in [(Direction::Rx, "RX Ports:"), (Direction::Tx, "TX Ports:")] {
        let snapshot = CatalogSnapshot::new(direction, devices.clone());
        let names = snapshot.unique_port_names(direction);

        println!("\n{}", title.bold());
        if names.is_empty() {
            println!("  {}", "No ports found".dimmed());
        }
        for (ordinal, name) in names.iter().enumerate() {
            println!("  {} {}", format!("[{}]", ordinal).yellow(), name);
        }
    }
    println!();

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // stdout carries the report protocol, so logs go to stderr
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(true),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
