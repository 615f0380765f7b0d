//! Lumen GW - LAN smart-lighting gateway
//!
//! Discovers LED fixtures over UDP multicast and drives them from live visual
//! sources: direct control, music-reactive sync, and keyframe scenes.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lumen_gw::cli;
use lumen_gw::config::AppConfig;
use lumen_gw::controller::LightController;
use lumen_gw::transport::UdpTransport;

/// Lumen Gateway - drive LAN smart-lighting fixtures from live visuals
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Run one discovery scan, print the devices, and exit
    #[arg(long)]
    discover: bool,

    /// Use the development placeholder device set (no network access)
    #[arg(long)]
    placeholder: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting Lumen GW...");
    info!("Configuration file: {}", args.config);

    let config = AppConfig::load_or_default(&args.config).await?;

    let controller = if args.placeholder {
        Arc::new(LightController::with_placeholder(config))
    } else {
        let transport = UdpTransport::bind(config.network.response_port).await?;
        Arc::new(LightController::new(Arc::new(transport), config))
    };

    // Trace every registry update (new sightings, confirmed state changes)
    controller.registry().subscribe(|device| {
        debug!(
            "Registry update: {} ({}) online={} power={}",
            device.name, device.id, device.online, device.state.on
        );
    });

    if args.discover {
        let devices = controller.discover().await?;
        cli::print_devices(&devices);
        return Ok(());
    }

    info!("✅ Controller ready");
    cli::run_repl(controller.clone()).await?;

    controller.shutdown().await;
    info!("Lumen GW shutdown complete");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
