//! calc-usbip Server
//!
//! Stand-alone USB/IP server for the emulated TI-Nspire USB port. Without an
//! emulator attached it serves the built-in loopback device, which is enough
//! to exercise host tooling such as `usbip list` and `usbip attach`.

use anyhow::{Context, Result};
use clap::Parser;
use common::{DeviceCommand, setup_logging};
use server::config::{self, ServerConfig};
use server::usb::spawn_loopback_device;
use server::{ServerOptions, UsbIpServer};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "calc-usbip-server")]
#[command(
    author,
    version,
    about = "calc-usbip Server - Export an emulated calculator over USB/IP"
)]
#[command(long_about = "
Exports the emulated TI-Nspire USB device (0451:e022, bus id 1-1) over
the USB/IP protocol. Attach it from the host with the stock usbip tools.

EXAMPLES:
    # Run with default config
    calc-usbip-server

    # Listen on localhost only, with per-URB diagnostics
    calc-usbip-server --bind 127.0.0.1:3240 --verbose

    # Attach from the host
    usbip list -r 127.0.0.1
    usbip attach -r 127.0.0.1 -b 1-1

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/calc-usbip/server.toml
    3. /etc/calc-usbip/server.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Listen address (overrides the config file)
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// Log every URB
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        ServerConfig::load_or_default()
    };
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if args.verbose {
        config.server.verbose = true;
    }

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("calc-usbip Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let options = ServerOptions::from_config(&config)?;
    let (bridge, link) = common::create_device_bridge();

    let device_handle = if config.device.loopback {
        info!("Attaching loopback device");
        Some(spawn_loopback_device(link).context("Failed to spawn loopback device")?)
    } else {
        warn!("No emulated device attached; requests will not be answered");
        None
    };

    let server = UsbIpServer::new(options, bridge.clone());
    let result = run(&server).await;
    server.stop().await;

    if let Some(handle) = device_handle {
        if let Err(e) = bridge.send_command(DeviceCommand::Shutdown).await {
            error!("Error shutting down device thread: {}", e);
        }
        if let Err(e) = handle.join() {
            error!("Device thread panicked: {:?}", e);
        }
    }

    info!("Server shutdown complete");
    result
}

async fn run(server: &UsbIpServer) -> Result<()> {
    let addr = server.start().await?;
    info!("Exporting device on {}", addr);
    info!("Press Ctrl+C to shutdown");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }
    Ok(())
}
