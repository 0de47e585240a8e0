//! Command line tool for LedRemote devices
//!
//! Scans for devices and switches the remote LED on or off.

use std::time::Duration;

use clap::{Parser, Subcommand};
use ledremote_ble_controller::ble;
use ledremote_proto::ble::{ADVERTISED_NAME, LinkConfig};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "ledremote-ble")]
#[command(about = "Switch a LedRemote LED over BLE")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for LedRemote devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Advertised name to look for
        #[arg(short, long, default_value = ADVERTISED_NAME)]
        name: String,
    },
    /// Switch the LED on
    On(Target),
    /// Switch the LED off
    Off(Target),
}

#[derive(clap::Args)]
struct Target {
    /// Advertised name of the device
    #[arg(short, long, default_value = ADVERTISED_NAME)]
    name: String,
    /// Seconds to wait for the confirmation
    #[arg(short, long, default_value = "10")]
    timeout: u64,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("LEDREMOTE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { duration, name } => scan_devices(name, duration).await?,
        Commands::On(target) => switch(target, true).await?,
        Commands::Off(target) => switch(target, false).await?,
    }

    Ok(())
}

async fn scan_devices(name: String, duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for LedRemote devices ({} seconds)...", duration);

    let config = LinkConfig::with_name(name);
    let devices = ble::scan(&config, Duration::from_secs(duration)).await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device.rssi.map(|r| format!("{} dBm", r)).unwrap_or_else(|| "N/A".to_string());
        let marker = if device.is_led_remote { " [LEDREMOTE]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
    }

    Ok(())
}

async fn switch(target: Target, led_on: bool) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(name = %target.name, led_on, "switching remote LED");

    let config = LinkConfig::with_name(target.name);
    let confirmed = ble::set_led(config, led_on, Duration::from_secs(target.timeout)).await?;

    println!("LED is {}", if confirmed { "on" } else { "off" });
    if confirmed != led_on {
        tracing::warn!("device reported a different state than requested");
    }
    Ok(())
}
