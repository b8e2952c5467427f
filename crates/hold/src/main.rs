//! usb-hold
//!
//! Holds USB devices exclusively for the lifetime of the process so that no
//! other driver or program can claim them. Devices are named with
//! emulator-style `-device usb-host,...` arguments.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use hold::HoldConfig;
use hold::usb::RusbBackend;
use tokio::signal;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-hold")]
#[command(
    author,
    version,
    about = "Hold USB devices exclusively for the lifetime of the process"
)]
#[command(long_about = "
Claims every USB device named by a `-device usb-host,...` argument, keeps it
away from the kernel and other programs, and gives it back on Ctrl+C.

EXAMPLES:
    # Hold one device
    usb-hold -- -device usb-host,vendorid=0x0b05,productid=0x17cb

    # Hold two devices, ignoring the other emulator arguments
    usb-hold -- -m 4G -device usb-host,vendorid=0x1,productid=0x2,bus=xhci.0 \\
        -device usb-host,vendorid=0x3,productid=0x4

    # List USB devices without holding anything
    usb-hold --list-devices

CONFIGURATION:
    The configuration file is looked up in the following order:
    1. Path specified with --config
    2. ~/.config/usb-hold/config.toml
    3. /etc/usb-hold/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Arguments scanned for `-device usb-host,...` specifications
    #[arg(last = true, value_name = "ARGS")]
    device_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = HoldConfig::default();
        let path = HoldConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        HoldConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        HoldConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    HoldConfig::validate_log_level(log_level)?;

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-hold v{}", env!("CARGO_PKG_VERSION"));
    debug!("Capture settings: {:?}", config.capture);

    if args.list_devices {
        return list_devices_mode(&config);
    }

    debug!("{} pass-through argument(s)", args.device_args.len());
    run_hold(config, args.device_args).await
}

/// List USB devices and exit
fn list_devices_mode(config: &HoldConfig) -> Result<()> {
    let backend = RusbBackend::new(&config.capture).context("Failed to initialize libusb")?;
    let devices = backend
        .list_devices()
        .context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        println!(
            "  {} - {} {}",
            device.id,
            device
                .manufacturer
                .as_deref()
                .unwrap_or("Unknown Manufacturer"),
            device.product.as_deref().unwrap_or("Unknown Product")
        );
        println!(
            "      Bus {:03} Device {:03}",
            device.bus_number, device.device_address
        );
        println!(
            "      -device usb-host,vendorid=0x{:04x},productid=0x{:04x}",
            device.id.vendor_id, device.id.product_id
        );
        println!();
    }

    Ok(())
}

/// Acquire the devices named in `device_args` and hold them until Ctrl+C
async fn run_hold(config: HoldConfig, device_args: Vec<String>) -> Result<()> {
    let registry =
        hold::registry::global(&config.capture).context("Failed to initialize USB backend")?;

    // Matching and capture block on libusb
    let held = tokio::task::spawn_blocking(move || {
        registry.ensure_acquired_from(device_args);
        registry.held_devices()
    })
    .await
    .context("Device acquisition task failed")?;

    if held.is_empty() {
        warn!("No devices are held");
    } else {
        let names: Vec<String> = held.iter().map(ToString::to_string).collect();
        info!("Holding {} device(s): {}", held.len(), names.join(", "));
    }

    info!("Press Ctrl+C to release devices and exit");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, releasing devices...");
        }
        Err(e) => {
            error!("Error waiting for Ctrl+C: {}", e);
        }
    }

    let released = tokio::task::spawn_blocking(move || registry.shutdown())
        .await
        .context("Device release task failed")?;

    info!("Released {} device(s), exiting", released);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::DeviceIdentifier;

    #[test]
    fn test_trailing_args_name_devices() {
        let args = Args::try_parse_from([
            "usb-hold",
            "--log-level",
            "debug",
            "--",
            "-m",
            "4G",
            "-device",
            "usb-host,vendorid=0x1,productid=0x2",
        ])
        .unwrap();

        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.device_args.len(), 4);
        assert_eq!(
            hold::parse_arguments(&args.device_args),
            vec![DeviceIdentifier::new(0x1, 0x2)]
        );
    }

    #[test]
    fn test_no_trailing_args_names_no_devices() {
        let args = Args::try_parse_from(["usb-hold", "--list-devices"]).unwrap();

        assert!(args.list_devices);
        assert!(args.device_args.is_empty());
        assert!(hold::parse_arguments(&args.device_args).is_empty());
    }
}
