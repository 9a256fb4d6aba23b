//! botodisp
//!
//! Drives a botodisp display/keypad over USB from userspace. Lines read from
//! stdin are printed on the display; key presses are echoed by the driver.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use driver::config::{DriverConfig, load_config};
use driver::usb::{HostBridge, HostCommand, create_host_bridge, spawn_usb_host};
use driver::{ClientHandle, DeviceRegistry, DriverError, InterruptSignal};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, info, warn};

/// How often to look for the device while waiting for it
const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "botodisp")]
#[command(author, version, about = "Userspace driver for the botodisp USB display/keypad")]
#[command(long_about = "
Drives a 16 column USB character display with a keypad from userspace.
Every line read from stdin is printed at the display cursor; keys pressed on
the keypad are echoed, and the delete key erases the previous character.

EXAMPLES:
    # Print a greeting
    echo HELLO | botodisp

    # Type interactively, with debug logging
    botodisp --log-level debug

    # Show matching devices and exit
    botodisp --list-devices

CONFIGURATION:
    The driver looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/botodisp/driver.toml
    3. /etc/botodisp/driver.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List matching USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = DriverConfig::default();
        let path = DriverConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        load_config(path).context("Failed to load configuration")?
    } else {
        DriverConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.driver.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("botodisp v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let registry = Arc::new(DeviceRegistry::new(
        config.driver.max_files,
        config.session_options()?,
    ));
    let settings = config.host_settings()?;

    let (host_bridge, worker) = create_host_bridge();
    let host_handle = spawn_usb_host(Arc::clone(&registry), settings, worker)
        .context("Failed to spawn USB host thread")?;

    let result = if args.list_devices {
        list_devices_mode(host_bridge.clone()).await
    } else {
        run_display(Arc::clone(&registry)).await
    };

    info!("Shutting down USB subsystem...");
    if let Err(e) = shutdown_usb_host(host_bridge).await {
        error!("Error shutting down USB host: {:#}", e);
    }

    match host_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("USB host failed: {}", e),
        Err(e) => error!("USB host thread panicked: {:?}", e),
    }

    result
}

/// List matching devices and exit
async fn list_devices_mode(host_bridge: HostBridge) -> Result<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    host_bridge
        .send_command(HostCommand::ListDevices { response: tx })
        .await
        .context("Failed to send ListDevices command")?;

    let devices = rx.await.context("Failed to receive device list")?;

    if devices.is_empty() {
        println!("No matching USB devices found.");
    } else {
        println!("Found {} device(s):\n", devices.len());
        for device in devices {
            let minor = device
                .minor
                .map(|m| format!("minor {}", m))
                .unwrap_or_else(|| "not attached".to_string());
            println!(
                "  {:04x}:{:04x} Bus {:03} Device {:03} ({})",
                device.vendor_id, device.product_id, device.bus, device.address, minor
            );
        }
    }

    Ok(())
}

/// Forward stdin lines to the first device until EOF or Ctrl+C
async fn run_display(registry: Arc<DeviceRegistry>) -> Result<()> {
    let interrupt = InterruptSignal::new();
    let shutdown = Arc::new(Notify::new());

    {
        let interrupt = interrupt.clone();
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(e) => error!("Error waiting for Ctrl+C: {}", e),
            }
            interrupt.raise();
            shutdown.notify_one();
        });
    }

    let Some(handle) = wait_for_device(&registry, &interrupt).await? else {
        return Ok(());
    };
    let handle = Arc::new(handle);
    info!("Display ready, type to print (Ctrl+D to quit)");

    let mut lines = spawn_stdin_reader().context("Failed to spawn stdin reader")?;
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = shutdown.notified() => break,
        };
        let Some(line) = line else {
            debug!("stdin closed");
            break;
        };

        let writer = Arc::clone(&handle);
        let write_interrupt = interrupt.clone();
        let written = tokio::task::spawn_blocking(move || {
            writer.write(line.as_bytes(), &write_interrupt)
        })
        .await
        .context("Write task failed")?;

        match written {
            Ok(count) => debug!("Wrote {} bytes", count),
            Err(e) if e.is_retryable() => break,
            Err(DriverError::DeviceGone) => {
                warn!("Display went away");
                break;
            }
            Err(e) => return Err(e).context("Failed to write to display"),
        }
    }

    Ok(())
}

/// Read stdin on a plain thread so a pending read never holds up shutdown
fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Open minor 0, retrying until a device shows up or Ctrl+C
async fn wait_for_device(
    registry: &DeviceRegistry,
    interrupt: &InterruptSignal,
) -> Result<Option<ClientHandle>> {
    let mut announced = false;
    loop {
        match registry.open(0) {
            Ok(handle) => return Ok(Some(handle)),
            Err(DriverError::NoDevice(_)) => {
                if !announced {
                    info!("Waiting for a display to be plugged in...");
                    announced = true;
                }
            }
            Err(e) => return Err(e).context("Failed to open display"),
        }

        if interrupt.is_raised() {
            return Ok(None);
        }
        tokio::time::sleep(DEVICE_POLL_INTERVAL).await;
    }
}

/// Shutdown USB host thread gracefully
async fn shutdown_usb_host(host_bridge: HostBridge) -> Result<()> {
    host_bridge
        .send_command(HostCommand::Shutdown)
        .await
        .context("Failed to send Shutdown command")?;
    Ok(())
}
