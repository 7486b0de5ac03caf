//! usb-broker
//!
//! Privileged USB broker for Linux hosts. Hands open USB device descriptors to
//! local clients over a Unix socket, so the clients themselves never need
//! access to `/dev/bus/usb`.

use anyhow::{Context, Result};
use clap::Parser;
use common::{DeviceRegistry, GrantStore, setup_logging};
use server::config::ServerConfig;
use server::service::{self, ServiceState};
use server::usb::{DeviceIdentity, FilterPermissions, UsbHost, spawn_usb_worker};
use server::{BrokerServer, Collaborators, LogNotifier, ShutdownPolicy};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-broker")]
#[command(author, version, about = "Hand USB device descriptors to local clients")]
#[command(long_about = "
A privileged broker that opens USB devices on behalf of unprivileged local
processes and passes them the open descriptor over a Unix socket.

EXAMPLES:
    # Run with default config
    usb-broker

    # Run with custom config
    usb-broker --config /path/to/config.toml

    # List USB devices without starting the broker
    usb-broker --list-devices

    # Run as systemd service
    usb-broker --service

    # Listen on a different abstract socket name
    usb-broker --socket-name org.example.scanner.libusb

CONFIGURATION:
    The broker looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-broker/server.toml
    3. /etc/usb-broker/server.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Run as systemd service (sd-notify, watchdog)
    #[arg(long)]
    service: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Abstract socket name to listen on
    #[arg(long, value_name = "NAME")]
    socket_name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        ServerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ServerConfig::load_or_default()
    };
    if let Some(name) = args.socket_name {
        config.server.socket_name = Some(name);
        config.server.socket_path = None;
    }
    config.validate().context("Invalid configuration")?;

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-broker v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let grants = GrantStore::new();
    let host = Arc::new(UsbHost::new(grants.clone()).context("Failed to initialize libusb")?);

    if args.list_devices {
        return list_devices_mode(&host);
    }

    let service_mode = args.service || config.server.service_mode;
    run_broker(config, host, grants, service_mode).await
}

/// List USB devices and exit
fn list_devices_mode(host: &UsbHost) -> Result<()> {
    let devices = host.list_devices().context("Failed to enumerate devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        match host.usb_ids(&device) {
            Some((vid, pid)) => println!("  {}  {:04x}:{:04x}", device, vid, pid),
            None => println!("  {}", device),
        }
    }
    Ok(())
}

async fn run_broker(
    config: ServerConfig,
    host: Arc<UsbHost>,
    grants: GrantStore,
    service_mode: bool,
) -> Result<()> {
    let filters = config.usb.device_filters()?;
    if filters.is_empty() {
        warn!("No device filters configured, every device will be granted");
    }
    let permissions = Arc::new(FilterPermissions::new(filters, host.clone(), grants));

    let usb_worker =
        spawn_usb_worker(&host, config.usb.poll_interval()).context("Failed to start USB worker")?;

    let server = BrokerServer::bind(
        config.broker_options(),
        Collaborators {
            registry: host,
            permissions,
            notifier: Arc::new(LogNotifier::new(service_mode)),
        },
    )
    .context("Failed to bind broker socket")?;

    let watchdog = if service_mode {
        if service::is_systemd() {
            info!("Running under systemd");
        }
        let watchdog = service::spawn_watchdog_task();
        service::notify(ServiceState::Ready).context("Failed to notify systemd ready")?;
        service::notify_status(&format!("Listening on {}", server.socket()))
            .context("Failed to send status to systemd")?;
        watchdog
    } else {
        None
    };

    let handle = server.shutdown_handle();
    let signals = tokio::spawn(async move {
        shutdown_signal().await;
        handle.shutdown();
    });
    let stats = server.stats();
    let policy = config.server.shutdown;

    info!("Press Ctrl+C to shutdown");
    let result = server.run().await;

    signals.abort();

    // Detached sessions live on this runtime and still need the USB worker
    if policy == ShutdownPolicy::Detach && stats.active() > 0 {
        info!(
            sessions = stats.active(),
            "Waiting for live sessions to end, signal again to close them"
        );
        tokio::select! {
            _ = stats.wait_idle() => info!("All sessions ended"),
            _ = shutdown_signal() => warn!(sessions = stats.active(), "Closing remaining sessions"),
        }
    }

    let totals = stats.snapshot();
    info!(
        accepted = totals.accepted,
        active = totals.active,
        rejected = totals.rejected,
        handles_sent = totals.handles_sent,
        failures = totals.failures,
        "Session totals"
    );
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }

    info!("Shutting down USB subsystem...");
    tokio::task::spawn_blocking(move || usb_worker.shutdown())
        .await
        .context("USB worker shutdown failed")?;

    result.context("Broker failed")
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Error waiting for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down gracefully...");
        }
        _ = terminate.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }
}
