//! usb-broker client
//!
//! Command-line front end for the broker: list devices, watch hotplug events,
//! or hold a device open.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::BrokerClient;
use common::{SocketName, setup_logging};
use protocol::DeviceEvent;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "usb-broker-client")]
#[command(author, version, about = "Talk to a running usb-broker")]
#[command(long_about = "
Client for the usb-broker socket protocol.

EXAMPLES:
    # List attached devices
    usb-broker-client list

    # Follow attach/detach events as JSON lines
    usb-broker-client watch --json

    # Acquire a device and hold it until Ctrl+C
    usb-broker-client acquire /dev/bus/usb/001/004
")]
struct Args {
    /// Abstract socket name of the broker
    #[arg(long, value_name = "NAME", default_value = "usb-broker.libusb")]
    socket_name: String,

    /// Filesystem socket of the broker (overrides --socket-name)
    #[arg(long, value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the attached devices and exit
    List,
    /// Print the device list, then every attach/detach event
    Watch {
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Acquire a device and hold it until Ctrl+C
    Acquire {
        /// Device identifier, e.g. /dev/bus/usb/001/004
        device: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level).context("Failed to setup logging")?;

    let socket = match args.socket_path {
        Some(path) => SocketName::path(path),
        None => SocketName::abstract_name(args.socket_name),
    };
    let broker = BrokerClient::new(socket);

    match args.command {
        Command::List => list(&broker).await,
        Command::Watch { json } => watch(&broker, json).await,
        Command::Acquire { device } => acquire(&broker, &device).await,
    }
}

async fn list(broker: &BrokerClient) -> Result<()> {
    let devices = broker.list().await.context("Failed to list devices")?;
    if devices.is_empty() {
        println!("No USB devices found.");
    }
    for device in devices {
        println!("{}", device);
    }
    Ok(())
}

fn print_event(event: &DeviceEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{:<9} {}", event.state, event.device);
    }
    Ok(())
}

async fn watch(broker: &BrokerClient, json: bool) -> Result<()> {
    let mut directory = broker
        .directory()
        .await
        .context("Failed to open directory session")?;

    for device in directory.snapshot() {
        print_event(&DeviceEvent::attached(device.as_str()), json)?;
    }

    loop {
        tokio::select! {
            event = directory.next_event() => match event.context("Directory stream failed")? {
                Some(event) => print_event(&event, json)?,
                None => {
                    info!("Broker closed the directory stream");
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn acquire(broker: &BrokerClient, device: &str) -> Result<()> {
    let acquired = broker
        .acquire(device)
        .await
        .with_context(|| format!("Failed to acquire {}", device))?;

    println!(
        "Acquired {} as fd {}, press Ctrl+C to release",
        acquired.device(),
        acquired.as_raw_fd()
    );
    tokio::signal::ctrl_c()
        .await
        .context("Error waiting for Ctrl+C")?;

    drop(acquired);
    println!("Released {}", device);
    Ok(())
}
