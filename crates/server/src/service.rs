//! Systemd service integration
//!
//! Speaks the sd-notify datagram protocol so the broker can run as a
//! `Type=notify` unit with an optional watchdog.

use anyhow::{Context, Result};
use std::env;
use std::io;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixDatagram};
use std::time::Duration;
use tracing::{debug, error, info};

/// Lifecycle states reported to the service manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Ready,
    Stopping,
    Watchdog,
}

impl ServiceState {
    fn message(self) -> &'static str {
        match self {
            Self::Ready => "READY=1",
            Self::Stopping => "STOPPING=1",
            Self::Watchdog => "WATCHDOG=1",
        }
    }
}

/// Resolve a `NOTIFY_SOCKET` value; a leading `@` means abstract namespace
fn notify_address(socket: &str) -> io::Result<SocketAddr> {
    match socket.strip_prefix('@') {
        Some(name) => SocketAddr::from_abstract_name(name.as_bytes()),
        None => SocketAddr::from_pathname(socket),
    }
}

fn send_to(socket: &str, message: &str) -> Result<()> {
    let address = notify_address(socket).context("Invalid NOTIFY_SOCKET")?;
    let datagram = UnixDatagram::unbound().context("Failed to create Unix socket")?;
    datagram
        .send_to_addr(message.as_bytes(), &address)
        .with_context(|| format!("Failed to send {} to systemd", message))?;
    Ok(())
}

fn send(message: &str) -> Result<bool> {
    match env::var("NOTIFY_SOCKET") {
        Ok(socket) => send_to(&socket, message).map(|()| true),
        Err(_) => Ok(false),
    }
}

/// Report a lifecycle state; a no-op outside systemd
pub fn notify(state: ServiceState) -> Result<()> {
    if send(state.message())? {
        match state {
            ServiceState::Watchdog => debug!("Notified systemd: watchdog keepalive"),
            _ => info!("Notified systemd: {}", state.message()),
        }
    } else if state != ServiceState::Watchdog {
        debug!("NOTIFY_SOCKET not set, skipping systemd notification");
    }
    Ok(())
}

/// Free-form status line shown by `systemctl status`
pub fn notify_status(status: &str) -> Result<()> {
    if send(&format!("STATUS={}", status))? {
        debug!("Notified systemd: status = {}", status);
    }
    Ok(())
}

/// Check if running under systemd
pub fn is_systemd() -> bool {
    env::var("NOTIFY_SOCKET").is_ok()
}

fn watchdog_interval(timeout_usec: Option<&str>) -> Option<Duration> {
    let usec: u64 = timeout_usec?.parse().ok()?;
    Some(Duration::from_micros(usec / 2).max(Duration::from_secs(1)))
}

/// Send keepalives at half the `WATCHDOG_USEC` interval
///
/// Returns `None` when the unit has no watchdog configured.
pub fn spawn_watchdog_task() -> Option<tokio::task::JoinHandle<()>> {
    let interval = watchdog_interval(env::var("WATCHDOG_USEC").ok().as_deref())?;
    info!("Systemd watchdog enabled, interval: {:?}", interval);

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = notify(ServiceState::Watchdog) {
                error!("Failed to send watchdog keepalive: {:#}", e);
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_send_to_path_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notify.sock");
        let receiver = UnixDatagram::bind(&path).unwrap();

        send_to(path.to_str().unwrap(), ServiceState::Ready.message()).unwrap();

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"READY=1");
    }

    #[test]
    fn test_send_to_abstract_socket() {
        let name = format!("usb-broker-notify.{}", std::process::id());
        let address = SocketAddr::from_abstract_name(name.as_bytes()).unwrap();
        let receiver = UnixDatagram::bind_addr(&address).unwrap();

        send_to(&format!("@{}", name), "STATUS=serving").unwrap();

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"STATUS=serving");
    }

    #[test]
    fn test_send_to_missing_socket_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.sock");
        assert!(send_to(path.to_str().unwrap(), "READY=1").is_err());
    }

    #[test]
    fn test_watchdog_interval() {
        assert_eq!(watchdog_interval(None), None);
        assert_eq!(watchdog_interval(Some("invalid")), None);
        assert_eq!(
            watchdog_interval(Some("30000000")),
            Some(Duration::from_secs(15))
        );
        // Never faster than once per second
        assert_eq!(
            watchdog_interval(Some("1000")),
            Some(Duration::from_secs(1))
        );
    }
}
