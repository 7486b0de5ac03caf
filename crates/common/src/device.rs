//! Device collaborator interfaces
//!
//! The broker itself never talks to USB hardware. It relies on three
//! collaborators, each expressed here as a trait so the host backend and the
//! test doubles plug in the same way:
//!
//! ```text
//! DeviceRegistry     list / hotplug subscription (EventHub) / open
//! PermissionService  fire-and-forget request, outcome broadcast
//! GrantStore         which devices currently hold a grant
//! ```

use protocol::DeviceEvent;
use std::collections::HashSet;
use std::fmt;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

/// Capacity of permission outcome broadcast channels
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// An open connection to one device
///
/// Owns the descriptor; dropping the connection closes it.
pub struct DeviceConnection {
    device: String,
    fd: OwnedFd,
}

impl DeviceConnection {
    pub fn new(device: impl Into<String>, fd: impl Into<OwnedFd>) -> Self {
        Self {
            device: device.into(),
            fd: fd.into(),
        }
    }

    /// Identifier of the device this connection was opened for
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl AsFd for DeviceConnection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for DeviceConnection {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("device", &self.device)
            .field("fd", &self.fd.as_raw_fd())
            .finish()
    }
}

impl Drop for DeviceConnection {
    fn drop(&mut self) {
        trace!(device = %self.device, fd = self.fd.as_raw_fd(), "Closing device connection");
    }
}

/// Device enumeration, hotplug and open
///
/// Implementations must be callable from any thread; the broker invokes
/// `list_devices` and `open` on the blocking pool.
pub trait DeviceRegistry: Send + Sync + 'static {
    /// Identifiers of every currently attached device
    fn list_devices(&self) -> crate::Result<Vec<String>>;

    /// Subscribe to attach/detach notifications
    ///
    /// Every event published after this call is delivered, in order.
    /// Dropping the receiver unsubscribes.
    fn subscribe(&self) -> EventReceiver;

    /// Open the named device
    ///
    /// Fails when the device is gone or no permission has been granted for it.
    fn open(&self, device: &str) -> crate::Result<DeviceConnection>;
}

/// Hotplug events queued for one subscriber
pub type EventReceiver = mpsc::UnboundedReceiver<DeviceEvent>;

/// Fan-out of hotplug events
///
/// Each subscriber owns an unbounded queue: a slow reader only delays itself
/// and never loses an event. Closed queues are pruned on the next publish.
#[derive(Debug, Clone, Default)]
pub struct EventHub {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<DeviceEvent>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Queue `event` for every live subscriber; returns how many got it
    pub fn publish(&self, event: DeviceEvent) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    /// Number of subscribers whose receiver is still alive
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<DeviceEvent>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Result of one permission request, as announced on the outcome channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionOutcome {
    /// Correlation id the request was issued with
    pub action: String,
    /// Device the decision applies to
    pub device: String,
    pub granted: bool,
}

/// Asynchronous permission subsystem
pub trait PermissionService: Send + Sync + 'static {
    /// Ask for permission to open `device`
    ///
    /// Returns as soon as the request is issued; the decision arrives later
    /// on the outcome channel tagged with `action`.
    fn request_permission(&self, device: &str, action: &str) -> crate::Result<()>;

    /// Subscribe to permission outcomes
    fn subscribe(&self) -> broadcast::Receiver<PermissionOutcome>;
}

/// Set of devices that currently hold a permission grant
///
/// Shared between a permission service (which grants) and a registry
/// (which refuses to open devices without a grant).
#[derive(Debug, Clone, Default)]
pub struct GrantStore {
    granted: Arc<Mutex<HashSet<String>>>,
}

impl GrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, device: &str) {
        self.lock().insert(device.to_string());
    }

    pub fn revoke(&self, device: &str) -> bool {
        self.lock().remove(device)
    }

    pub fn is_granted(&self, device: &str) -> bool {
        self.lock().contains(device)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // A poisoned set is still a valid set
        self.granted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_grant_store_shared_between_clones() {
        let store = GrantStore::new();
        let other = store.clone();

        store.grant("/dev/bus/usb/001/002");
        assert!(other.is_granted("/dev/bus/usb/001/002"));
        assert!(other.revoke("/dev/bus/usb/001/002"));
        assert!(!store.is_granted("/dev/bus/usb/001/002"));
        assert!(!store.revoke("/dev/bus/usb/001/002"));
    }

    #[test]
    fn test_event_hub_never_drops_events() {
        let hub = EventHub::new();
        let mut slow = hub.subscribe();
        let burst = EVENT_CHANNEL_CAPACITY * 4;

        for i in 0..burst {
            assert_eq!(hub.publish(DeviceEvent::attached(format!("dev{}", i))), 1);
        }
        for i in 0..burst {
            assert_eq!(slow.try_recv().unwrap().device, format!("dev{}", i));
        }
        assert!(slow.try_recv().is_err());
    }

    #[test]
    fn test_event_hub_prunes_dropped_subscribers() {
        let hub = EventHub::new();
        let kept = hub.subscribe();
        let dropped = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(dropped);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.publish(DeviceEvent::detached("dev1")), 1);
        drop(kept);
        assert_eq!(hub.publish(DeviceEvent::detached("dev1")), 0);
    }

    #[test]
    fn test_connection_closes_on_drop() {
        let (device_side, mut peer) = UnixStream::pair().unwrap();
        let connection = DeviceConnection::new("dev1", device_side);
        assert_eq!(connection.device(), "dev1");

        let mut writer = UnixStream::from(connection.as_fd().try_clone_to_owned().unwrap());
        writer.write_all(b"x").unwrap();
        drop(writer);
        drop(connection);

        let mut buf = Vec::new();
        peer.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"x");
    }
}
