//! Test utilities for usb-broker
//!
//! Provides in-memory collaborators so the broker can be exercised end to end
//! without USB hardware.
//!
//! # Example
//!
//! ```
//! use common::DeviceRegistry;
//! use common::test_utils::MockRegistry;
//!
//! let registry = MockRegistry::with_devices(["dev1", "dev2"]);
//! assert_eq!(registry.list_devices().unwrap(), vec!["dev1", "dev2"]);
//! ```

use crate::device::{
    DeviceConnection, DeviceRegistry, EVENT_CHANNEL_CAPACITY, EventHub, EventReceiver, GrantStore,
    PermissionOutcome, PermissionService,
};
use protocol::DeviceEvent;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory device registry
///
/// Opening a device hands out one end of a socket pair; the other end is kept
/// so tests can check that the descriptor a client received is live.
pub struct MockRegistry {
    devices: Mutex<BTreeSet<String>>,
    events: EventHub,
    device_ends: Mutex<HashMap<String, Vec<UnixStream>>>,
    failing: Mutex<HashSet<String>>,
    grants: Option<GrantStore>,
    opened: AtomicUsize,
}

impl MockRegistry {
    /// Registry that opens any present device
    pub fn with_devices<I, S>(devices: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self::build(devices, None))
    }

    /// Registry that only opens devices holding a grant in `grants`
    pub fn with_grants<I, S>(devices: I, grants: GrantStore) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self::build(devices, Some(grants)))
    }

    fn build<I, S>(devices: I, grants: Option<GrantStore>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            devices: Mutex::new(devices.into_iter().map(Into::into).collect()),
            events: EventHub::new(),
            device_ends: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            grants,
            opened: AtomicUsize::new(0),
        }
    }

    /// Plug a device in and announce it
    pub fn attach(&self, device: &str) {
        lock(&self.devices).insert(device.to_string());
        self.events.publish(DeviceEvent::attached(device));
    }

    /// Unplug a device, revoke its grant and announce it
    pub fn detach(&self, device: &str) {
        lock(&self.devices).remove(device);
        if let Some(grants) = &self.grants {
            grants.revoke(device);
        }
        self.events.publish(DeviceEvent::detached(device));
    }

    /// Make every subsequent open of `device` fail
    pub fn fail_open(&self, device: &str) {
        lock(&self.failing).insert(device.to_string());
    }

    /// Number of live hotplug subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    /// Number of successful opens so far
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Take the device-side end of the most recent open of `device`
    pub fn take_device_end(&self, device: &str) -> Option<UnixStream> {
        lock(&self.device_ends).get_mut(device).and_then(Vec::pop)
    }
}

impl DeviceRegistry for MockRegistry {
    fn list_devices(&self) -> crate::Result<Vec<String>> {
        Ok(lock(&self.devices).iter().cloned().collect())
    }

    fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    fn open(&self, device: &str) -> crate::Result<DeviceConnection> {
        if !lock(&self.devices).contains(device) {
            return Err(crate::Error::NotFound(device.to_string()));
        }
        if lock(&self.failing).contains(device) {
            return Err(crate::Error::Usb(format!("open failed for {}", device)));
        }
        if let Some(grants) = &self.grants
            && !grants.is_granted(device)
        {
            return Err(crate::Error::PermissionDenied(device.to_string()));
        }

        let (broker_end, device_end) = UnixStream::pair()?;
        lock(&self.device_ends)
            .entry(device.to_string())
            .or_default()
            .push(device_end);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceConnection::new(device, broker_end))
    }
}

/// How [`ScriptedPermissions`] answers requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionScript {
    /// Grant after the configured delay
    Grant,
    /// Deny after the configured delay
    Deny,
    /// Hold the request until [`ScriptedPermissions::respond`] is called
    Manual,
}

struct ScriptState {
    script: PermissionScript,
    delay: Duration,
    requests: Vec<String>,
    pending: Vec<(String, String)>,
}

struct ScriptInner {
    outcomes: broadcast::Sender<PermissionOutcome>,
    grants: GrantStore,
    state: Mutex<ScriptState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptInner {
    fn finish(&self, action: String, device: String, granted: bool) {
        if granted {
            self.grants.grant(&device);
        }
        // Leave the in-flight window before announcing, so the next request
        // the announcement unblocks is not counted as overlapping
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let _ = self.outcomes.send(PermissionOutcome {
            action,
            device,
            granted,
        });
    }
}

/// Permission service with scripted answers
///
/// Tracks how many prompts are open at once so tests can assert that
/// negotiations never overlap.
#[derive(Clone)]
pub struct ScriptedPermissions {
    inner: Arc<ScriptInner>,
}

impl ScriptedPermissions {
    pub fn new(script: PermissionScript, delay: Duration) -> Self {
        Self::with_grants(script, delay, GrantStore::new())
    }

    pub fn with_grants(script: PermissionScript, delay: Duration, grants: GrantStore) -> Self {
        let (outcomes, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ScriptInner {
                outcomes,
                grants,
                state: Mutex::new(ScriptState {
                    script,
                    delay,
                    requests: Vec::new(),
                    pending: Vec::new(),
                }),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Grant store this service writes to
    pub fn grants(&self) -> GrantStore {
        self.inner.grants.clone()
    }

    /// Answer the oldest held request; returns the device it applied to
    pub fn respond(&self, granted: bool) -> Option<String> {
        let (device, action) = {
            let mut state = lock(&self.inner.state);
            if state.pending.is_empty() {
                return None;
            }
            state.pending.remove(0)
        };
        self.inner.finish(action, device.clone(), granted);
        Some(device)
    }

    /// Broadcast an outcome that no request of ours asked for
    pub fn announce(&self, action: &str, device: &str, granted: bool) {
        let _ = self.inner.outcomes.send(PermissionOutcome {
            action: action.to_string(),
            device: device.to_string(),
            granted,
        });
    }

    /// Devices with a prompt currently held open
    pub fn pending(&self) -> Vec<String> {
        lock(&self.inner.state)
            .pending
            .iter()
            .map(|(device, _)| device.clone())
            .collect()
    }

    /// Every device permission was requested for, in order
    pub fn requests(&self) -> Vec<String> {
        lock(&self.inner.state).requests.clone()
    }

    /// Highest number of prompts that were ever open at once
    pub fn max_concurrent(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

impl PermissionService for ScriptedPermissions {
    fn request_permission(&self, device: &str, action: &str) -> crate::Result<()> {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let (script, delay) = {
            let mut state = lock(&self.inner.state);
            state.requests.push(device.to_string());
            if state.script == PermissionScript::Manual {
                state
                    .pending
                    .push((device.to_string(), action.to_string()));
            }
            (state.script, state.delay)
        };

        if script != PermissionScript::Manual {
            let inner = self.inner.clone();
            let device = device.to_string();
            let action = action.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.finish(action, device, script == PermissionScript::Grant);
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PermissionOutcome> {
        self.inner.outcomes.subscribe()
    }
}

/// Run a future with a timeout
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # #[tokio::main]
/// # async fn main() {
/// let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
/// assert_eq!(result.unwrap(), 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_registry_attach_detach() {
        let registry = MockRegistry::with_devices(["dev1"]);
        let mut events = registry.subscribe();
        assert_eq!(registry.subscriber_count(), 1);

        registry.attach("dev2");
        registry.detach("dev1");

        assert_eq!(registry.list_devices().unwrap(), vec!["dev2"]);
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::attached("dev2"));
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::detached("dev1"));

        drop(events);
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn test_mock_registry_open_requires_grant() {
        let grants = GrantStore::new();
        let registry = MockRegistry::with_grants(["dev1"], grants.clone());

        assert!(matches!(
            registry.open("dev1"),
            Err(crate::Error::PermissionDenied(_))
        ));
        grants.grant("dev1");
        assert!(registry.open("dev1").is_ok());
        assert!(matches!(
            registry.open("nope"),
            Err(crate::Error::NotFound(_))
        ));
        assert_eq!(registry.open_count(), 1);
        assert!(registry.take_device_end("dev1").is_some());
    }

    #[tokio::test]
    async fn test_scripted_permissions_grant() {
        let permissions = ScriptedPermissions::new(PermissionScript::Grant, Duration::ZERO);
        let mut outcomes = permissions.subscribe();

        permissions.request_permission("dev1", "test.USB_PERMISSION").unwrap();
        let outcome = with_timeout(DEFAULT_TEST_TIMEOUT, outcomes.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(outcome.granted);
        assert_eq!(outcome.action, "test.USB_PERMISSION");
        assert!(permissions.grants().is_granted("dev1"));
        assert_eq!(permissions.max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_scripted_permissions_manual() {
        let permissions = ScriptedPermissions::new(PermissionScript::Manual, Duration::ZERO);
        let mut outcomes = permissions.subscribe();

        permissions.request_permission("dev1", "a").unwrap();
        assert_eq!(permissions.pending(), vec!["dev1"]);

        assert_eq!(permissions.respond(false).as_deref(), Some("dev1"));
        let outcome = outcomes.recv().await.unwrap();
        assert!(!outcome.granted);
        assert!(permissions.pending().is_empty());
        assert!(permissions.respond(true).is_none());
    }
}
