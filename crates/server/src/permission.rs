//! Permission gate
//!
//! Permission prompts are global: only one may be outstanding at a time, and
//! the answer arrives asynchronously on the outcome broadcast. The gate turns
//! that into a blocking call for one session at a time:
//!
//! ```text
//! slot.lock() -> subscribe -> request -> wait(outcome | shutdown) -> unlock
//! ```
//!
//! Subscribing before the request is issued means an outcome announced
//! immediately by the service is never missed. The request itself runs on the
//! blocking pool, since a service may consult the USB host to decide.

use crate::error::Result;
use crate::shutdown;
use common::PermissionService;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

/// Suffix appended to the socket name to form the permission action id
pub const ACTION_USB_PERMISSION_SUFFIX: &str = ".USB_PERMISSION";

/// How one negotiation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    Granted,
    Denied,
    /// The wait was interrupted before an answer arrived
    Abandoned,
}

impl NegotiationOutcome {
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }
}

impl fmt::Display for NegotiationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

pub struct PermissionGate {
    slot: Mutex<()>,
    service: Arc<dyn PermissionService>,
    action: String,
    shutdown: watch::Receiver<bool>,
}

impl PermissionGate {
    pub fn new(
        service: Arc<dyn PermissionService>,
        action: impl Into<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            slot: Mutex::new(()),
            service,
            action: action.into(),
            shutdown,
        }
    }

    /// Action id every request is tagged with
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Ask for permission to open `device` and wait for the answer
    ///
    /// Only fails if the request cannot be issued at all. Shutdown while
    /// queued or waiting yields [`NegotiationOutcome::Abandoned`].
    pub async fn negotiate(&self, device: &str) -> Result<NegotiationOutcome> {
        let mut stop = self.shutdown.clone();

        let _slot = tokio::select! {
            slot = self.slot.lock() => slot,
            _ = shutdown::requested(&mut stop) => return Ok(NegotiationOutcome::Abandoned),
        };
        if *stop.borrow() {
            return Ok(NegotiationOutcome::Abandoned);
        }

        let mut outcomes = self.service.subscribe();
        let service = Arc::clone(&self.service);
        let (requested, action) = (device.to_string(), self.action.clone());
        crate::task::unblock(move || service.request_permission(&requested, &action)).await??;
        debug!(device, action = %self.action, "Permission requested");

        let outcome = loop {
            tokio::select! {
                received = outcomes.recv() => match received {
                    Ok(outcome) if outcome.action == self.action => {
                        break if outcome.granted {
                            NegotiationOutcome::Granted
                        } else {
                            NegotiationOutcome::Denied
                        };
                    }
                    Ok(_) => continue,
                    // Our answer may be among the skipped ones; waiting on would
                    // hold the slot until shutdown
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(device, skipped, "Permission outcomes lagged behind, giving up");
                        break NegotiationOutcome::Abandoned;
                    }
                    Err(RecvError::Closed) => break NegotiationOutcome::Abandoned,
                },
                _ = shutdown::requested(&mut stop) => break NegotiationOutcome::Abandoned,
            }
        };

        debug!(device, %outcome, "Permission negotiation finished");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownHandle;
    use common::test_utils::{PermissionScript, ScriptedPermissions, with_timeout};
    use common::{EVENT_CHANNEL_CAPACITY, PermissionOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// Service that takes its time deciding, like one that enumerates devices
    struct SlowPermissions {
        outcomes: broadcast::Sender<PermissionOutcome>,
    }

    impl PermissionService for SlowPermissions {
        fn request_permission(&self, device: &str, action: &str) -> common::Result<()> {
            std::thread::sleep(Duration::from_millis(100));
            let _ = self.outcomes.send(PermissionOutcome {
                action: action.to_string(),
                device: device.to_string(),
                granted: true,
            });
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<PermissionOutcome> {
            self.outcomes.subscribe()
        }
    }

    const ACTION: &str = "usb-broker.libusb.USB_PERMISSION";

    fn gate(script: PermissionScript) -> (Arc<PermissionGate>, Arc<ScriptedPermissions>, ShutdownHandle) {
        let permissions = Arc::new(ScriptedPermissions::new(script, Duration::from_millis(10)));
        let (handle, rx) = ShutdownHandle::new();
        let gate = PermissionGate::new(permissions.clone(), ACTION, rx);
        (Arc::new(gate), permissions, handle)
    }

    #[tokio::test]
    async fn test_grant_and_deny() {
        let (granting, _, _handle) = gate(PermissionScript::Grant);
        assert_eq!(
            granting.negotiate("dev1").await.unwrap(),
            NegotiationOutcome::Granted
        );

        let (denying, _, _handle) = gate(PermissionScript::Deny);
        let outcome = denying.negotiate("dev1").await.unwrap();
        assert_eq!(outcome, NegotiationOutcome::Denied);
        assert!(!outcome.is_granted());
    }

    #[tokio::test]
    async fn test_requests_carry_action() {
        let (gate, permissions, _handle) = gate(PermissionScript::Grant);
        gate.negotiate("dev2").await.unwrap();
        assert_eq!(permissions.requests(), vec!["dev2".to_string()]);
        assert_eq!(gate.action(), ACTION);
    }

    #[tokio::test]
    async fn test_prompts_are_sequential() {
        let (gate, permissions, _handle) = gate(PermissionScript::Grant);

        let mut tasks = Vec::new();
        for device in ["dev1", "dev2", "dev3"] {
            let gate = gate.clone();
            tasks.push(tokio::spawn(async move { gate.negotiate(device).await }));
        }
        for task in tasks {
            assert!(task.await.unwrap().unwrap().is_granted());
        }

        assert_eq!(permissions.requests().len(), 3);
        assert_eq!(permissions.max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_wait() {
        let (gate, permissions, handle) = gate(PermissionScript::Manual);

        let waiting = tokio::spawn({
            let gate = gate.clone();
            async move { gate.negotiate("dev1").await }
        });
        with_timeout(Duration::from_secs(1), async {
            while permissions.pending().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        handle.shutdown();
        let outcome = with_timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, NegotiationOutcome::Abandoned);

        // Later callers do not even issue a request
        assert_eq!(
            gate.negotiate("dev2").await.unwrap(),
            NegotiationOutcome::Abandoned
        );
        assert_eq!(permissions.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_actions_are_ignored() {
        let (gate, permissions, _handle) = gate(PermissionScript::Manual);

        let waiting = tokio::spawn({
            let gate = gate.clone();
            async move { gate.negotiate("dev1").await }
        });
        with_timeout(Duration::from_secs(1), async {
            while permissions.pending().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        permissions.announce("other.action", "dev1", true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        permissions.respond(false);
        let outcome = with_timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, NegotiationOutcome::Denied);
    }

    #[tokio::test]
    async fn test_slow_request_does_not_stall_runtime() {
        let (outcomes, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (_handle, rx) = ShutdownHandle::new();
        let gate = PermissionGate::new(Arc::new(SlowPermissions { outcomes }), ACTION, rx);

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let outcome = gate.negotiate("dev1").await.unwrap();
        ticker.abort();

        assert_eq!(outcome, NegotiationOutcome::Granted);
        // The current-thread runtime kept running while the service slept
        assert!(ticks.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test]
    async fn test_lagged_outcomes_release_the_slot() {
        let (gate, permissions, _handle) = gate(PermissionScript::Manual);

        let waiting = tokio::spawn({
            let gate = gate.clone();
            async move { gate.negotiate("dev1").await }
        });
        with_timeout(Duration::from_secs(1), async {
            while permissions.pending().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // Flood the channel past its capacity before the waiter runs again
        for i in 0..EVENT_CHANNEL_CAPACITY * 2 {
            permissions.announce("other.action", &format!("dev{}", i), false);
        }

        let outcome = with_timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, NegotiationOutcome::Abandoned);

        // The next negotiation gets the slot
        let next = tokio::spawn({
            let gate = gate.clone();
            async move { gate.negotiate("dev2").await }
        });
        with_timeout(Duration::from_secs(1), async {
            while permissions.pending().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        next.abort();
    }
}
