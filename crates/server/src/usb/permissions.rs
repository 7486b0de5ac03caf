//! Filter-based permission service
//!
//! Stands in for an interactive prompt on headless hosts: a request is granted
//! when the device matches one of the configured VID:PID filters, and the
//! decision is announced on the outcome channel like any other answer.

use common::{EVENT_CHANNEL_CAPACITY, GrantStore, PermissionOutcome, PermissionService};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::filter::DeviceFilter;
use super::manager::DeviceIdentity;

pub struct FilterPermissions {
    filters: Vec<DeviceFilter>,
    identity: Arc<dyn DeviceIdentity>,
    grants: GrantStore,
    outcomes: broadcast::Sender<PermissionOutcome>,
}

impl FilterPermissions {
    /// An empty filter list grants every device
    pub fn new(filters: Vec<DeviceFilter>, identity: Arc<dyn DeviceIdentity>, grants: GrantStore) -> Self {
        let (outcomes, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            filters,
            identity,
            grants,
            outcomes,
        }
    }

    fn decide(&self, device: &str) -> bool {
        match self.identity.usb_ids(device) {
            Some((vid, pid)) => DeviceFilter::any_matches(&self.filters, vid, pid),
            None => false,
        }
    }
}

impl PermissionService for FilterPermissions {
    fn request_permission(&self, device: &str, action: &str) -> common::Result<()> {
        let granted = self.decide(device);
        if granted {
            self.grants.grant(device);
            info!(device, "Permission granted");
        } else {
            info!(device, "Permission denied by device filters");
        }

        let receivers = self
            .outcomes
            .send(PermissionOutcome {
                action: action.to_string(),
                device: device.to_string(),
                granted,
            })
            .unwrap_or(0);
        debug!(device, receivers, "Permission outcome announced");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PermissionOutcome> {
        self.outcomes.subscribe()
    }
}
