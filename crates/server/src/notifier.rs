//! Failure and lifecycle notifications
//!
//! The broker never decides how failures are surfaced. It hands them to a
//! [`Notifier`] supplied by the embedder; [`LogNotifier`] is the default used by
//! the `usb-broker` binary.

use crate::error::BrokerError;
use crate::service::{self, ServiceState};
use tracing::{error, info, warn};

pub trait Notifier: Send + Sync + 'static {
    /// A session ended with a recoverable failure
    fn client_exception(&self, error: &BrokerError);

    /// A session task died unexpectedly
    fn client_error(&self, error: &BrokerError);

    /// The listening socket failed; the broker is going down
    fn server_error(&self, error: &BrokerError);

    /// The acceptor has stopped, whatever the reason
    fn server_exit(&self) {}
}

/// Notifier that writes everything to the tracing log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    service_mode: bool,
}

impl LogNotifier {
    pub fn new(service_mode: bool) -> Self {
        Self { service_mode }
    }
}

impl Notifier for LogNotifier {
    fn client_exception(&self, error: &BrokerError) {
        warn!("Client session failed: {}", error);
    }

    fn client_error(&self, error: &BrokerError) {
        error!("Client session crashed: {}", error);
    }

    fn server_error(&self, error: &BrokerError) {
        error!("Broker failed: {}", error);
    }

    fn server_exit(&self) {
        info!("Broker stopped");
        if self.service_mode {
            if let Err(e) = service::notify(ServiceState::Stopping) {
                warn!("Failed to notify systemd: {:#}", e);
            }
        }
    }
}
