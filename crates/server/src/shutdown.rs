//! Cooperative shutdown
//!
//! One `watch` channel carries the broker-wide stop flag. The acceptor and the
//! permission gate both select on it; setting it cannot be undone.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// What happens to live sessions once the acceptor stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Leave sessions running until their peers disconnect
    #[default]
    Detach,
    /// Wait for every session to finish before returning
    Drain,
    /// Abort all sessions
    Abort,
}

impl fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detach => write!(f, "detach"),
            Self::Drain => write!(f, "drain"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

/// Requests broker shutdown from anywhere
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Stop accepting and interrupt pending permission waits
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Resolves once shutdown has been requested
///
/// Never resolves if every handle is gone without requesting it.
pub(crate) async fn requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}
