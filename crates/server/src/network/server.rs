//! Local Socket Server
//!
//! Binds the broker socket, accepts clients, and spawns one
//! [`ClientConnection`] per client into a `JoinSet`.

use common::{DeviceRegistry, PermissionService, SocketName};
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use super::connection::{BrokerContext, ClientConnection};
use crate::error::{BrokerError, Result};
use crate::notifier::Notifier;
use crate::permission::{ACTION_USB_PERMISSION_SUFFIX, PermissionGate};
use crate::policy::PeerPolicy;
use crate::shutdown::{self, ShutdownHandle, ShutdownPolicy};
use crate::stats::SessionStats;

/// Where and how the broker listens
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub socket: SocketName,
    pub peers: PeerPolicy,
    pub shutdown: ShutdownPolicy,
}

impl BrokerOptions {
    /// Same-user peers only, detach on shutdown
    pub fn new(socket: SocketName) -> Self {
        Self {
            socket,
            peers: PeerPolicy::current_user([]),
            shutdown: ShutdownPolicy::default(),
        }
    }

    pub fn with_peers(mut self, peers: PeerPolicy) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown = policy;
        self
    }

    /// Action id permission requests are tagged with
    pub fn permission_action(&self) -> String {
        format!("{}{}", self.socket.name(), ACTION_USB_PERMISSION_SUFFIX)
    }
}

/// The backends a broker is wired to
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn DeviceRegistry>,
    pub permissions: Arc<dyn PermissionService>,
    pub notifier: Arc<dyn Notifier>,
}

/// Privileged USB broker
///
/// Owns the listening socket. Every accepted client is served by its own task;
/// a failing session never affects the acceptor or other sessions.
pub struct BrokerServer {
    listener: UnixListener,
    socket: SocketName,
    policy: ShutdownPolicy,
    ctx: Arc<BrokerContext>,
    shutdown: ShutdownHandle,
    stop: watch::Receiver<bool>,
}

impl BrokerServer {
    /// Bind the socket; must be called inside a Tokio runtime
    pub fn bind(options: BrokerOptions, collaborators: Collaborators) -> Result<Self> {
        let std_listener = options.socket.bind().map_err(BrokerError::Server)?;
        std_listener
            .set_nonblocking(true)
            .map_err(BrokerError::Server)?;
        let listener = UnixListener::from_std(std_listener).map_err(BrokerError::Server)?;

        let (shutdown, stop) = ShutdownHandle::new();
        let action = options.permission_action();
        info!(socket = %options.socket, %action, "Broker socket bound");

        let ctx = BrokerContext {
            registry: collaborators.registry,
            gate: PermissionGate::new(collaborators.permissions, action, stop.clone()),
            peers: options.peers,
            notifier: collaborators.notifier,
            stats: SessionStats::new(),
        };

        Ok(Self {
            listener,
            socket: options.socket,
            policy: options.shutdown,
            ctx: Arc::new(ctx),
            shutdown,
            stop,
        })
    }

    pub fn socket(&self) -> &SocketName {
        &self.socket
    }

    /// Action id permission requests are tagged with
    pub fn permission_action(&self) -> &str {
        self.ctx.gate.action()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.ctx.stats)
    }

    /// Accept clients until shutdown is requested or the socket fails
    ///
    /// The exit hook runs in both cases. A socket failure is reported to the
    /// notifier and returned.
    pub async fn run(self) -> Result<()> {
        let Self {
            listener,
            socket,
            policy,
            ctx,
            shutdown: handle,
            mut stop,
        } = self;

        info!(%socket, "Broker accepting connections");
        let mut sessions = JoinSet::new();
        let mut next_id: u64 = 0;

        let result = loop {
            tokio::select! {
                _ = shutdown::requested(&mut stop) => {
                    info!("Shutdown requested, no longer accepting connections");
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        next_id += 1;
                        debug!(session = next_id, "Accepted connection");
                        let connection = ClientConnection::new(next_id, stream, Arc::clone(&ctx));
                        sessions.spawn(connection.run());
                    }
                    Err(e) => break Err(BrokerError::Server(e)),
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    reap(&ctx, finished);
                }
            }
        };

        // Irreversible from here on, also after a socket failure
        handle.shutdown();
        drop(listener);
        socket.cleanup();

        if let Err(e) = &result {
            ctx.notifier.server_error(e);
        }

        match policy {
            ShutdownPolicy::Detach => {
                if !sessions.is_empty() {
                    info!(sessions = sessions.len(), "Leaving live sessions running");
                }
                sessions.detach_all();
            }
            ShutdownPolicy::Drain => {
                info!(sessions = sessions.len(), "Draining live sessions");
                while let Some(finished) = sessions.join_next().await {
                    reap(&ctx, finished);
                }
            }
            ShutdownPolicy::Abort => {
                if !sessions.is_empty() {
                    warn!(sessions = sessions.len(), "Aborting live sessions");
                }
                sessions.shutdown().await;
            }
        }

        ctx.notifier.server_exit();
        result
    }
}

/// Report a session task that panicked
fn reap(ctx: &BrokerContext, finished: std::result::Result<(), JoinError>) {
    if let Err(e) = finished {
        if e.is_panic() {
            ctx.notifier.client_error(&BrokerError::Task(e.to_string()));
        }
    }
}
