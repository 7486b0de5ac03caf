//! Client Connection Handler
//!
//! One [`ClientConnection`] runs per accepted socket. It authenticates the
//! peer, reads the single request string and then either hands out a device
//! descriptor or serves the device directory until the client hangs up.

use common::{DeviceConnection, DeviceRegistry};
use protocol::{Request, STATUS_OK};
use std::io;
use std::os::fd::AsFd;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UnixStream;
use tracing::{Instrument, debug, info, info_span};

use super::{streams, transfer};
use crate::error::{BrokerError, Result, is_disconnect};
use crate::notifier::Notifier;
use crate::permission::PermissionGate;
use crate::policy::PeerPolicy;
use crate::stats::SessionStats;

/// State shared by every session of one broker
pub(crate) struct BrokerContext {
    pub registry: Arc<dyn DeviceRegistry>,
    pub gate: PermissionGate,
    pub peers: PeerPolicy,
    pub notifier: Arc<dyn Notifier>,
    pub stats: Arc<SessionStats>,
}

impl BrokerContext {
    /// Run a registry call on the blocking pool
    pub async fn with_registry<T, F>(&self, call: F) -> Result<common::Result<T>>
    where
        F: FnOnce(&dyn DeviceRegistry) -> common::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        crate::task::unblock(move || call(registry.as_ref())).await
    }
}

/// Per-client session
pub struct ClientConnection {
    id: u64,
    stream: UnixStream,
    ctx: Arc<BrokerContext>,
}

impl ClientConnection {
    pub(crate) fn new(id: u64, stream: UnixStream, ctx: Arc<BrokerContext>) -> Self {
        Self { id, stream, ctx }
    }

    /// Serve the session to completion
    ///
    /// Failures are reported to the notifier; a peer that simply went away is
    /// not a failure.
    pub async fn run(self) {
        let ctx = Arc::clone(&self.ctx);
        let span = info_span!("session", id = self.id);

        async move {
            let _active = ctx.stats.session_started();
            debug!("Session started");

            match self.serve().await {
                Ok(()) => debug!("Session closed"),
                Err(e) if e.is_interruption() => debug!("Session interrupted: {}", e),
                Err(e) => {
                    if matches!(e, BrokerError::Security { .. }) {
                        ctx.stats.record_rejected();
                    }
                    ctx.stats.record_failure();
                    ctx.notifier.client_exception(&e);
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn serve(mut self) -> Result<()> {
        let peer = self.stream.peer_cred()?;
        self.ctx.peers.authorize(peer.uid())?;

        match protocol::read_request_async(&mut self.stream).await? {
            Request::Directory => {
                debug!("Directory requested");
                streams::serve_directory(self.stream, &self.ctx).await
            }
            Request::Acquire(device) => {
                debug!(%device, "Device requested");
                self.acquire(device).await
            }
        }
    }

    async fn acquire(mut self, device: String) -> Result<()> {
        let known = self.ctx.with_registry(|registry| registry.list_devices()).await??;
        if !known.contains(&device) {
            return Err(BrokerError::NoDevice(device));
        }

        // Denial is not fatal here: the open below fails on its own when no
        // grant exists, and that is the error the client sees
        let outcome = self.ctx.gate.negotiate(&device).await?;
        debug!(%device, %outcome, "Opening device");

        let name = device.clone();
        let connection: DeviceConnection = self
            .ctx
            .with_registry(move |registry| registry.open(&name))
            .await?
            .map_err(|source| BrokerError::Open {
                device: device.clone(),
                source,
            })?;

        transfer::send_handle(&self.stream, connection.as_fd(), STATUS_OK).await?;
        self.ctx.stats.record_handle_sent();
        info!(%device, "Device handle transferred");

        wait_for_close(&mut self.stream).await?;
        debug!(%device, "Client released device");
        drop(connection);
        Ok(())
    }
}

/// Block until the peer closes its end
///
/// Anything the peer sends in the meantime is discarded.
pub(crate) async fn wait_for_close<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(e) if is_disconnect(&e) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_wait_for_close_discards_input() {
        let (mut ours, mut theirs) = UnixStream::pair().unwrap();

        let waiter = tokio::spawn(async move { wait_for_close(&mut ours).await });
        theirs.write_all(b"ignored").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(theirs);
        assert!(waiter.await.unwrap().is_ok());
    }
}
