//! Device directory streaming
//!
//! A directory session is split in two: the session task owns the read half
//! and only watches for the client hanging up, while a [`DirectoryWorker`]
//! owns the write half and is the single writer of snapshot and live frames.

use common::EventReceiver;
use protocol::{encode_event, encode_string, snapshot_end};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{Instrument, Span, debug, trace};

use super::connection::{BrokerContext, wait_for_close};
use crate::error::{BrokerError, Result};

/// Writes the snapshot, then forwards hotplug events until stopped
struct DirectoryWorker {
    writer: OwnedWriteHalf,
    events: EventReceiver,
    ctx: Arc<BrokerContext>,
}

impl DirectoryWorker {
    async fn run(mut self, stop: oneshot::Receiver<()>) -> Result<()> {
        tokio::select! {
            result = self.forward() => result,
            _ = stop => {
                trace!("Directory worker stopped");
                Ok(())
            }
        }
    }

    async fn forward(&mut self) -> Result<()> {
        let devices = self.ctx.with_registry(|registry| registry.list_devices()).await??;
        for device in &devices {
            self.writer.write_all(&encode_string(device)?).await?;
        }
        self.writer.write_all(&snapshot_end()).await?;
        debug!(count = devices.len(), "Directory snapshot sent");

        while let Some(event) = self.events.recv().await {
            trace!(device = %event.device, state = %event.state, "Forwarding device event");
            self.writer.write_all(&encode_event(&event)?).await?;
        }
        debug!("Device event source closed");
        Ok(())
    }
}

enum Ended {
    Peer(std::io::Result<()>),
    Worker(Result<()>),
}

fn joined(result: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    result.map_err(|e| BrokerError::Task(e.to_string()))?
}

/// Serve a directory session until the client disconnects
///
/// The worker is always joined before returning, so its event subscription is
/// gone by the time the session ends.
pub(crate) async fn serve_directory(stream: UnixStream, ctx: &Arc<BrokerContext>) -> Result<()> {
    ctx.stats.record_directory();
    let (mut reader, writer) = stream.into_split();

    // Subscribe before enumerating: an attach racing the snapshot may show up
    // twice but is never lost
    let worker = DirectoryWorker {
        writer,
        events: ctx.registry.subscribe(),
        ctx: Arc::clone(ctx),
    };
    let (stop_tx, stop_rx) = oneshot::channel();
    let mut handle = tokio::spawn(worker.run(stop_rx).instrument(Span::current()));

    let ended = tokio::select! {
        closed = wait_for_close(&mut reader) => Ended::Peer(closed),
        result = &mut handle => Ended::Worker(joined(result)),
    };

    match ended {
        Ended::Peer(closed) => {
            let _ = stop_tx.send(());
            let worker_result = joined(handle.await);
            closed?;
            worker_result
        }
        Ended::Worker(result) => {
            // The worker dropped the write half; a failed worker ends the
            // session now, a finished one waits for the peer like any other
            result?;
            wait_for_close(&mut reader).await?;
            Ok(())
        }
    }
}
