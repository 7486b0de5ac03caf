//! Broker client
//!
//! Every request runs on its own connection: the broker reads exactly one
//! request string per session.

use common::SocketName;
use protocol::{DeviceEvent, DeviceState, STATUS_OK, read_string_async, write_string_async};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::transfer::recv_handle;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct BrokerClient {
    socket: SocketName,
}

impl BrokerClient {
    pub fn new(socket: SocketName) -> Self {
        Self { socket }
    }

    pub fn socket(&self) -> &SocketName {
        &self.socket
    }

    async fn open_session(&self) -> Result<UnixStream> {
        let connect = || -> io::Result<UnixStream> {
            let stream = self.socket.connect()?;
            stream.set_nonblocking(true)?;
            UnixStream::from_std(stream)
        };
        connect().map_err(|source| ClientError::Connect {
            socket: self.socket.to_string(),
            source,
        })
    }

    /// Acquire an open descriptor for `device`
    ///
    /// The broker keeps the session, and its own copy of the device, open until
    /// the returned [`AcquiredDevice`] is dropped.
    pub async fn acquire(&self, device: &str) -> Result<AcquiredDevice> {
        if device.is_empty() {
            return Err(ClientError::EmptyName);
        }
        let mut session = self.open_session().await?;
        write_string_async(&mut session, device).await?;
        debug!(device, "Acquire requested");

        let received = match recv_handle(&session).await {
            Ok(Some(received)) => received,
            Ok(None) => return Err(ClientError::Refused(device.to_string())),
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                return Err(ClientError::Refused(device.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if received.status != STATUS_OK {
            return Err(ClientError::UnexpectedStatus(received.status));
        }
        let fd = received
            .fd
            .ok_or_else(|| ClientError::MissingHandle(device.to_string()))?;

        Ok(AcquiredDevice {
            device: device.to_string(),
            fd,
            _session: session,
        })
    }

    /// Open a directory session and read its snapshot
    pub async fn directory(&self) -> Result<DirectoryStream> {
        let mut session = self.open_session().await?;
        write_string_async(&mut session, "").await?;

        let mut reader = BufReader::new(session);
        let mut snapshot = Vec::new();
        loop {
            let device = read_string_async(&mut reader).await?;
            if device.is_empty() {
                break;
            }
            snapshot.push(device);
        }
        debug!(count = snapshot.len(), "Directory snapshot received");

        Ok(DirectoryStream { reader, snapshot })
    }

    /// Current device list
    pub async fn list(&self) -> Result<Vec<String>> {
        Ok(self.directory().await?.into_snapshot())
    }
}

/// A device descriptor handed out by the broker
#[derive(Debug)]
pub struct AcquiredDevice {
    device: String,
    fd: OwnedFd,
    _session: UnixStream,
}

impl AcquiredDevice {
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Give up the session but keep the descriptor
    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }
}

impl AsFd for AcquiredDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for AcquiredDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Live view of the broker's device directory
#[derive(Debug)]
pub struct DirectoryStream {
    reader: BufReader<UnixStream>,
    snapshot: Vec<String>,
}

impl DirectoryStream {
    /// Devices attached when the session started
    pub fn snapshot(&self) -> &[String] {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> Vec<String> {
        self.snapshot
    }

    /// Next attach/detach event; `None` once the broker closes the stream
    pub async fn next_event(&mut self) -> Result<Option<DeviceEvent>> {
        let state = match self.reader.read_u8().await {
            Ok(byte) => DeviceState::try_from(byte)?,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let device = read_string_async(&mut self.reader).await?;
        Ok(Some(DeviceEvent { state, device }))
    }
}
