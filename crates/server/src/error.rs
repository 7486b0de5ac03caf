//! Broker error types

use protocol::ProtocolError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Peer credentials failed the peer policy
    #[error("Spoofing detected: peer uid {peer_uid} is not authorized")]
    Security { peer_uid: u32 },

    #[error("Malformed request: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("No device found: {0}")]
    NoDevice(String),

    #[error("Unable to open device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: common::Error,
    },

    #[error("Session I/O failed: {0}")]
    Transport(#[from] io::Error),

    /// Listening socket failure; ends the broker
    #[error("Server socket failed: {0}")]
    Server(#[source] io::Error),

    #[error("Device backend failed: {0}")]
    Collaborator(#[from] common::Error),

    /// A session or worker task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),
}

impl BrokerError {
    /// The peer went away; never reported
    pub fn is_interruption(&self) -> bool {
        match self {
            Self::Transport(e) => is_disconnect(e),
            Self::Protocol(e) => e.is_disconnect(),
            _ => false,
        }
    }
}

pub(crate) fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

pub type Result<T> = std::result::Result<T, BrokerError>;
