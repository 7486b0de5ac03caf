//! Client error types

use protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Broker unreachable at {socket}: {source}")]
    Connect {
        socket: String,
        #[source]
        source: std::io::Error,
    },

    /// The broker closed the session without answering
    #[error("Broker refused device {0}")]
    Refused(String),

    #[error("Unexpected status byte {0}")]
    UnexpectedStatus(u8),

    #[error("Broker sent no descriptor for {0}")]
    MissingHandle(String),

    #[error("Device name must not be empty")]
    EmptyName,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
