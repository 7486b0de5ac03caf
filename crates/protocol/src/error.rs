//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Encoded string does not fit the 16-bit length prefix
    #[error("String too long: {size} bytes encoded (max: {max})")]
    StringTooLong { size: usize, max: usize },

    /// Malformed modified UTF-8 input
    #[error("Malformed string data at byte {offset}")]
    MalformedString { offset: usize },

    /// A surrogate code unit without its partner
    #[error("Unpaired surrogate at byte {offset}")]
    UnpairedSurrogate { offset: usize },

    /// Status byte outside the known event set
    #[error("Unknown device state: {0}")]
    UnknownState(u8),

    /// I/O error during frame operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the peer went away in the middle of a frame
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
