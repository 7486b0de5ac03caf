//! Protocol library for usb-broker
//!
//! This crate defines the wire format spoken between the broker and its local
//! clients: a single length-prefixed request string from the client, answered
//! either by a status byte with an attached device descriptor or by a device
//! directory stream.
//!
//! # Example
//!
//! ```
//! use protocol::{DeviceEvent, encode_event, read_event};
//! use std::io::Cursor;
//!
//! let frame = encode_event(&DeviceEvent::attached("/dev/bus/usb/001/003")).unwrap();
//! let decoded = read_event(&mut Cursor::new(frame.to_vec())).unwrap();
//! assert_eq!(decoded.device, "/dev/bus/usb/001/003");
//! ```

pub mod codec;
pub mod error;
pub mod mutf8;
pub mod types;

pub use codec::{
    MAX_STRING_LEN, encode_event, encode_string, read_event, read_string, snapshot_end,
    write_string,
};

#[cfg(feature = "async")]
pub use codec::{read_event_async, read_request_async, read_string_async, write_string_async};
pub use error::{ProtocolError, Result};
pub use types::{DeviceEvent, DeviceState, Request, STATUS_OK};
