//! Protocol type definitions
//!
//! The broker speaks a tiny fixed protocol: the client sends one string, and the
//! server answers either with a status byte carrying a device descriptor or with
//! a stream of device names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status byte sent with a transferred device descriptor
pub const STATUS_OK: u8 = 0;

/// Request selected by the first (and only) client message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Stream the device directory followed by hotplug events
    Directory,
    /// Acquire an open descriptor for the named device
    Acquire(String),
}

impl Request {
    /// Interpret the request string: empty selects the directory
    pub fn from_wire(name: String) -> Self {
        if name.is_empty() {
            Request::Directory
        } else {
            Request::Acquire(name)
        }
    }

    /// The string that selects this request on the wire
    pub fn wire_name(&self) -> &str {
        match self {
            Request::Directory => "",
            Request::Acquire(name) => name,
        }
    }
}

/// Live device state carried by a hotplug frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DeviceState {
    Attached = 0,
    Detached = 1,
}

impl DeviceState {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for DeviceState {
    type Error = crate::ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeviceState::Attached),
            1 => Ok(DeviceState::Detached),
            other => Err(crate::ProtocolError::UnknownState(other)),
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Attached => write!(f, "attached"),
            DeviceState::Detached => write!(f, "detached"),
        }
    }
}

/// Hotplug notification for one device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub state: DeviceState,
    pub device: String,
}

impl DeviceEvent {
    pub fn attached(device: impl Into<String>) -> Self {
        Self {
            state: DeviceState::Attached,
            device: device.into(),
        }
    }

    pub fn detached(device: impl Into<String>) -> Self {
        Self {
            state: DeviceState::Detached,
            device: device.into(),
        }
    }
}
