//! Common utilities for usb-broker
//!
//! This crate provides shared functionality between the broker and its client:
//! the device collaborator traits the broker is written against, error
//! handling, logging setup, and in-memory test doubles.

pub mod device;
pub mod error;
pub mod logging;
pub mod socket;
pub mod test_utils;

pub use device::{
    DeviceConnection, DeviceRegistry, EVENT_CHANNEL_CAPACITY, EventHub, EventReceiver, GrantStore,
    PermissionOutcome, PermissionService,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use socket::SocketName;
