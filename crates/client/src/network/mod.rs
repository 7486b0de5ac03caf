//! Network subsystem
//!
//! Talks to the broker over its local socket.

pub mod client;
pub mod transfer;

pub use client::{AcquiredDevice, BrokerClient, DirectoryStream};
pub use transfer::{Received, recv_handle};
