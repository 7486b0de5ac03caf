//! usb-broker server
//!
//! A privileged broker that hands USB device descriptors to unprivileged local
//! clients over a Unix socket. Clients either ask for one device by name and
//! receive an open descriptor (after a permission negotiation), or subscribe to
//! the device directory and receive a snapshot followed by live attach/detach
//! events.
//!
//! The broker is written against the collaborator traits in [`common::device`];
//! [`usb`] provides the Linux host implementation used by the `usb-broker`
//! binary.
//!
//! # Example
//!
//! ```no_run
//! use common::{GrantStore, SocketName};
//! use server::{BrokerOptions, BrokerServer, Collaborators, LogNotifier};
//! use server::usb::{FilterPermissions, UsbHost};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let grants = GrantStore::new();
//! let host = Arc::new(UsbHost::new(grants.clone())?);
//! let permissions = Arc::new(FilterPermissions::new(Vec::new(), host.clone(), grants));
//!
//! let server = BrokerServer::bind(
//!     BrokerOptions::new(SocketName::abstract_name("usb-broker.libusb")),
//!     Collaborators {
//!         registry: host,
//!         permissions,
//!         notifier: Arc::new(LogNotifier::default()),
//!     },
//! )?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod network;
pub mod notifier;
pub mod permission;
pub mod policy;
pub mod service;
pub mod shutdown;
pub mod stats;
mod task;
pub mod usb;

pub use config::ServerConfig;
pub use error::{BrokerError, Result};
pub use network::{BrokerOptions, BrokerServer, Collaborators};
pub use notifier::{LogNotifier, Notifier};
pub use permission::{ACTION_USB_PERMISSION_SUFFIX, NegotiationOutcome, PermissionGate};
pub use policy::PeerPolicy;
pub use shutdown::{ShutdownHandle, ShutdownPolicy};
pub use stats::{SessionStats, StatsSnapshot};
