//! usb-broker client
//!
//! Library side of the broker protocol: acquire an open device descriptor, or
//! watch the device directory.
//!
//! # Example
//!
//! ```no_run
//! use client::BrokerClient;
//! use common::SocketName;
//!
//! # async fn example() -> client::Result<()> {
//! let broker = BrokerClient::new(SocketName::abstract_name("usb-broker.libusb"));
//! for device in broker.list().await? {
//!     println!("{}", device);
//! }
//! let scanner = broker.acquire("/dev/bus/usb/001/004").await?;
//! // Hand `scanner.as_fd()` to libusb_wrap_sys_device()
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod network;

pub use error::{ClientError, Result};
pub use network::{AcquiredDevice, BrokerClient, DirectoryStream};
