//! USB subsystem
//!
//! The Linux host backend behind the broker's collaborator traits:
//! - [`UsbHost`]: enumeration and device node opening (rusb)
//! - [`worker`]: dedicated thread pumping libusb hotplug events
//! - [`FilterPermissions`]: grants access by VID:PID filter
//!
//! Grants live in a shared [`common::GrantStore`]; the permission service
//! writes it, the host checks it on open, and hot-unplug revokes.

pub mod filter;
pub mod manager;
pub mod permissions;
pub mod worker;

pub use filter::{DeviceFilter, FilterError};
pub use manager::{DeviceIdentity, UsbHost, device_path};
pub use permissions::FilterPermissions;
pub use worker::{UsbWorkerHandle, spawn_usb_worker};
