//! USB host device registry
//!
//! Enumerates devices through libusb and opens them through their usbfs node.
//! Devices are named by that node, `/dev/bus/usb/BBB/DDD`, which is also what
//! libusb expects to be handed together with the descriptor.

use common::{DeviceConnection, DeviceRegistry, EventHub, EventReceiver, GrantStore};
use protocol::DeviceEvent;
use rusb::{Context, Device, DeviceDescriptor, Hotplug, UsbContext};
use std::fs::OpenOptions;
use std::io;
use tracing::{debug, warn};

/// USB hub device class
const CLASS_HUB: u8 = 0x09;

/// Device node for a bus/address pair
pub fn device_path(bus: u8, address: u8) -> String {
    format!("/dev/bus/usb/{:03}/{:03}", bus, address)
}

/// Root hubs are part of the host controller, never handed out
fn is_root_hub<T: UsbContext>(device: &Device<T>, desc: &DeviceDescriptor) -> bool {
    desc.class_code() == CLASS_HUB && device.port_number() == 0
}

fn usb_error(e: rusb::Error) -> common::Error {
    common::Error::Usb(e.to_string())
}

/// Resolves a device identifier to its VID/PID
pub trait DeviceIdentity: Send + Sync + 'static {
    fn usb_ids(&self, device: &str) -> Option<(u16, u16)>;
}

/// Device registry backed by the local USB host
pub struct UsbHost {
    context: Context,
    events: EventHub,
    grants: GrantStore,
}

impl UsbHost {
    pub fn new(grants: GrantStore) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        Ok(Self {
            context,
            events: EventHub::new(),
            grants,
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Hotplug callback feeding this registry's subscribers
    pub(crate) fn hotplug_callback(&self) -> HotplugCallback {
        HotplugCallback {
            events: self.events.clone(),
            grants: self.grants.clone(),
        }
    }

    fn devices(&self) -> Result<Vec<(Device<Context>, DeviceDescriptor)>, rusb::Error> {
        let mut found = Vec::new();
        for device in self.context.devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(e) => {
                    warn!(
                        "Failed to read descriptor: bus={}, addr={}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };
            if !is_root_hub(&device, &desc) {
                found.push((device, desc));
            }
        }
        Ok(found)
    }

    fn find(&self, name: &str) -> Result<Option<DeviceDescriptor>, rusb::Error> {
        Ok(self
            .devices()?
            .into_iter()
            .find(|(device, _)| device_path(device.bus_number(), device.address()) == name)
            .map(|(_, desc)| desc))
    }
}

impl DeviceRegistry for UsbHost {
    fn list_devices(&self) -> common::Result<Vec<String>> {
        let devices = self.devices().map_err(usb_error)?;
        debug!("Enumerated {} devices", devices.len());
        Ok(devices
            .iter()
            .map(|(device, _)| device_path(device.bus_number(), device.address()))
            .collect())
    }

    fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    fn open(&self, device: &str) -> common::Result<DeviceConnection> {
        if self.find(device).map_err(usb_error)?.is_none() {
            return Err(common::Error::NotFound(device.to_string()));
        }
        if !self.grants.is_granted(device) {
            return Err(common::Error::PermissionDenied(device.to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => common::Error::NotFound(device.to_string()),
                io::ErrorKind::PermissionDenied => {
                    common::Error::PermissionDenied(device.to_string())
                }
                _ => common::Error::Io(e),
            })?;
        debug!(device, "Opened device node");
        Ok(DeviceConnection::new(device, file))
    }
}

impl DeviceIdentity for UsbHost {
    fn usb_ids(&self, device: &str) -> Option<(u16, u16)> {
        match self.find(device) {
            Ok(desc) => desc.map(|d| (d.vendor_id(), d.product_id())),
            Err(e) => {
                warn!(device, "Failed to look up device: {}", e);
                None
            }
        }
    }
}

/// Hot-plug callback handler
///
/// Runs on the USB worker thread inside `handle_events`.
pub(crate) struct HotplugCallback {
    events: EventHub,
    grants: GrantStore,
}

impl<T: UsbContext> Hotplug<T> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        if let Ok(desc) = device.device_descriptor() {
            if is_root_hub(&device, &desc) {
                return;
            }
        }
        let name = device_path(device.bus_number(), device.address());
        debug!("Hot-plug: device arrived {}", name);
        self.events.publish(DeviceEvent::attached(name));
    }

    fn device_left(&mut self, device: Device<T>) {
        let name = device_path(device.bus_number(), device.address());
        debug!("Hot-plug: device left {}", name);
        // The address may be reused by the next device; its grant must not be
        if self.grants.revoke(&name) {
            debug!("Revoked grant for {}", name);
        }
        self.events.publish(DeviceEvent::detached(name));
    }
}
