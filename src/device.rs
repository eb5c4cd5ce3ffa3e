//! libusb device source
//!
//! This module provides [`RusbSource`], the production [`DeviceSource`] built on
//! `rusb`, and the [`UsbHandle`] implementation for `rusb::DeviceHandle`.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use log::{debug, trace};
use rusb::{Context, Device, DeviceHandle, UsbContext, Version};

use crate::backend::{Candidate, DeviceSource, UsbHandle};
use crate::error::Result;

/// Serializes enumeration across every source in the process
fn discovery_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Convert a decoded descriptor version back to its bcd form
pub fn version_to_bcd(version: Version) -> u16 {
    let major = version.major() as u16;
    ((major / 10) << 12)
        | ((major % 10) << 8)
        | ((version.minor() as u16 & 0x0F) << 4)
        | (version.sub_minor() as u16 & 0x0F)
}

/// Device source backed by libusb
///
/// Every enumeration creates its own libusb context. Devices and handles keep
/// that context alive, so it is torn down together with the last handle
/// opened from it.
#[derive(Debug, Default, Clone, Copy)]
pub struct RusbSource;

impl RusbSource {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceSource for RusbSource {
    type Device = Device<Context>;
    type Handle = DeviceHandle<Context>;

    fn enumerate(&self) -> Result<Vec<Candidate<Device<Context>>>> {
        let _guard = discovery_lock();

        let context = Context::new()?;
        let mut candidates = Vec::new();

        for device in context.devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(e) => {
                    trace!(
                        "Skipping bus {} addr {}: no device descriptor ({})",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };

            candidates.push(Candidate {
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
                bcd_device: version_to_bcd(desc.device_version()),
                manufacturer_index: desc.manufacturer_string_index(),
                serial_number_index: desc.serial_number_string_index(),
                product_index: desc.product_string_index(),
                device,
            });
        }

        debug!("Enumerated {} USB devices", candidates.len());
        Ok(candidates)
    }

    fn open(&self, device: &Device<Context>) -> rusb::Result<DeviceHandle<Context>> {
        device.open()
    }
}

impl<T: UsbContext + 'static> UsbHandle for DeviceHandle<T> {
    fn read_string(&self, index: u8) -> rusb::Result<String> {
        DeviceHandle::read_string_descriptor_ascii(self, index)
    }

    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        DeviceHandle::kernel_driver_active(self, interface)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::detach_kernel_driver(self, interface)
    }

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::claim_interface(self, interface)
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, interface)
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        DeviceHandle::write_control(self, request_type, request, value, index, data, timeout)
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::read_bulk(self, endpoint, buf, timeout)
    }

    fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::write_bulk(self, endpoint, buf, timeout)
    }
}
