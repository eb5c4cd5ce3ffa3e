//! Device discovery and address resolution
//!
//! Use [`DeviceLocator::list`] to find attached BLP ports, or
//! [`DeviceLocator::resolve`] to turn a `usb:<vid>:<pid>:<index>` address back
//! into a device that can be opened.

use log::{debug, trace};

use crate::address::DeviceAddress;
use crate::backend::{Candidate, DeviceSource, UsbHandle};
use crate::constants::BLP_VENDOR_ID;
use crate::error::{Result, SerialError};
use crate::structures::PortInfo;

/// Filters a device source by vendor and maps between devices and addresses
#[derive(Debug, Clone)]
pub struct DeviceLocator<S> {
    source: S,
    vendor_id: u16,
}

impl<S: DeviceSource> DeviceLocator<S> {
    /// Create a locator for BLP devices
    pub fn new(source: S) -> Self {
        Self::with_vendor(source, BLP_VENDOR_ID)
    }

    /// Create a locator filtering on another vendor ID
    pub fn with_vendor(source: S, vendor_id: u16) -> Self {
        Self { source, vendor_id }
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// List the ports that can be opened
    ///
    /// Each matching device is opened briefly to read its string descriptors.
    /// Devices that cannot be opened (typically a port bound to a driver libusb
    /// cannot use) are left out of the result without raising an error.
    pub fn list(&self) -> Result<Vec<PortInfo>> {
        let mut ports: Vec<PortInfo> = Vec::new();

        for candidate in self.source.enumerate()? {
            if candidate.vendor_id != self.vendor_id {
                continue;
            }

            let handle = match self.source.open(&candidate.device) {
                Ok(handle) => handle,
                Err(e) => {
                    debug!(
                        "Skipping {:04x}:{:04x}: cannot open ({})",
                        candidate.vendor_id, candidate.product_id, e
                    );
                    continue;
                }
            };

            let earlier = ports.iter().map(|port| port.product_id);
            let Some(index) = next_index(earlier, candidate.product_id) else {
                debug!(
                    "Skipping {:04x}:{:04x}: index space exhausted",
                    candidate.vendor_id, candidate.product_id
                );
                continue;
            };
            let address = DeviceAddress::new(candidate.vendor_id, candidate.product_id, index);

            ports.push(PortInfo {
                com_name: address.to_string(),
                manufacturer: read_string(&handle, candidate.manufacturer_index),
                serial_number: read_string(&handle, candidate.serial_number_index),
                device_name: read_string(&handle, candidate.product_index),
                vendor_id: candidate.vendor_id,
                product_id: candidate.product_id,
                bcd_device: candidate.bcd_device,
                address,
            });
        }

        debug!("Found {} BLP ports", ports.len());
        Ok(ports)
    }

    /// Resolve an address to the device it names
    ///
    /// The vendor is checked before enumerating. The index counts devices with
    /// the same vendor and product ID in discovery order.
    pub fn resolve(&self, address: &DeviceAddress) -> Result<Candidate<S::Device>> {
        if address.vendor_id != self.vendor_id {
            return Err(SerialError::UnsupportedVendor {
                vendor_id: address.vendor_id,
            });
        }

        self.source
            .enumerate()?
            .into_iter()
            .filter(|candidate| address.matches(candidate.vendor_id, candidate.product_id))
            .nth(address.index as usize)
            .ok_or_else(|| SerialError::DeviceNotFound {
                address: address.to_string(),
            })
    }
}

/// Index of the next port with `product_id`, given the ports listed before it
fn next_index(earlier: impl Iterator<Item = u16>, product_id: u16) -> Option<u16> {
    let count = earlier.filter(|pid| *pid == product_id).count();
    u16::try_from(count).ok()
}

fn read_string<H: UsbHandle>(handle: &H, index: Option<u8>) -> Option<String> {
    let index = index?;
    match handle.read_string(index) {
        Ok(s) if !s.is_empty() => Some(s),
        Ok(_) => None,
        Err(e) => {
            trace!("String descriptor {} unreadable: {}", index, e);
            None
        }
    }
}
