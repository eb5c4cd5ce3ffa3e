//! Device addresses of the form `usb:<vid>:<pid>:<index>`

use std::str::FromStr;

use crate::error::SerialError;

/// Address of an attached device
///
/// `index` tells apart devices that share a vendor/product pair. It is the
/// position of the device among its twins in discovery order and is recomputed
/// on every enumeration, so it is not stable across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceAddress {
    pub vendor_id: u16,
    pub product_id: u16,
    pub index: u16,
}

impl DeviceAddress {
    pub fn new(vendor_id: u16, product_id: u16, index: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            index,
        }
    }

    /// Check whether a device with these IDs is a twin of this address
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

fn parse_hex(field: &str) -> Option<u16> {
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    u16::from_str_radix(digits, 16).ok()
}

impl FromStr for DeviceAddress {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SerialError::InvalidAddress(s.to_string());

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 || parts[0] != "usb" {
            return Err(invalid());
        }

        let vendor_id = parse_hex(parts[1]).ok_or_else(invalid)?;
        let product_id = parse_hex(parts[2]).ok_or_else(invalid)?;
        let index = parts[3].parse::<u16>().map_err(|_| invalid())?;

        Ok(Self::new(vendor_id, product_id, index))
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "usb:{:x}:{:x}:{}",
            self.vendor_id, self.product_id, self.index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let addr: DeviceAddress = "usb:16c0:2aaf:0".parse().unwrap();
        assert_eq!(addr, DeviceAddress::new(0x16c0, 0x2aaf, 0));

        let addr: DeviceAddress = "usb:0x16C0:0x2AAF:12".parse().unwrap();
        assert_eq!(addr, DeviceAddress::new(0x16c0, 0x2aaf, 12));
    }

    #[test]
    fn test_display_address() {
        assert_eq!(
            DeviceAddress::new(0x16c0, 0x05e1, 3).to_string(),
            "usb:16c0:5e1:3"
        );
    }

    #[test]
    fn test_display_parses_back() {
        let addr = DeviceAddress::new(0x16c0, 0x0001, 65535);
        assert_eq!(addr.to_string().parse::<DeviceAddress>().unwrap(), addr);
    }

    #[test]
    fn test_reject_malformed() {
        for bad in [
            "",
            "usb",
            "usb:16c0:2aaf",
            "usb:16c0:2aaf:0:1",
            "com:16c0:2aaf:0",
            "usb:zzzz:2aaf:0",
            "usb:16c0:12345:0",
            "usb:16c0:2aaf:-1",
            "usb:16c0:2aaf:x",
        ] {
            assert!(
                matches!(bad.parse::<DeviceAddress>(), Err(SerialError::InvalidAddress(_))),
                "accepted {:?}",
                bad
            );
        }
    }
}
