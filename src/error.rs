//! Error types for the BLP USB serial library
//!
//! This module defines the error types used throughout the library
//! for handling lifecycle, USB communication and configuration errors.

use std::time::Duration;

use thiserror::Error;

use crate::constants::request_name;
use crate::structures::Direction;

/// Result type alias for serial port operations
pub type Result<T> = std::result::Result<T, SerialError>;

/// Error types for serial port operations
#[derive(Error, Debug)]
pub enum SerialError {
    /// USB error from the rusb library
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// I/O error (worker thread spawn)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Address names a vendor other than the supported one
    #[error("Unsupported vendor 0x{vendor_id:04x}: only BLP devices are supported")]
    UnsupportedVendor { vendor_id: u16 },

    /// No device matches the address
    #[error("Device not found: {address}")]
    DeviceNotFound { address: String },

    /// Address string could not be parsed
    #[error("Invalid device address '{0}': expected usb:<vid>:<pid>:<index>")]
    InvalidAddress(String),

    /// Open options rejected before touching the device
    #[error("Invalid port configuration: {0}")]
    InvalidConfig(String),

    /// Read range does not fit in the destination buffer
    #[error("Read of {length} bytes at offset {offset} exceeds buffer of {buffer_len} bytes")]
    InvalidRange {
        offset: usize,
        length: usize,
        buffer_len: usize,
    },

    /// Port is already open
    #[error("Port is already open")]
    AlreadyOpen,

    /// Port is not open
    #[error("Port is not open")]
    NotOpen,

    /// Failed to open the USB device
    #[error("Failed to open USB device: {status}")]
    Open { status: rusb::Error },

    /// Failed to claim interface
    #[error("Failed to claim USB interface: {status}")]
    Claim { status: rusb::Error },

    /// Failed to release interface
    #[error("Failed to release USB interface: {status}")]
    Release { status: rusb::Error },

    /// Failed to detach kernel driver
    #[error("Failed to detach kernel driver: {0}")]
    DetachKernelDriver(rusb::Error),

    /// Class control transfer failed
    #[error("Control transfer {} (0x{request:02x}) failed: {status}", request_label(.request))]
    Configuration { request: u8, status: rusb::Error },

    /// Bulk transfer failed
    #[error("Bulk {direction} transfer failed: {status}")]
    Transfer {
        direction: Direction,
        status: rusb::Error,
    },

    /// A read is already outstanding on this port
    #[error("A read is already in progress")]
    ReadInProgress,

    /// The read worker did not observe cancellation in time
    #[error("Read worker did not stop within {waited:?}")]
    CancelTimeout { waited: Duration },

    /// A worker thread exited without reporting a result
    #[error("Transfer worker exited without a result")]
    WorkerLost,
}

fn request_label(request: &u8) -> &'static str {
    request_name(*request)
}

impl SerialError {
    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SerialError::CancelTimeout { .. }
                | SerialError::Usb(rusb::Error::Timeout)
                | SerialError::Transfer {
                    status: rusb::Error::Timeout,
                    ..
                }
                | SerialError::Configuration {
                    status: rusb::Error::Timeout,
                    ..
                }
        )
    }

    /// Check if this error is a USB error
    pub fn is_usb_error(&self) -> bool {
        matches!(
            self,
            SerialError::Usb(_)
                | SerialError::Open { .. }
                | SerialError::Claim { .. }
                | SerialError::Release { .. }
                | SerialError::DetachKernelDriver(_)
                | SerialError::Configuration { .. }
                | SerialError::Transfer { .. }
        )
    }

    /// The underlying libusb status, if this error carries one
    pub fn usb_status(&self) -> Option<rusb::Error> {
        match self {
            SerialError::Usb(status)
            | SerialError::DetachKernelDriver(status)
            | SerialError::Open { status }
            | SerialError::Claim { status }
            | SerialError::Release { status }
            | SerialError::Configuration { status, .. }
            | SerialError::Transfer { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<SerialError> for std::io::Error {
    fn from(err: SerialError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            SerialError::Io(e) => e.kind(),
            SerialError::NotOpen => ErrorKind::NotConnected,
            SerialError::InvalidRange { .. }
            | SerialError::InvalidAddress(_)
            | SerialError::InvalidConfig(_) => ErrorKind::InvalidInput,
            SerialError::DeviceNotFound { .. } => ErrorKind::NotFound,
            SerialError::ReadInProgress => ErrorKind::WouldBlock,
            e if e.is_timeout() => ErrorKind::TimedOut,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
