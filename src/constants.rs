//! BLP USB serial protocol constants
//!
//! This module contains the vendor filter, interface and endpoint numbers,
//! CDC class request codes and the default transfer timing used by the
//! transport.

use std::time::Duration;

// ============================================================================
// USB Vendor ID
// ============================================================================

/// BLP vendor ID. Only devices reporting this vendor are listed or opened.
pub const BLP_VENDOR_ID: u16 = 0x16C0;

// ============================================================================
// Interface and Endpoints
// ============================================================================

/// Data interface claimed while a port is open
pub const BLP_DATA_INTERFACE: u8 = 1;

/// Bulk IN endpoint (device to host)
pub const BLP_ENDPOINT_IN: u8 = 0x81;
/// Bulk OUT endpoint (host to device)
pub const BLP_ENDPOINT_OUT: u8 = 0x01;

/// Size of the scratch buffer used for each bulk IN poll
pub const READ_PACKET_SIZE: usize = 64;

// ============================================================================
// CDC Class Requests
// ============================================================================

/// bmRequestType: class, interface recipient, host-to-device
pub const CDC_REQUEST_TYPE_OUT: u8 = 0x21;

/// Set line coding (baud rate, stop bits, parity, data bits)
pub const CDC_SET_LINE_CODING: u8 = 0x20;
/// Set control line state (DTR / RTS)
pub const CDC_SET_CONTROL_LINE_STATE: u8 = 0x22;
/// Send break
pub const CDC_SEND_BREAK: u8 = 0x23;

/// Length of the SET_LINE_CODING payload
pub const LINE_CODING_SIZE: usize = 7;

/// DTR bit in the SET_CONTROL_LINE_STATE wValue
pub const CONTROL_LINE_DTR: u16 = 1 << 0;
/// RTS bit in the SET_CONTROL_LINE_STATE wValue
pub const CONTROL_LINE_RTS: u16 = 1 << 1;

/// SEND_BREAK wValue asserting an indefinite break
pub const BREAK_INDEFINITE: u16 = 0xFFFF;
/// SEND_BREAK wValue clearing the break
pub const BREAK_OFF: u16 = 0;

// ============================================================================
// Stop Bits and Parity Codes (line coding bytes 4 and 5)
// ============================================================================

/// 1 stop bit
pub const STOP_BITS_ONE: u8 = 0;
/// 1.5 stop bits
pub const STOP_BITS_ONE_AND_HALF: u8 = 1;
/// 2 stop bits
pub const STOP_BITS_TWO: u8 = 2;

/// No parity
pub const PARITY_NONE: u8 = 0;
/// Odd parity
pub const PARITY_ODD: u8 = 1;
/// Even parity
pub const PARITY_EVEN: u8 = 2;
/// Mark parity
pub const PARITY_MARK: u8 = 3;
/// Space parity
pub const PARITY_SPACE: u8 = 4;

// ============================================================================
// Timing
// ============================================================================

/// Per-attempt timeout of a bulk IN poll
pub const READ_POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Zero means "no timeout" for libusb transfers
pub const NO_TIMEOUT: Duration = Duration::ZERO;

// ============================================================================
// Default Line Settings
// ============================================================================

/// Default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;
/// Default data bits
pub const DEFAULT_DATA_BITS: u8 = 8;

/// Data bit counts accepted by `OpenOptions::validate`
pub const VALID_DATA_BITS: [u8; 4] = [5, 6, 7, 8];

/// Get the name of a CDC class request code
pub fn request_name(request: u8) -> &'static str {
    match request {
        CDC_SET_LINE_CODING => "SET_LINE_CODING",
        CDC_SET_CONTROL_LINE_STATE => "SET_CONTROL_LINE_STATE",
        CDC_SEND_BREAK => "SEND_BREAK",
        _ => "UNKNOWN",
    }
}
