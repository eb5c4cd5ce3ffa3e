//! USB Serial Transport for BLP Devices
//!
//! This crate drives the virtual serial port of BLP USB devices (VID 0x16C0)
//! directly through libusb, without a kernel serial driver. It speaks the CDC
//! ACM class requests for line coding, control lines and break, and moves
//! data over the bulk endpoints of the data interface.
//!
//! # Features
//!
//! - Port discovery with stable `usb:<vid>:<pid>:<index>` addresses
//! - Baud rate, data bits, stop bits and parity configuration
//! - DTR, RTS and break control
//! - Cancellable single-shot reads and whole-buffer writes
//! - `std::io::Read` / `std::io::Write` adapter
//!
//! # Example
//!
//! ```no_run
//! use blp_usb_serial::{Connection, OpenOptions, SetOptions};
//!
//! fn main() -> blp_usb_serial::Result<()> {
//!     let conn = Connection::new();
//!
//!     // Find attached ports
//!     let ports = conn.list()?;
//!     let Some(port) = ports.first() else {
//!         println!("No BLP device found");
//!         return Ok(());
//!     };
//!
//!     // Open at 115200 8N1 and raise DTR
//!     let options = OpenOptions {
//!         baud_rate: 115_200,
//!         ..OpenOptions::default()
//!     };
//!     conn.open_with(&port.com_name, &options)?;
//!     conn.set(&SetOptions::default().dtr(true))?;
//!
//!     conn.write(b"hello\r\n")?;
//!
//!     let mut buf = [0u8; 64];
//!     let len = buf.len();
//!     let n = conn.read(&mut buf, 0, len)?;
//!     println!("RX  {:02x?}", &buf[..n]);
//!
//!     conn.close()
//! }
//! ```
//!
//! # Supported Devices
//!
//! - BLP virtual serial devices (VID: 0x16C0, any PID)

pub mod address;
pub mod backend;
pub mod configurator;
pub mod connection;
pub mod constants;
pub mod device;
pub mod error;
pub mod locator;
pub mod settings;
pub mod stream;
pub mod structures;
pub mod transfer;

// Re-export main types at crate root
pub use constants::{
    // Device layout
    BLP_DATA_INTERFACE,
    BLP_ENDPOINT_IN,
    BLP_ENDPOINT_OUT,
    BLP_VENDOR_ID,
    // Class requests
    CDC_SEND_BREAK,
    CDC_SET_CONTROL_LINE_STATE,
    CDC_SET_LINE_CODING,
    // Timing
    READ_POLL_TIMEOUT,
};

pub use address::DeviceAddress;
pub use backend::{Candidate, DeviceSource, UsbHandle};
pub use configurator::LineConfigurator;
pub use connection::{Connection, ConnectionState};
pub use device::RusbSource;
pub use error::{Result, SerialError};
pub use locator::DeviceLocator;
pub use settings::PortSettings;
pub use stream::PortStream;
pub use structures::{Direction, LineConfig, OpenOptions, Parity, PortInfo, SetOptions, StopBits};
pub use transfer::{PendingRead, PendingWrite, ReadPhase, TransferRequest};
