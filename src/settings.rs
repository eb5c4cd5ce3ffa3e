//! Transport settings
//!
//! Timing and USB layout used by a [`crate::Connection`]. The defaults match
//! BLP devices; they only need changing for test rigs or other firmware.

use std::time::Duration;

use crate::constants::{
    BLP_DATA_INTERFACE, BLP_ENDPOINT_IN, BLP_ENDPOINT_OUT, NO_TIMEOUT, READ_POLL_TIMEOUT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    /// Interface claimed while the port is open
    pub interface: u8,
    /// Bulk IN endpoint address
    pub endpoint_in: u8,
    /// Bulk OUT endpoint address
    pub endpoint_out: u8,
    /// Timeout of each bulk IN poll
    pub read_poll_timeout: Duration,
    /// Timeout of a bulk OUT transfer (zero: none)
    pub write_timeout: Duration,
    /// Timeout of a control transfer (zero: none)
    pub control_timeout: Duration,
    /// How long close waits for a cancelled read to stop.
    /// `None` means twice the poll timeout.
    pub close_deadline: Option<Duration>,
    /// Detach an active kernel driver before claiming the interface
    pub detach_kernel_driver: bool,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            interface: BLP_DATA_INTERFACE,
            endpoint_in: BLP_ENDPOINT_IN,
            endpoint_out: BLP_ENDPOINT_OUT,
            read_poll_timeout: READ_POLL_TIMEOUT,
            write_timeout: NO_TIMEOUT,
            control_timeout: NO_TIMEOUT,
            close_deadline: None,
            detach_kernel_driver: cfg!(any(target_os = "linux", target_os = "macos")),
        }
    }
}

impl PortSettings {
    pub fn with_interface(mut self, interface: u8) -> Self {
        self.interface = interface;
        self
    }

    pub fn with_endpoints(mut self, endpoint_in: u8, endpoint_out: u8) -> Self {
        self.endpoint_in = endpoint_in;
        self.endpoint_out = endpoint_out;
        self
    }

    pub fn with_read_poll_timeout(mut self, timeout: Duration) -> Self {
        self.read_poll_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn with_close_deadline(mut self, deadline: Duration) -> Self {
        self.close_deadline = Some(deadline);
        self
    }

    pub fn with_kernel_driver_detach(mut self, detach: bool) -> Self {
        self.detach_kernel_driver = detach;
        self
    }

    /// Effective close deadline
    pub fn close_deadline(&self) -> Duration {
        self.close_deadline
            .unwrap_or(self.read_poll_timeout * 2)
    }
}
