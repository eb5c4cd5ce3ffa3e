//! Line coding and control line requests
//!
//! All requests are CDC class requests addressed to the interface (wIndex 0)
//! and are serialized through the control lane of the owning connection.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use log::debug;

use crate::backend::UsbHandle;
use crate::constants::*;
use crate::error::{Result, SerialError};
use crate::structures::{encode_line_coding, LineConfig, SetOptions};

/// Issues configuration requests over a device's control endpoint
pub struct LineConfigurator<'a, H> {
    handle: &'a H,
    lane: &'a Mutex<()>,
    timeout: Duration,
}

impl<'a, H: UsbHandle> LineConfigurator<'a, H> {
    /// `lane` guards the control endpoint: at most one request is in flight
    pub fn new(handle: &'a H, lane: &'a Mutex<()>, timeout: Duration) -> Self {
        Self {
            handle,
            lane,
            timeout,
        }
    }

    /// Send SET_LINE_CODING
    pub fn set_line_coding(&self, config: &LineConfig) -> Result<()> {
        debug!("SET_LINE_CODING {}", config);
        self.control_out(CDC_SET_LINE_CODING, 0, &encode_line_coding(config))
    }

    /// Send SET_CONTROL_LINE_STATE once per supplied signal
    ///
    /// The current state of the other signal is not read back, so each
    /// transfer carries only the bit of the signal being set.
    pub fn set_line_state(&self, dtr: Option<bool>, rts: Option<bool>) -> Result<()> {
        if let Some(assert) = dtr {
            let value = if assert { CONTROL_LINE_DTR } else { 0 };
            debug!("SET_CONTROL_LINE_STATE dtr={}", assert);
            self.control_out(CDC_SET_CONTROL_LINE_STATE, value, &[])?;
        }
        if let Some(assert) = rts {
            let value = if assert { CONTROL_LINE_RTS } else { 0 };
            debug!("SET_CONTROL_LINE_STATE rts={}", assert);
            self.control_out(CDC_SET_CONTROL_LINE_STATE, value, &[])?;
        }
        Ok(())
    }

    /// Send SEND_BREAK, asserting an indefinite break or clearing it
    pub fn set_break(&self, assert: bool) -> Result<()> {
        let value = if assert { BREAK_INDEFINITE } else { BREAK_OFF };
        debug!("SEND_BREAK {}", if assert { "on" } else { "off" });
        self.control_out(CDC_SEND_BREAK, value, &[])
    }

    /// Apply a partial update: break first, then DTR, then RTS
    pub fn apply(&self, options: &SetOptions) -> Result<()> {
        if let Some(brk) = options.brk {
            self.set_break(brk)?;
        }
        self.set_line_state(options.dtr, options.rts)
    }

    fn control_out(&self, request: u8, value: u16, data: &[u8]) -> Result<()> {
        let _lane = self.lane.lock().unwrap_or_else(PoisonError::into_inner);
        self.handle
            .write_control(
                CDC_REQUEST_TYPE_OUT,
                request,
                value,
                0, // wIndex
                data,
                self.timeout,
            )
            .map_err(|status| SerialError::Configuration { request, status })?;
        Ok(())
    }
}
