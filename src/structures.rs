//! BLP USB serial protocol structures
//!
//! This module contains the line coding payload, the open/set option shapes
//! accepted by the port, and the port information produced by enumeration.

use serde::{Deserialize, Serialize};

use crate::address::DeviceAddress;
use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_DATA_BITS, LINE_CODING_SIZE, PARITY_EVEN, PARITY_MARK, PARITY_NONE,
    PARITY_ODD, PARITY_SPACE, STOP_BITS_ONE, STOP_BITS_ONE_AND_HALF, STOP_BITS_TWO,
    VALID_DATA_BITS,
};
use crate::error::{Result, SerialError};

/// Bulk transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::In => write!(f, "IN"),
            Direction::Out => write!(f, "OUT"),
        }
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    OneAndHalf,
    Two,
}

impl StopBits {
    /// Map a requested stop-bit count to the nearest supported setting.
    ///
    /// Anything strictly between 1.4 and 1.6 is 1.5, exactly 2 is 2, and every
    /// other value falls back to 1.
    pub fn from_requested(value: f64) -> Self {
        if value > 1.4 && value < 1.6 {
            StopBits::OneAndHalf
        } else if value == 2.0 {
            StopBits::Two
        } else {
            StopBits::One
        }
    }

    /// Line coding byte 4
    pub fn code(&self) -> u8 {
        match self {
            StopBits::One => STOP_BITS_ONE,
            StopBits::OneAndHalf => STOP_BITS_ONE_AND_HALF,
            StopBits::Two => STOP_BITS_TWO,
        }
    }

    /// Inverse of [`StopBits::code`]; unknown codes decode to one stop bit
    pub fn from_code(code: u8) -> Self {
        match code {
            STOP_BITS_ONE_AND_HALF => StopBits::OneAndHalf,
            STOP_BITS_TWO => StopBits::Two,
            _ => StopBits::One,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StopBits::One => "1",
            StopBits::OneAndHalf => "1.5",
            StopBits::Two => "2",
        }
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    /// Match a parity name case-insensitively; unknown names are `None`
    pub fn from_name(name: &str) -> Self {
        Self::parse(name).unwrap_or(Parity::None)
    }

    fn parse(name: &str) -> Option<Self> {
        [
            ("none", Parity::None),
            ("odd", Parity::Odd),
            ("even", Parity::Even),
            ("mark", Parity::Mark),
            ("space", Parity::Space),
        ]
        .into_iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, parity)| parity)
    }

    /// Line coding byte 5
    pub fn code(&self) -> u8 {
        match self {
            Parity::None => PARITY_NONE,
            Parity::Odd => PARITY_ODD,
            Parity::Even => PARITY_EVEN,
            Parity::Mark => PARITY_MARK,
            Parity::Space => PARITY_SPACE,
        }
    }

    /// Inverse of [`Parity::code`]; unknown codes decode to no parity
    pub fn from_code(code: u8) -> Self {
        match code {
            PARITY_ODD => Parity::Odd,
            PARITY_EVEN => Parity::Even,
            PARITY_MARK => Parity::Mark,
            PARITY_SPACE => Parity::Space,
            _ => Parity::None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Parity::None => "N",
            Parity::Odd => "O",
            Parity::Even => "E",
            Parity::Mark => "M",
            Parity::Space => "S",
        }
    }
}

/// Serial line coding
///
/// The framing sent to the device with SET_LINE_CODING when the port is
/// opened and whenever it is reconfigured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineConfig {
    /// Baud rate in bits per second
    pub baud_rate: u32,
    /// Data bits per character (typically 5-8)
    pub data_bits: u8,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Parity
    pub parity: Parity,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl LineConfig {
    /// Create an 8N1 line configuration at the given baud rate
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: DEFAULT_DATA_BITS,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }

    pub fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Pack into the 7-byte SET_LINE_CODING payload
    pub fn pack(&self) -> [u8; LINE_CODING_SIZE] {
        let mut buf = [0u8; LINE_CODING_SIZE];
        buf[0..4].copy_from_slice(&self.baud_rate.to_le_bytes());
        buf[4] = self.stop_bits.code();
        buf[5] = self.parity.code();
        buf[6] = self.data_bits;
        buf
    }

    /// Unpack a SET_LINE_CODING / GET_LINE_CODING payload
    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < LINE_CODING_SIZE {
            return Err(SerialError::InvalidConfig(format!(
                "line coding payload is {} bytes, expected {}",
                data.len(),
                LINE_CODING_SIZE
            )));
        }

        Ok(Self {
            baud_rate: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            stop_bits: StopBits::from_code(data[4]),
            parity: Parity::from_code(data[5]),
            data_bits: data[6],
        })
    }
}

impl std::fmt::Display for LineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits,
            self.parity.label(),
            self.stop_bits.label()
        )
    }
}

/// Encode a line configuration into the SET_LINE_CODING payload
pub fn encode_line_coding(config: &LineConfig) -> [u8; LINE_CODING_SIZE] {
    config.pack()
}

/// Decode a SET_LINE_CODING payload
pub fn decode_line_coding(data: &[u8]) -> Result<LineConfig> {
    LineConfig::unpack(data)
}

/// Options accepted when opening a port
///
/// Mirrors the loosely typed option object of the host application: stop bits
/// are a number and parity is a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OpenOptions {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: f64,
    pub parity: String,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            stop_bits: 1.0,
            parity: "none".to_string(),
        }
    }
}

impl OpenOptions {
    /// Reject option values the device cannot represent
    pub fn validate(&self) -> Result<()> {
        if !VALID_DATA_BITS.contains(&self.data_bits) {
            return Err(SerialError::InvalidConfig(format!(
                "dataBits is invalid: {}",
                self.data_bits
            )));
        }

        if ![1.0, 1.5, 2.0].contains(&self.stop_bits) {
            return Err(SerialError::InvalidConfig(format!(
                "stopBits is invalid: {}",
                self.stop_bits
            )));
        }

        if Parity::parse(&self.parity).is_none() {
            return Err(SerialError::InvalidConfig(format!(
                "parity is invalid: {}",
                self.parity
            )));
        }

        Ok(())
    }

    /// Convert into a line configuration without validation
    pub fn line_config(&self) -> LineConfig {
        LineConfig {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: StopBits::from_requested(self.stop_bits),
            parity: Parity::from_name(&self.parity),
        }
    }
}

impl From<&OpenOptions> for LineConfig {
    fn from(options: &OpenOptions) -> Self {
        options.line_config()
    }
}

/// Partial line state update; absent fields are left unchanged on the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetOptions {
    /// Assert (true) or clear (false) a break condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brk: Option<bool>,
    /// Data Terminal Ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtr: Option<bool>,
    /// Request To Send
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rts: Option<bool>,
}

impl SetOptions {
    pub fn brk(mut self, assert: bool) -> Self {
        self.brk = Some(assert);
        self
    }

    pub fn dtr(mut self, assert: bool) -> Self {
        self.dtr = Some(assert);
        self
    }

    pub fn rts(mut self, assert: bool) -> Self {
        self.rts = Some(assert);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.brk.is_none() && self.dtr.is_none() && self.rts.is_none()
    }
}

/// A listed port
///
/// String descriptors that were absent or unreadable are `None` and are left
/// out of the serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    /// Address string to pass to `Connection::open`
    pub com_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    #[serde(skip)]
    pub address: DeviceAddress,
}

impl std::fmt::Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.com_name)?;
        if let Some(ref name) = self.device_name {
            write!(f, " {}", name)?;
        }
        if let Some(ref manufacturer) = self.manufacturer {
            write!(f, " ({})", manufacturer)?;
        }
        if let Some(ref serial) = self.serial_number {
            write!(f, " [{}]", serial)?;
        }
        Ok(())
    }
}
