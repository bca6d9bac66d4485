//! Serial port options.

use std::{fmt, str::FromStr};

use crate::{ValidationError, DEFAULT_BUFFER_SIZE};

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StopBits {
    #[default]
    One,
    /// 1.5 stop bits; only ever reported by a device, never configured.
    OnePointFive,
    Two,
}

impl StopBits {
    /// Stop bit settings that can be configured.
    pub const ACCEPTED: [StopBits; 2] = [StopBits::One, StopBits::Two];
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::One => write!(f, "1"),
            Self::OnePointFive => write!(f, "1.5"),
            Self::Two => write!(f, "2"),
        }
    }
}

/// Parity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    /// Parity bit always set; only ever reported by a device, never configured.
    Mark,
    /// Parity bit always clear; only ever reported by a device, never configured.
    Space,
}

impl Parity {
    /// Parity modes that can be configured.
    pub const ACCEPTED: [Parity; 3] = [Parity::None, Parity::Odd, Parity::Even];
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Odd => "odd",
            Self::Even => "even",
            Self::Mark => "mark",
            Self::Space => "space",
        })
    }
}

/// Options for opening a serial port.
///
/// Use [`SerialOptions::new`] with the baud rate and adjust the remaining
/// fields with the `with_*` methods. Options are validated when the port is
/// opened or reconfigured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerialOptions {
    /// Baud rate in bits per second.
    pub baud_rate: u32,
    /// Data bits per character: 5, 6, 7, 8 or 16.
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
    /// Size of the read buffer in bytes.
    pub buffer_size: usize,
}

impl SerialOptions {
    /// Accepted numbers of data bits.
    pub const DATA_BITS: [u8; 5] = [16, 8, 7, 6, 5];

    /// Creates options for the specified baud rate with 8 data bits, no parity and 1 stop bit.
    pub const fn new(baud_rate: u32) -> Self {
        Self { baud_rate, data_bits: 8, stop_bits: StopBits::One, parity: Parity::None, buffer_size: DEFAULT_BUFFER_SIZE }
    }

    /// Sets the number of data bits.
    pub const fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    /// Sets the number of stop bits.
    pub const fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Sets the parity mode.
    pub const fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Sets the read buffer size.
    pub const fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Checks that all options are supported.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !Self::DATA_BITS.contains(&self.data_bits) {
            return Err(ValidationError::DataBits(self.data_bits));
        }
        if !StopBits::ACCEPTED.contains(&self.stop_bits) {
            return Err(ValidationError::StopBits(self.stop_bits));
        }
        if !Parity::ACCEPTED.contains(&self.parity) {
            return Err(ValidationError::Parity(self.parity));
        }
        if self.buffer_size == 0 {
            return Err(ValidationError::BufferSize(self.buffer_size));
        }
        Ok(())
    }

    /// Applies the fields set in `update`.
    pub fn merge(mut self, update: &ReconfigureOptions) -> Self {
        if let Some(baud_rate) = update.baud_rate {
            self.baud_rate = baud_rate;
        }
        if let Some(data_bits) = update.data_bits {
            self.data_bits = data_bits;
        }
        if let Some(stop_bits) = update.stop_bits {
            self.stop_bits = stop_bits;
        }
        if let Some(parity) = update.parity {
            self.parity = parity;
        }
        if let Some(buffer_size) = update.buffer_size {
            self.buffer_size = buffer_size;
        }
        self
    }
}

impl fmt::Display for SerialOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        write!(f, "{},{}{}{}", self.baud_rate, self.data_bits, parity, self.stop_bits)
    }
}

/// Parses options of the form `9600` or `115200,8N1`.
///
/// The baud rate must be a whole number; the optional frame part consists of
/// the data bits, a parity letter (`N`, `O`, `E`, `M`, `S`) and the stop bits
/// (`1`, `1.5` or `2`). The parsed options are validated.
impl FromStr for SerialOptions {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (baud, frame) = match s.split_once([',', ' ']) {
            Some((baud, frame)) => (baud.trim(), Some(frame.trim())),
            None => (s, None),
        };

        let mut options = Self::new(parse_baud_rate(baud)?);

        if let Some(frame) = frame {
            let format = || ValidationError::Format(s.to_string());
            let pos = frame.find(|c: char| c.is_ascii_alphabetic()).ok_or_else(format)?;
            let (data_bits, rest) = frame.split_at(pos);
            let mut rest = rest.chars();
            let parity = rest.next().ok_or_else(format)?;
            let stop_bits = rest.as_str();

            options.data_bits = data_bits.parse().map_err(|_| format())?;
            options.parity = match parity.to_ascii_uppercase() {
                'N' => Parity::None,
                'O' => Parity::Odd,
                'E' => Parity::Even,
                'M' => Parity::Mark,
                'S' => Parity::Space,
                _ => return Err(format()),
            };
            options.stop_bits = match stop_bits {
                "1" => StopBits::One,
                "1.5" => StopBits::OnePointFive,
                "2" => StopBits::Two,
                _ => return Err(format()),
            };
        }

        options.validate()?;
        Ok(options)
    }
}

fn parse_baud_rate(s: &str) -> Result<u32, ValidationError> {
    let invalid = || ValidationError::BaudRate(s.to_string());
    if let Ok(baud_rate) = s.parse::<u32>() {
        return Ok(baud_rate);
    }

    // Accept "9600.0" but not "9600.5".
    let value: f64 = s.parse().map_err(|_| invalid())?;
    if value.fract() != 0.0 || !(0.0..=u32::MAX as f64).contains(&value) {
        return Err(invalid());
    }
    Ok(value as u32)
}

/// Changes to apply to the options of an open port.
///
/// Fields left as `None` keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ReconfigureOptions {
    pub baud_rate: Option<u32>,
    pub data_bits: Option<u8>,
    pub stop_bits: Option<StopBits>,
    pub parity: Option<Parity>,
    pub buffer_size: Option<usize>,
}

impl ReconfigureOptions {
    /// Changes the baud rate.
    pub const fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }

    /// Changes the number of data bits.
    pub const fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = Some(data_bits);
        self
    }

    /// Changes the number of stop bits.
    pub const fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = Some(stop_bits);
        self
    }

    /// Changes the parity mode.
    pub const fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = Some(parity);
        self
    }

    /// Changes the read buffer size.
    pub const fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }
}
