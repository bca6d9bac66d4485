//! Serial ports over USB CDC-ACM
//!
//! This crate drives USB-to-serial adapters that implement the Communications Device Class
//! Abstract Control Model directly, without an operating-system serial driver.
//!
//! The USB device access itself is supplied by the caller through the [`UsbDevice`] and
//! [`UsbHost`] traits. Use a [`Serial`] registry to obtain a [`SerialPort`], [open](SerialPort::open)
//! it and then use its [reader](SerialPort::readable) and [writer](SerialPort::writable).
//!

pub mod device;
mod error;
mod line_coding;
mod locate;
mod options;
pub mod port;
mod registry;
mod signals;

pub use device::{UsbDevice, UsbHost};
pub use error::{Error, Result, ValidationError};
pub use line_coding::LineCoding;
pub use locate::{find_endpoint, find_interface};
pub use options::{Parity, ReconfigureOptions, SerialOptions, StopBits};
pub use port::{PortState, SerialPort, SerialPortInfo, SerialReader, SerialWriter};
pub use registry::{Serial, SerialPortFilter};
pub use signals::{OutputSignals, SignalUpdate};

const REQ_SET_LINE_CODING: u8 = 0x20;
const REQ_GET_LINE_CODING: u8 = 0x21;
const REQ_SET_CONTROL_LINE_STATE: u8 = 0x22;
const REQ_SEND_BREAK: u8 = 0x23;

/// Size of the line coding structure.
pub const LINE_CODING_SIZE: usize = 7;

/// Default size of the read buffer in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 255;

/// USB interface classes used to locate the CDC-ACM interfaces of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortConfig {
    /// Class code of the control interface.
    pub control_interface_class: u8,
    /// Class code of the interface carrying the bulk data endpoints.
    pub transfer_interface_class: u8,
}

impl PortConfig {
    /// Communications interface class code.
    pub const CDC_COMMUNICATIONS: u8 = 0x02;
    /// CDC data interface class code.
    pub const CDC_DATA: u8 = 0x0a;

    /// Creates the standard CDC-ACM configuration.
    pub const fn new() -> Self {
        Self { control_interface_class: Self::CDC_COMMUNICATIONS, transfer_interface_class: Self::CDC_DATA }
    }

    /// Sets the class code of the control interface.
    ///
    /// Some vendor-specific adapters expose the ACM protocol on an interface
    /// with the vendor-specific class code `0xff`.
    pub const fn with_control_interface_class(mut self, class: u8) -> Self {
        self.control_interface_class = class;
        self
    }

    /// Sets the class code of the data interface.
    pub const fn with_transfer_interface_class(mut self, class: u8) -> Self {
        self.transfer_interface_class = class;
        self
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::new()
    }
}
