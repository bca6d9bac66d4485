//! USB device access capability.
//!
//! The serial port does not talk to USB hardware itself. Instead the host application
//! provides an implementation of [`UsbDevice`] (and [`UsbHost`] for discovery) backed by
//! libusb, WebUSB or any other device-access layer.
//!
//! All transport failures are reported as [`std::io::Error`].

use bytes::Bytes;
use std::{fmt, io::Result};

/// Endpoint direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::In => write!(f, "IN"),
            Self::Out => write!(f, "OUT"),
        }
    }
}

/// Endpoint descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Endpoint number without the direction bit.
    pub endpoint_number: u8,
    /// Direction.
    pub direction: Direction,
    /// Maximum packet size.
    pub packet_size: usize,
}

/// Alternate setting of an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternateSetting {
    pub alternate_setting: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    /// Endpoints in declaration order.
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Interface descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    /// Alternate settings in declaration order.
    pub alternates: Vec<AlternateSetting>,
}

/// Configuration descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    pub configuration_value: u8,
    /// Interfaces in declaration order.
    pub interfaces: Vec<InterfaceDescriptor>,
}

/// Control request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
}

/// Control request recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// Setup parameters of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlRequest {
    pub request_type: RequestType,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlRequest {
    /// Creates a new control request.
    pub const fn new(request_type: RequestType, recipient: Recipient, request: u8, value: u16, index: u16) -> Self {
        Self { request_type, recipient, request, value, index }
    }

    /// Creates a class-specific request directed at an interface.
    pub const fn class_interface(request: u8, value: u16, interface: u8) -> Self {
        Self::new(RequestType::Class, Recipient::Interface, request, value, interface as u16)
    }
}

/// Completion status reported by the device for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    /// Transfer completed successfully.
    Ok,
    /// Endpoint halted.
    Stall,
    /// Device sent more data than requested.
    Babble,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Stall => write!(f, "stall"),
            Self::Babble => write!(f, "babble"),
        }
    }
}

/// Result of a transfer from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InTransfer {
    pub status: TransferStatus,
    /// Received data, possibly shorter than requested.
    pub data: Bytes,
}

impl InTransfer {
    /// Successful transfer carrying `data`.
    pub fn ok(data: impl Into<Bytes>) -> Self {
        Self { status: TransferStatus::Ok, data: data.into() }
    }

    /// Transfer that completed with `status` and no data.
    pub fn failed(status: TransferStatus) -> Self {
        Self { status, data: Bytes::new() }
    }
}

/// Result of a transfer to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutTransfer {
    pub status: TransferStatus,
    pub bytes_written: usize,
}

impl OutTransfer {
    /// Successful transfer of `bytes_written` bytes.
    pub fn ok(bytes_written: usize) -> Self {
        Self { status: TransferStatus::Ok, bytes_written }
    }

    /// Transfer that completed with `status`.
    pub fn failed(status: TransferStatus) -> Self {
        Self { status, bytes_written: 0 }
    }
}

/// An open or openable USB device.
///
/// Methods take `&self`; implementations are expected to use interior mutability,
/// as the device is shared between a serial port and its readers and writers.
/// All futures are polled on a single thread and need not be `Send`.
#[allow(async_fn_in_trait)]
pub trait UsbDevice {
    /// Vendor id.
    fn vendor_id(&self) -> u16;

    /// Product id.
    fn product_id(&self) -> u16;

    /// All configurations of the device in declaration order.
    fn configurations(&self) -> &[ConfigurationDescriptor];

    /// Value of the active configuration, if any.
    fn configuration(&self) -> Option<u8>;

    /// Whether the device is open.
    fn opened(&self) -> bool;

    /// Opens the device.
    async fn open(&self) -> Result<()>;

    /// Selects the configuration with the specified value.
    async fn select_configuration(&self, value: u8) -> Result<()>;

    /// Claims the specified interface.
    async fn claim_interface(&self, interface: u8) -> Result<()>;

    /// Performs a control transfer to the device.
    async fn control_transfer_out(&self, request: &ControlRequest, data: &[u8]) -> Result<OutTransfer>;

    /// Performs a control transfer from the device.
    async fn control_transfer_in(&self, request: &ControlRequest, length: u16) -> Result<InTransfer>;

    /// Performs a bulk transfer from the specified endpoint.
    async fn transfer_in(&self, endpoint: u8, length: usize) -> Result<InTransfer>;

    /// Performs a bulk transfer to the specified endpoint.
    async fn transfer_out(&self, endpoint: u8, data: &[u8]) -> Result<OutTransfer>;

    /// Closes the device.
    async fn close(&self) -> Result<()>;

    /// Revokes the permission to access the device.
    async fn forget(&self) -> Result<()>;
}

/// Filter used when asking the user to pick a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UsbDeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub class_code: Option<u8>,
}

/// Access to the USB devices of the host.
#[allow(async_fn_in_trait)]
pub trait UsbHost {
    /// Device type.
    type Device: UsbDevice;

    /// Asks for permission to access a device matching any of the filters.
    async fn request_device(&self, filters: &[UsbDeviceFilter]) -> Result<Self::Device>;

    /// Devices that access has previously been granted to.
    async fn devices(&self) -> Result<Vec<Self::Device>>;
}
