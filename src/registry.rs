//! Serial port registry.

use std::rc::Rc;

use crate::{
    device::{UsbDevice, UsbDeviceFilter, UsbHost},
    PortConfig, Result, SerialPort,
};

/// Filter for [`Serial::request_port`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SerialPortFilter {
    pub usb_vendor_id: Option<u16>,
    pub usb_product_id: Option<u16>,
}

impl SerialPortFilter {
    /// Matches devices with the specified vendor id.
    pub const fn vendor(usb_vendor_id: u16) -> Self {
        Self { usb_vendor_id: Some(usb_vendor_id), usb_product_id: None }
    }

    /// Matches devices with the specified vendor and product id.
    pub const fn product(usb_vendor_id: u16, usb_product_id: u16) -> Self {
        Self { usb_vendor_id: Some(usb_vendor_id), usb_product_id: Some(usb_product_id) }
    }
}

/// Provides serial ports for the CDC-ACM devices of a USB host.
#[derive(Debug, Clone)]
pub struct Serial<H> {
    host: H,
    config: PortConfig,
}

impl<H> Serial<H>
where
    H: UsbHost,
    H::Device: 'static,
{
    /// Creates a registry for standard CDC-ACM devices attached to `host`.
    pub fn new(host: H) -> Self {
        Self { host, config: PortConfig::default() }
    }

    /// Uses the specified interface classes to locate ports.
    pub fn with_config(mut self, config: PortConfig) -> Self {
        self.config = config;
        self
    }

    /// The USB host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Asks for permission to access a device and returns its serial port.
    ///
    /// Only devices with a control interface are offered. If no filters are
    /// specified, any such device matches.
    pub async fn request_port(&self, filters: &[SerialPortFilter]) -> Result<SerialPort<H::Device>> {
        let class_code = Some(self.config.control_interface_class);
        let mut usb_filters: Vec<_> = filters
            .iter()
            .map(|filter| UsbDeviceFilter {
                vendor_id: filter.usb_vendor_id,
                product_id: filter.usb_product_id,
                class_code,
            })
            .collect();
        if usb_filters.is_empty() {
            usb_filters.push(UsbDeviceFilter { class_code, ..Default::default() });
        }

        tracing::debug!("requesting device matching {usb_filters:?}");
        let dev = self.host.request_device(&usb_filters).await?;
        SerialPort::new(Rc::new(dev), &self.config)
    }

    /// Serial ports of all devices that access has been granted to.
    ///
    /// Devices without the required interfaces are skipped.
    pub async fn ports(&self) -> Result<Vec<SerialPort<H::Device>>> {
        let devices = self.host.devices().await?;

        let mut ports = Vec::with_capacity(devices.len());
        for dev in devices {
            let (vid, pid) = (dev.vendor_id(), dev.product_id());
            match SerialPort::new(Rc::new(dev), &self.config) {
                Ok(port) => ports.push(port),
                Err(err) => tracing::debug!("skipping device {vid:04x}:{pid:04x}: {err}"),
            }
        }

        Ok(ports)
    }
}
