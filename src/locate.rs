//! Locating the CDC-ACM interfaces and endpoints of a device.

use crate::{
    device::{ConfigurationDescriptor, Direction, EndpointDescriptor, InterfaceDescriptor},
    Error, Result,
};

/// Finds the first interface whose first alternate setting has the specified class code.
///
/// Only the first configuration of the device is searched.
pub fn find_interface(configurations: &[ConfigurationDescriptor], class: u8) -> Result<&InterfaceDescriptor> {
    let Some(cfg) = configurations.first() else {
        return Err(Error::InterfaceNotFound { class });
    };

    cfg.interfaces
        .iter()
        .find(|iface| iface.alternates.first().is_some_and(|alt| alt.interface_class == class))
        .ok_or(Error::InterfaceNotFound { class })
}

/// Finds the first endpoint with the specified direction in the first alternate setting of an interface.
pub fn find_endpoint(iface: &InterfaceDescriptor, direction: Direction) -> Result<EndpointDescriptor> {
    iface
        .alternates
        .first()
        .and_then(|alt| alt.endpoints.iter().find(|ep| ep.direction == direction))
        .copied()
        .ok_or(Error::EndpointNotFound { interface: iface.interface_number, direction })
}
