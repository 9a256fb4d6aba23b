//! Claimed USB device
//!
//! Opens the peripheral, detaches any kernel driver bound to the interface,
//! claims it, and reads the endpoint descriptors the resolver needs. The
//! interface is released (and the kernel driver reattached) on drop.

use crate::endpoint::EndpointDescriptor;
use crate::error::{DriverError, Result};
use crate::transfer::TransferClass;
use rusb::{Context, Device, DeviceHandle};
use tracing::{debug, warn};

/// Open handle with one claimed interface
pub struct ClaimedDevice {
    handle: DeviceHandle<Context>,
    interface: u8,
    reattach_kernel_driver: bool,
    bus: u8,
    address: u8,
}

impl ClaimedDevice {
    /// Open `device`, claim `interface` and return its endpoint descriptors
    pub fn open(
        device: &Device<Context>,
        interface: u8,
    ) -> Result<(Self, Vec<EndpointDescriptor>)> {
        let endpoints = read_endpoints(device, interface)?;

        let handle = device.open().map_err(|e| {
            warn!("Failed to open device: {}", e);
            DriverError::Usb(e)
        })?;

        let reattach_kernel_driver = match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                handle.detach_kernel_driver(interface)?;
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
                false
            }
        };

        handle.claim_interface(interface).map_err(|e| {
            warn!("Failed to claim interface {}: {}", interface, e);
            DriverError::Usb(e)
        })?;

        debug!(
            "Claimed interface {} on bus {} address {}",
            interface,
            device.bus_number(),
            device.address()
        );

        Ok((
            Self {
                handle,
                interface,
                reattach_kernel_driver,
                bus: device.bus_number(),
                address: device.address(),
            },
            endpoints,
        ))
    }

    pub fn handle(&self) -> &DeviceHandle<Context> {
        &self.handle
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}

impl Drop for ClaimedDevice {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            debug!("Failed to release interface {}: {}", self.interface, e);
        }

        if self.reattach_kernel_driver {
            if let Err(e) = self.handle.attach_kernel_driver(self.interface) {
                debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    self.interface, e
                );
            }
        }

        debug!("Closed device at bus {} address {}", self.bus, self.address);
    }
}

/// Endpoints of the first alternate setting of `interface`
fn read_endpoints(device: &Device<Context>, interface: u8) -> Result<Vec<EndpointDescriptor>> {
    let config = device.active_config_descriptor()?;

    let setting = config
        .interfaces()
        .find(|i| i.number() == interface)
        .and_then(|i| i.descriptors().next())
        .ok_or(DriverError::Usb(rusb::Error::NotFound))?;

    Ok(setting
        .endpoint_descriptors()
        .map(|endpoint| EndpointDescriptor::from(&endpoint))
        .collect())
}

impl From<&rusb::EndpointDescriptor<'_>> for EndpointDescriptor {
    fn from(endpoint: &rusb::EndpointDescriptor<'_>) -> Self {
        EndpointDescriptor::new(
            endpoint.address(),
            map_transfer_type(endpoint.transfer_type()),
            endpoint.max_packet_size(),
        )
    }
}

fn map_transfer_type(transfer_type: rusb::TransferType) -> TransferClass {
    match transfer_type {
        rusb::TransferType::Control => TransferClass::Control,
        rusb::TransferType::Isochronous => TransferClass::Isochronous,
        rusb::TransferType::Bulk => TransferClass::Bulk,
        rusb::TransferType::Interrupt => TransferClass::Interrupt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_transfer_type() {
        assert_eq!(map_transfer_type(rusb::TransferType::Bulk), TransferClass::Bulk);
        assert_eq!(
            map_transfer_type(rusb::TransferType::Interrupt),
            TransferClass::Interrupt
        );
        assert_eq!(
            map_transfer_type(rusb::TransferType::Control),
            TransferClass::Control
        );
    }
}
