//! Endpoint resolution
//!
//! Picks the display (bulk OUT) and keypad (interrupt IN) endpoints out of
//! the interface's endpoint list and allocates one reusable transfer
//! descriptor for each.

use crate::error::{DriverError, Result};
use crate::transfer::{Direction, Transfer, TransferClass};
use std::fmt;
use tracing::debug;

/// `wMaxPacketSize` bits 0..10 hold the packet size; 11..12 are the
/// high-bandwidth multiplier
const MAX_PACKET_SIZE_MASK: u16 = 0x07ff;

/// Raw endpoint descriptor as advertised by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// `bEndpointAddress`
    pub address: u8,
    /// `bmAttributes`
    pub attributes: u8,
    /// `wMaxPacketSize`
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    pub fn new(address: u8, class: TransferClass, max_packet_size: u16) -> Self {
        Self {
            address,
            attributes: class.attributes(),
            max_packet_size,
        }
    }

    pub fn direction(&self) -> Direction {
        Direction::of(self.address)
    }

    pub fn transfer_class(&self) -> TransferClass {
        TransferClass::from_attributes(self.attributes)
    }

    pub fn packet_size(&self) -> usize {
        (self.max_packet_size & MAX_PACKET_SIZE_MASK) as usize
    }
}

/// The two endpoints a session needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Display endpoint
    BulkOut,
    /// Keypad endpoint
    InterruptIn,
}

impl ChannelRole {
    fn matches(self, descriptor: &EndpointDescriptor) -> bool {
        match self {
            ChannelRole::BulkOut => {
                descriptor.direction() == Direction::Out
                    && descriptor.transfer_class() == TransferClass::Bulk
            }
            ChannelRole::InterruptIn => {
                descriptor.direction() == Direction::In
                    && descriptor.transfer_class() == TransferClass::Interrupt
            }
        }
    }

    fn class(self) -> TransferClass {
        match self {
            ChannelRole::BulkOut => TransferClass::Bulk,
            ChannelRole::InterruptIn => TransferClass::Interrupt,
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRole::BulkOut => write!(f, "bulk OUT"),
            ChannelRole::InterruptIn => write!(f, "interrupt IN"),
        }
    }
}

/// A selected endpoint; immutable once resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub address: u8,
    pub max_packet_size: usize,
}

/// Result of a successful resolution
#[derive(Debug)]
pub struct ResolvedChannels {
    pub bulk_out: Channel,
    pub interrupt_in: Channel,
    pub out_transfer: Transfer,
    pub in_transfer: Transfer,
}

/// Select the first bulk OUT and first interrupt IN endpoint and allocate
/// their transfer descriptors
///
/// Both endpoints are mandatory. Anything allocated before a failure is
/// dropped on the error path, so a failed resolution leaves nothing behind.
pub fn resolve(descriptors: &[EndpointDescriptor]) -> Result<ResolvedChannels> {
    let bulk_out = select(descriptors, ChannelRole::BulkOut)?;
    let interrupt_in = select(descriptors, ChannelRole::InterruptIn)?;

    let out_transfer = allocate(ChannelRole::BulkOut, bulk_out)?;
    let in_transfer = allocate(ChannelRole::InterruptIn, interrupt_in)?;

    Ok(ResolvedChannels {
        bulk_out,
        interrupt_in,
        out_transfer,
        in_transfer,
    })
}

fn select(descriptors: &[EndpointDescriptor], role: ChannelRole) -> Result<Channel> {
    let descriptor = descriptors
        .iter()
        .find(|d| role.matches(d))
        .ok_or(DriverError::MissingChannel(role))?;

    let channel = Channel {
        address: descriptor.address,
        max_packet_size: descriptor.packet_size(),
    };
    debug!(
        "Selected {} endpoint {:#04x} (max packet {} bytes)",
        role, channel.address, channel.max_packet_size
    );
    Ok(channel)
}

fn allocate(role: ChannelRole, channel: Channel) -> Result<Transfer> {
    Transfer::alloc(channel.address, role.class(), channel.max_packet_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk_out(address: u8, size: u16) -> EndpointDescriptor {
        EndpointDescriptor::new(address, TransferClass::Bulk, size)
    }

    fn interrupt_in(address: u8, size: u16) -> EndpointDescriptor {
        EndpointDescriptor::new(address, TransferClass::Interrupt, size)
    }

    #[test]
    fn test_resolve_both_channels() {
        let resolved = resolve(&[interrupt_in(0x81, 8), bulk_out(0x02, 64)]).unwrap();

        assert_eq!(resolved.bulk_out.address, 0x02);
        assert_eq!(resolved.bulk_out.max_packet_size, 64);
        assert_eq!(resolved.interrupt_in.address, 0x81);
        assert_eq!(resolved.out_transfer.capacity(), 64);
        assert_eq!(resolved.in_transfer.capacity(), 8);
        assert_eq!(resolved.in_transfer.class(), TransferClass::Interrupt);
    }

    #[test]
    fn test_first_match_wins() {
        let resolved = resolve(&[
            bulk_out(0x01, 32),
            bulk_out(0x03, 64),
            interrupt_in(0x82, 8),
            interrupt_in(0x84, 16),
        ])
        .unwrap();

        assert_eq!(resolved.bulk_out.address, 0x01);
        assert_eq!(resolved.interrupt_in.address, 0x82);
    }

    #[test]
    fn test_wrong_direction_or_class_ignored() {
        let descriptors = [
            // bulk IN and interrupt OUT do not qualify
            EndpointDescriptor::new(0x81, TransferClass::Bulk, 64),
            EndpointDescriptor::new(0x02, TransferClass::Interrupt, 8),
            bulk_out(0x03, 64),
        ];

        let err = resolve(&descriptors).unwrap_err();
        assert!(matches!(
            err,
            DriverError::MissingChannel(ChannelRole::InterruptIn)
        ));
    }

    #[test]
    fn test_missing_bulk_out() {
        let err = resolve(&[interrupt_in(0x81, 8)]).unwrap_err();
        assert!(matches!(err, DriverError::MissingChannel(ChannelRole::BulkOut)));
    }

    #[test]
    fn test_empty_descriptor_list() {
        assert!(matches!(
            resolve(&[]),
            Err(DriverError::MissingChannel(_))
        ));
    }

    #[test]
    fn test_zero_packet_size_is_resource_exhaustion() {
        let err = resolve(&[bulk_out(0x01, 64), interrupt_in(0x81, 0)]).unwrap_err();
        assert!(matches!(err, DriverError::ResourceExhausted(_)));
    }

    #[test]
    fn test_high_bandwidth_bits_masked() {
        let resolved = resolve(&[bulk_out(0x01, 0x1200), interrupt_in(0x81, 0x0808)]).unwrap();
        assert_eq!(resolved.bulk_out.max_packet_size, 0x200);
        assert_eq!(resolved.interrupt_in.max_packet_size, 8);
    }
}
