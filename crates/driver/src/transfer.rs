//! Asynchronous transfer descriptors and the transport seam
//!
//! A [`Transfer`] is a reusable descriptor bound to one endpoint. It owns the
//! endpoint buffer. Submitting moves the descriptor into the [`Transport`];
//! the transport hands it back to the [`Completion`] once the device has
//! answered, so whoever holds the descriptor owns the buffer.

use crate::error::{DriverError, Result};
use std::fmt;

/// Endpoint transfer type (bits 0..1 of `bmAttributes`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferClass {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferClass {
    pub fn from_attributes(attributes: u8) -> Self {
        match attributes & 0x03 {
            0 => TransferClass::Control,
            1 => TransferClass::Isochronous,
            2 => TransferClass::Bulk,
            _ => TransferClass::Interrupt,
        }
    }

    pub fn attributes(self) -> u8 {
        match self {
            TransferClass::Control => 0,
            TransferClass::Isochronous => 1,
            TransferClass::Bulk => 2,
            TransferClass::Interrupt => 3,
        }
    }
}

/// Endpoint direction (bit 7 of the endpoint address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

impl Direction {
    pub fn of(address: u8) -> Self {
        if address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Reusable transfer descriptor with its endpoint buffer
#[derive(Debug)]
pub struct Transfer {
    endpoint: u8,
    class: TransferClass,
    buffer: Box<[u8]>,
    /// Bytes to send (OUT) or bytes requested (IN)
    length: usize,
    /// Bytes actually moved by the last completion
    actual: usize,
}

impl Transfer {
    /// Allocate a descriptor with a buffer of `size` bytes
    pub fn alloc(endpoint: u8, class: TransferClass, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(DriverError::ResourceExhausted(format!(
                "endpoint {:#04x} reports a zero max packet size",
                endpoint
            )));
        }

        let mut buffer = Vec::new();
        buffer.try_reserve_exact(size).map_err(|e| {
            DriverError::ResourceExhausted(format!(
                "buffer of {} bytes for endpoint {:#04x}: {}",
                size, endpoint, e
            ))
        })?;
        buffer.resize(size, 0);

        Ok(Self {
            endpoint,
            class,
            buffer: buffer.into_boxed_slice(),
            length: 0,
            actual: 0,
        })
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn class(&self) -> TransferClass {
        self.class
    }

    pub fn direction(&self) -> Direction {
        Direction::of(self.endpoint)
    }

    /// Size of the endpoint buffer
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn set_length(&mut self, length: usize) {
        self.length = length.min(self.buffer.len());
        self.actual = 0;
    }

    /// Request a full buffer from an IN endpoint
    pub fn prepare_read(&mut self) {
        self.set_length(self.buffer.len());
    }

    /// Outgoing bytes of an OUT transfer
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.length]
    }

    /// Buffer region the transport fills on an IN transfer
    pub fn read_region(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.length]
    }

    pub fn set_actual(&mut self, actual: usize) {
        self.actual = actual.min(self.length);
    }

    pub fn actual(&self) -> usize {
        self.actual
    }

    /// Bytes received by the last IN completion
    pub fn received(&self) -> &[u8] {
        &self.buffer[..self.actual]
    }
}

/// Terminal status of one submitted transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// Device acknowledged the transfer
    Completed,
    /// Killed on the host side before it finished
    Cancelled,
    /// Endpoint was reset or halted, the link itself is still up
    PeerReset,
    /// Device or endpoint shut down
    DeviceGone,
    /// Anything else the transport reports
    Failed(String),
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Completed => write!(f, "completed"),
            TransferStatus::Cancelled => write!(f, "cancelled"),
            TransferStatus::PeerReset => write!(f, "peer reset"),
            TransferStatus::DeviceGone => write!(f, "device gone"),
            TransferStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Callback run on the transport's completion context
///
/// Must not block: it runs where the transport reaps transfers.
pub type Completion = Box<dyn FnOnce(Transfer, TransferStatus) + Send + 'static>;

/// A submission the transport refused, with the descriptor handed back
#[derive(Debug)]
pub struct SubmitError {
    pub transfer: Transfer,
    pub reason: String,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submit on endpoint {:#04x} rejected: {}",
            self.transfer.endpoint(),
            self.reason
        )
    }
}

impl std::error::Error for SubmitError {}

/// Non-blocking transfer submission to one device
pub trait Transport: Send + Sync + 'static {
    /// Queue `transfer`; `completion` runs later, exactly once, unless this
    /// returns an error
    fn submit(
        &self,
        transfer: Transfer,
        completion: Completion,
    ) -> std::result::Result<(), SubmitError>;

    /// Kill whatever is in flight on `endpoint`; its completion reports
    /// [`TransferStatus::Cancelled`]
    fn cancel(&self, endpoint: u8);
}
