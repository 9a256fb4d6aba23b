//! Driver error types

use crate::endpoint::ChannelRole;
use protocol::FrameError;
use thiserror::Error;

/// Errors surfaced by the driver core
#[derive(Debug, Error)]
pub enum DriverError {
    /// Buffer, descriptor, thread or minor number could not be allocated
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The device does not advertise a required endpoint
    #[error("Device has no {0} endpoint")]
    MissingChannel(ChannelRole),

    /// Another client already holds the device open
    #[error("Device already open")]
    AlreadyOpen,

    /// Waiting for the display endpoint was aborted, try again
    #[error("Interrupted while waiting for the display endpoint, try again")]
    Interrupted,

    /// The device disappeared or the session is shutting down
    #[error("Device gone")]
    DeviceGone,

    /// The transport refused to queue a transfer
    #[error("Transfer rejected: {0}")]
    TransferRejected(String),

    /// No attached device behind this minor number
    #[error("No device at minor {0}")]
    NoDevice(u32),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

impl DriverError {
    /// Whether the caller should simply retry the same call
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::Interrupted)
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
