//! Protocol error types

use thiserror::Error;

/// Errors raised while framing a packet for the display endpoint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Payload does not fit in the endpoint buffer once the marker is added
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Data frames must carry at least one character
    #[error("Empty data frame")]
    EmptyPayload,

    /// Cursor column outside the visible line
    #[error("Column {column} out of range (display has {columns} columns)")]
    ColumnOutOfRange { column: u8, columns: u8 },

    /// Unknown marker byte at the start of a packet
    #[error("Invalid frame marker: {0:#04x}")]
    InvalidMarker(u8),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, FrameError>;
