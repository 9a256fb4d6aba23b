//! OUT packet framing

use crate::display::Column;
use crate::error::{FrameError, Result};

/// Leading byte of every OUT packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Marker {
    /// One command byte follows
    Command = 0x00,
    /// Character data follows
    Data = 0x01,
}

impl TryFrom<u8> for Marker {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Marker::Command),
            0x01 => Ok(Marker::Data),
            other => Err(FrameError::InvalidMarker(other)),
        }
    }
}

/// A display-bound packet before it is copied into the endpoint buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Print characters at the current cursor position
    Data(&'a [u8]),
    /// Raw command byte
    Command(u8),
}

impl Frame<'_> {
    /// Build the command that repositions the cursor
    pub fn cursor_to(column: u8) -> Result<Frame<'static>> {
        Ok(Frame::Command(Column::new(column)?.command()))
    }

    pub fn marker(&self) -> Marker {
        match self {
            Frame::Data(_) => Marker::Data,
            Frame::Command(_) => Marker::Command,
        }
    }

    /// Encoded size including the marker byte
    pub fn encoded_len(&self) -> usize {
        match self {
            Frame::Data(payload) => payload.len() + 1,
            Frame::Command(_) => 2,
        }
    }
}

/// Encode `frame` at the start of `buffer`, returning the packet length
///
/// `buffer` is the endpoint buffer, so its length is the endpoint's max
/// packet size. Data frames may carry at most `buffer.len() - 1` bytes.
pub fn encode_frame(frame: &Frame<'_>, buffer: &mut [u8]) -> Result<usize> {
    if let Frame::Data(payload) = frame
        && payload.is_empty()
    {
        return Err(FrameError::EmptyPayload);
    }

    let len = frame.encoded_len();
    if len > buffer.len() {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: buffer.len(),
        });
    }

    buffer[0] = frame.marker() as u8;
    match frame {
        Frame::Data(payload) => buffer[1..len].copy_from_slice(payload),
        Frame::Command(command) => buffer[1] = *command,
    }

    Ok(len)
}
