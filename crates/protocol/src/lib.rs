//! Wire protocol for the botodisp display/keypad peripheral
//!
//! The peripheral exposes two endpoints: a bulk OUT endpoint that drives a
//! single-line, 16 column character display, and an interrupt IN endpoint
//! that reports one ASCII key code per key press.
//!
//! Every OUT packet starts with a one byte marker:
//!
//! | marker | payload                                   |
//! |--------|-------------------------------------------|
//! | `0x01` | characters to print at the cursor         |
//! | `0x00` | one command byte (`0x80 + column` = goto) |
//!
//! # Example
//!
//! ```
//! use protocol::{Frame, encode_frame};
//!
//! let mut buffer = [0u8; 64];
//! let len = encode_frame(&Frame::Data(b"HI"), &mut buffer).unwrap();
//! assert_eq!(&buffer[..len], &[0x01, b'H', b'I']);
//!
//! let len = encode_frame(&Frame::cursor_to(3).unwrap(), &mut buffer).unwrap();
//! assert_eq!(&buffer[..len], &[0x00, 0x83]);
//! ```

pub mod display;
pub mod error;
pub mod frame;
pub mod keypad;

pub use display::{BLANK, CURSOR_COMMAND_BASE, Column, DISPLAY_COLUMNS};
pub use error::{FrameError, Result};
pub use frame::{Frame, Marker, encode_frame};
pub use keypad::{DEFAULT_DELETE_KEY, KeyAction, KeyCode};
