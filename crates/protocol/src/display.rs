//! Display geometry and cursor addressing

use crate::error::{FrameError, Result};

/// Number of character cells on the first (and only addressed) line
pub const DISPLAY_COLUMNS: u8 = 16;

/// Command byte base for "move cursor to column"
pub const CURSOR_COMMAND_BASE: u8 = 0x80;

/// Character used to blank a cell
pub const BLANK: u8 = b' ';

/// A cursor column on the display line, always below [`DISPLAY_COLUMNS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Column(u8);

impl Column {
    /// Leftmost column
    pub const HOME: Column = Column(0);

    /// Create a column, rejecting positions past the end of the line
    pub fn new(column: u8) -> Result<Self> {
        if column < DISPLAY_COLUMNS {
            Ok(Self(column))
        } else {
            Err(FrameError::ColumnOutOfRange {
                column,
                columns: DISPLAY_COLUMNS,
            })
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Command byte that moves the hardware cursor here
    pub fn command(self) -> u8 {
        CURSOR_COMMAND_BASE + self.0
    }
}

impl TryFrom<u8> for Column {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        Column::new(value)
    }
}
