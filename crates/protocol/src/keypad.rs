//! Key codes reported on the interrupt endpoint

/// Key that erases the previous character on the stock firmware
pub const DEFAULT_DELETE_KEY: KeyCode = KeyCode(b'F');

/// ASCII code of a pressed key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyCode(pub u8);

/// What the echo path does with a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Blank the previous cell and step the cursor back
    Delete,
    /// Print the character at the cursor
    Echo(u8),
}

impl KeyCode {
    /// Interpret this key given the configured delete key
    pub fn action(self, delete_key: KeyCode) -> KeyAction {
        if self == delete_key {
            KeyAction::Delete
        } else {
            KeyAction::Echo(self.0)
        }
    }
}

impl From<u8> for KeyCode {
    fn from(code: u8) -> Self {
        KeyCode(code)
    }
}

impl std::fmt::Display for KeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_ascii_graphic() {
            write!(f, "'{}'", self.0 as char)
        } else {
            write!(f, "{:#04x}", self.0)
        }
    }
}
