//! # Window Size Option (RFC 1073)
//!
//! NAWS lets the client report its terminal dimensions:
//!
//! ```text
//! IAC SB NAWS <width-high> <width-low> <height-high> <height-low> IAC SE
//! ```
//!
//! Width and height are 16-bit big-endian values; 0 means "unknown",
//! for which the conventional 80x24 is substituted. The client resends
//! whenever its terminal is resized, with no acknowledgment expected.

/// Width assumed until the client reports otherwise.
pub const DEFAULT_WIDTH: u16 = 80;
/// Height assumed until the client reports otherwise.
pub const DEFAULT_HEIGHT: u16 = 24;

/// Clamp range applied when the width feeds layout decisions (banners,
/// centered tables). The raw reported value is preserved separately.
pub const MIN_LAYOUT_WIDTH: u16 = 60;
pub const MAX_LAYOUT_WIDTH: u16 = 120;

/// Client terminal dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub width: u16,
    pub height: u16,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl WindowSize {
    /// Parse a NAWS payload. The payload must already be IAC-unescaped
    /// (the parser does this); exactly four bytes are expected. Zero
    /// dimensions fall back to the defaults per RFC 1073.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != 4 {
            return None;
        }
        let width = u16::from_be_bytes([data[0], data[1]]);
        let height = u16::from_be_bytes([data[2], data[3]]);
        Some(Self {
            width: if width == 0 { DEFAULT_WIDTH } else { width },
            height: if height == 0 { DEFAULT_HEIGHT } else { height },
        })
    }

    /// Encode as a 4-byte NAWS payload (big-endian pairs).
    pub fn encode(self) -> [u8; 4] {
        let w = self.width.to_be_bytes();
        let h = self.height.to_be_bytes();
        [w[0], w[1], h[0], h[1]]
    }

    /// Width for layout purposes, clamped to a range banners can use.
    pub fn layout_width(self) -> u16 {
        self.width.clamp(MIN_LAYOUT_WIDTH, MAX_LAYOUT_WIDTH)
    }
}

impl std::fmt::Display for WindowSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
