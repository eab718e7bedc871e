//! Line codec for the emulator's FIFO protocol.
//!
//! Emulator to controller: `"<w>-<h>\n"` once, then per tick an optional
//! 384-char RAM block followed by either `NADA` or packed 9-char pixel
//! updates (`colrowval`). Controller to emulator: `"<screen>,<ram>,<skip>\n"`
//! once, then `"<a>,<b>\n"` per tick.

use std::fmt;

use thiserror::Error;

use crate::action::Action;

pub const RAM_SIZE: usize = 128;
pub const RAM_GROUP_LEN: usize = 3;
pub const RAM_LINE_LEN: usize = RAM_SIZE * RAM_GROUP_LEN;
pub const PIXEL_GROUP_LEN: usize = 9;
pub const NO_PIXEL_CHANGES: &str = "NADA";
/// Pixel indices are three-digit fields, so no screen side can exceed this.
pub const MAX_SCREEN_SIDE: usize = 1000;

/// Cell value for pixels the emulator has not reported yet.
pub const UNKNOWN_COLOR: i16 = -2;

pub type RamSnapshot = [u8; RAM_SIZE];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed RAM block: {0}")]
    MalformedRam(String),
    #[error("malformed screen update: {0}")]
    MalformedScreenUpdate(String),
    #[error("invalid handshake {line:?}: {reason}")]
    InvalidHandshake { line: String, reason: String },
    #[error("line is not valid UTF-8: {0}")]
    NotUtf8(String),
}

// =============================================================================
// Screen Buffer
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: usize,
    pub height: usize,
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Row-major grid of colour indices, sized once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenBuffer {
    dims: Dimensions,
    cells: Vec<i16>,
}

impl ScreenBuffer {
    pub fn new(dims: Dimensions) -> Self {
        Self {
            dims,
            cells: vec![UNKNOWN_COLOR; dims.width * dims.height],
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    pub fn width(&self) -> usize {
        self.dims.width
    }

    pub fn height(&self) -> usize {
        self.dims.height
    }

    pub fn get(&self, row: usize, col: usize) -> Option<i16> {
        if row < self.dims.height && col < self.dims.width {
            Some(self.cells[row * self.dims.width + col])
        } else {
            None
        }
    }

    pub fn row(&self, row: usize) -> Option<&[i16]> {
        if row >= self.dims.height {
            return None;
        }
        let start = row * self.dims.width;
        Some(&self.cells[start..start + self.dims.width])
    }

    pub fn cells(&self) -> &[i16] {
        &self.cells
    }

    fn set(&mut self, row: usize, col: usize, value: i16) {
        self.cells[row * self.dims.width + col] = value;
    }
}

// =============================================================================
// RAM Decoder
// =============================================================================

fn parse_group(group: &[u8]) -> Option<u16> {
    if group.len() != 3 || !group.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(group.iter().fold(0u16, |acc, &d| acc * 10 + (d - b'0') as u16))
}

/// Decodes exactly [`RAM_LINE_LEN`] characters of zero-padded decimal bytes.
pub fn decode_ram(segment: &str) -> Result<RamSnapshot, DecodeError> {
    let bytes = segment.as_bytes();
    if bytes.len() != RAM_LINE_LEN {
        return Err(DecodeError::MalformedRam(format!(
            "expected {RAM_LINE_LEN} characters, got {}",
            bytes.len()
        )));
    }

    let mut ram = [0u8; RAM_SIZE];
    for (i, group) in bytes.chunks_exact(RAM_GROUP_LEN).enumerate() {
        let value = parse_group(group).ok_or_else(|| {
            DecodeError::MalformedRam(format!(
                "byte {i} is not a 3-digit decimal: {:?}",
                String::from_utf8_lossy(group)
            ))
        })?;
        ram[i] = u8::try_from(value).map_err(|_| {
            DecodeError::MalformedRam(format!("byte {i} out of range: {value}"))
        })?;
    }
    Ok(ram)
}

/// Inverse of [`decode_ram`]; what the emulator puts on the wire.
pub fn encode_ram(ram: &RamSnapshot) -> String {
    let mut out = String::with_capacity(RAM_LINE_LEN);
    for byte in ram {
        out.push_str(&format!("{byte:03}"));
    }
    out
}

/// 8 rows of 16 hex bytes, the layout of the emulator's own RAM debugger.
pub fn format_ram(ram: &RamSnapshot) -> String {
    ram.chunks(16)
        .map(|row| {
            row.iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// =============================================================================
// Screen Diff Decoder
// =============================================================================

/// Applies one tick's pixel updates in place and returns how many cells were
/// written. Cells not named in `segment` keep their previous value.
pub fn apply_screen_diff(screen: &mut ScreenBuffer, segment: &str) -> Result<usize, DecodeError> {
    let body = segment.trim_end_matches(['\n', '\r']);
    if body == NO_PIXEL_CHANGES {
        return Ok(0);
    }

    let bytes = body.as_bytes();
    if bytes.len() % PIXEL_GROUP_LEN != 0 {
        return Err(DecodeError::MalformedScreenUpdate(format!(
            "length {} is not a multiple of {PIXEL_GROUP_LEN}",
            bytes.len()
        )));
    }

    let dims = screen.dimensions();
    let mut updates = Vec::with_capacity(bytes.len() / PIXEL_GROUP_LEN);
    for (n, group) in bytes.chunks_exact(PIXEL_GROUP_LEN).enumerate() {
        let field = |range: std::ops::Range<usize>| {
            parse_group(&group[range]).ok_or_else(|| {
                DecodeError::MalformedScreenUpdate(format!(
                    "update {n} is not numeric: {:?}",
                    String::from_utf8_lossy(group)
                ))
            })
        };
        let col = field(0..3)? as usize;
        let row = field(3..6)? as usize;
        let value = field(6..9)?;
        if col >= dims.width || row >= dims.height {
            return Err(DecodeError::MalformedScreenUpdate(format!(
                "update {n} addresses ({row}, {col}) outside {dims} screen"
            )));
        }
        if value > u8::MAX as u16 {
            return Err(DecodeError::MalformedScreenUpdate(format!(
                "update {n} colour out of range: {value}"
            )));
        }
        updates.push((row, col, value as i16));
    }

    // Validate the whole line before touching the buffer.
    for &(row, col, value) in &updates {
        screen.set(row, col, value);
    }
    Ok(updates.len())
}

// =============================================================================
// Handshake and Commands
// =============================================================================

pub fn parse_dimensions(line: &str) -> Result<Dimensions, DecodeError> {
    let invalid = |reason: &str| DecodeError::InvalidHandshake {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = line.trim_end_matches(['\n', '\r']);
    let (w, h) = trimmed
        .split_once('-')
        .ok_or_else(|| invalid("expected <width>-<height>"))?;
    let width: i64 = w.trim().parse().map_err(|_| invalid("width is not an integer"))?;
    let height: i64 = h.trim().parse().map_err(|_| invalid("height is not an integer"))?;
    if width <= 0 || height <= 0 {
        return Err(invalid("dimensions must be positive"));
    }
    if width > MAX_SCREEN_SIDE as i64 || height > MAX_SCREEN_SIDE as i64 {
        return Err(invalid("dimensions exceed the three-digit pixel index range"));
    }
    Ok(Dimensions {
        width: width as usize,
        height: height as usize,
    })
}

pub fn format_negotiation(wants_screen: bool, wants_ram: bool, frame_skip: u32) -> String {
    format!("{},{},{}\n", wants_screen as u8, wants_ram as u8, frame_skip)
}

pub fn format_command(player_a: Action) -> String {
    format!("{},{}\n", player_a.code(), Action::PlayerBNoop.code())
}
