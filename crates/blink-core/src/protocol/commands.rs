//! Builders for the device command payloads.
//!
//! Every operation the panel understands — bitmap transfer, brightness,
//! rotation, commit — is expressed as a frame payload built here and then
//! passed through [`crate::protocol::frame::encode`].  Brightness and
//! rotation are ordinary command frames subject to the same handshake
//! discipline as a bitmap; there are no special-cased raw writes.
//!
//! The byte layouts were captured from the panel firmware.  The bitmap
//! transfer keeps the firmware's inner header (type tag, pixel data length,
//! pixel CRC, terminator) even though the outer frame carries its own
//! integrity trailer: the firmware checks both.

use thiserror::Error;

/// Command type tag for a bitmap transfer.
const BITMAP_TAG: u8 = 0x02;

/// Terminator word the firmware expects at the end of the bitmap header.
const BITMAP_HEADER_END: [u8; 2] = [0x00, 0x65];

/// Frame payload that commits the most recently transferred frame.
pub const COMMIT: &[u8] = &[0x00, 0x01, 0x00];

/// Errors from command construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The pixel data does not fit the 16-bit inner length field.
    #[error("bitmap of {0} bytes exceeds the 16-bit transfer length field")]
    BitmapTooLarge(usize),
}

/// Display rotation, restricted to the four angles the firmware accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// The rotation angle in degrees.
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Quarter-turn count sent to the firmware.
    fn code(self) -> u8 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 1,
            Rotation::Deg180 => 2,
            Rotation::Deg270 => 3,
        }
    }
}

impl TryFrom<u16> for Rotation {
    type Error = u16;

    /// Accepts only 0, 90, 180, or 270; anything else is returned unchanged
    /// as the error value.
    fn try_from(degrees: u16) -> Result<Self, u16> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(other),
        }
    }
}

/// Builds the payload for a bitmap transfer.
///
/// Layout:
/// ```text
/// [tag:1][00 00][data_len:2 LE][00 00][data_crc32:4 LE][00 65][data:N]
/// ```
///
/// # Errors
///
/// Returns [`CommandError::BitmapTooLarge`] if `data` exceeds `u16::MAX`
/// bytes.
pub fn bitmap_transfer(data: &[u8]) -> Result<Vec<u8>, CommandError> {
    if data.len() > u16::MAX as usize {
        return Err(CommandError::BitmapTooLarge(data.len()));
    }

    let mut payload = Vec::with_capacity(13 + data.len());
    payload.push(BITMAP_TAG);
    payload.extend_from_slice(&[0x00, 0x00]);
    payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
    payload.extend_from_slice(&[0x00, 0x00]);
    payload.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    payload.extend_from_slice(&BITMAP_HEADER_END);
    payload.extend_from_slice(data);
    Ok(payload)
}

/// Builds the payload that sets the panel brightness (0 = off, 255 = full).
pub fn set_brightness(level: u8) -> Vec<u8> {
    vec![0x06, 0x00, level]
}

/// Builds the payload that sets the display rotation.
pub fn set_rotation(rotation: Rotation) -> Vec<u8> {
    vec![0x07, 0x00, rotation.code()]
}

// ── Tests ─────────────────────────────────────────────────────────────────────
