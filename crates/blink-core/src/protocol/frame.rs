//! Binary codec for the panel wire frame format.
//!
//! Wire format:
//! ```text
//! [length:2 LE][payload:N][crc32:4 LE]
//! ```
//! The length field counts only the payload bytes.  The trailer is a CRC-32
//! (IEEE) computed over the payload and appended little-endian, matching the
//! integrity word the panel firmware embeds in its image transfers.
//!
//! Encoding is deterministic and side-effect free.  Decoding distinguishes a
//! *truncated* buffer (not enough bytes arrived yet, or the notification was
//! cut short) from a *corrupt* one (all bytes present but the length or
//! trailer disagree with the content).

use thiserror::Error;

/// Size of the little-endian length prefix.
pub const LENGTH_FIELD_SIZE: usize = 2;

/// Size of the CRC-32 integrity trailer.
pub const TRAILER_SIZE: usize = 4;

/// Largest payload the two-byte length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer ends before the declared frame does.  Not fatal to a
    /// session: the notification is discarded and the sender may retransmit.
    #[error("truncated frame: need at least {needed} bytes, got {available}")]
    TruncatedFrame { needed: usize, available: usize },

    /// The buffer holds more bytes than the length field accounts for.
    #[error("frame length mismatch: header declares {declared} payload bytes, buffer carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// The CRC-32 trailer does not match the payload content.
    #[error("frame checksum mismatch: computed {computed:#010X}, trailer carries {received:#010X}")]
    ChecksumMismatch { computed: u32, received: u32 },

    /// The payload is too large for the two-byte length field.
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD_SIZE}-byte frame limit")]
    PayloadTooLarge(usize),
}

impl FrameError {
    /// `true` for the corruption family of failures (complete but damaged
    /// frame), `false` for a short read.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            FrameError::LengthMismatch { .. } | FrameError::ChecksumMismatch { .. }
        )
    }
}

/// Encodes `payload` into a complete wire frame.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] if the payload cannot be described
/// by the two-byte length field.
///
/// # Examples
///
/// ```rust
/// use blink_core::protocol::frame;
///
/// let frame = frame::encode(&[0x01, 0x80]).unwrap();
/// assert_eq!(frame.len(), 2 + 2 + 4);
/// assert_eq!(&frame[..2], &[0x02, 0x00]); // length, little-endian
/// ```
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let mut buf = Vec::with_capacity(LENGTH_FIELD_SIZE + payload.len() + TRAILER_SIZE);
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    Ok(buf)
}

/// Decodes one complete frame, returning the validated payload.
///
/// The buffer must contain exactly one frame.  A buffer that ends early
/// yields [`FrameError::TruncatedFrame`]; surplus bytes or a bad trailer
/// yield the corruption variants.  This function never panics on malformed
/// input.
pub fn decode(bytes: &[u8]) -> Result<Vec<u8>, FrameError> {
    if bytes.len() < LENGTH_FIELD_SIZE + TRAILER_SIZE {
        return Err(FrameError::TruncatedFrame {
            needed: LENGTH_FIELD_SIZE + TRAILER_SIZE,
            available: bytes.len(),
        });
    }

    let declared = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    let total = LENGTH_FIELD_SIZE + declared + TRAILER_SIZE;

    if bytes.len() < total {
        return Err(FrameError::TruncatedFrame {
            needed: total,
            available: bytes.len(),
        });
    }
    if bytes.len() > total {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: bytes.len() - LENGTH_FIELD_SIZE - TRAILER_SIZE,
        });
    }

    let payload = &bytes[LENGTH_FIELD_SIZE..LENGTH_FIELD_SIZE + declared];
    let trailer_off = LENGTH_FIELD_SIZE + declared;
    let received = u32::from_le_bytes([
        bytes[trailer_off],
        bytes[trailer_off + 1],
        bytes[trailer_off + 2],
        bytes[trailer_off + 3],
    ]);
    let computed = crc32fast::hash(payload);
    if computed != received {
        return Err(FrameError::ChecksumMismatch { computed, received });
    }

    Ok(payload.to_vec())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
