//! C12.18 link-layer frame codec.
//!
//! # Frame Structure
//!
//! ```text
//! +-------+----------+---------+----------+--------+-----------+--------+
//! | Start | Identity | Control | Sequence | Length | Payload   | CRC    |
//! | 0xEE  | (1)      | (1)     | (1)      | (2 BE) | (n≤8183)  | (2 LE) |
//! +-------+----------+---------+----------+--------+-----------+--------+
//! ```
//!
//! - **Control**: bit 0x20 carries the toggle bit used for duplicate detection.
//! - **Sequence**: number of frames still to follow; `0` marks the final frame
//!   of a message.
//! - **CRC**: CRC-16/X.25 over every preceding byte, see [`crate::checksum`].

use alloc::vec::Vec;
use core::fmt;

#[cfg(feature = "parse")]
use nom::{
    IResult, Parser,
    bytes::complete::take,
    number::complete::{be_u16, le_u16, u8 as nom_u8},
};

#[cfg(any(feature = "encode", feature = "parse"))]
use crate::checksum::frame_crc;

/// Start-of-frame marker.
pub const FRAME_START: u8 = 0xEE;

/// Positive acknowledgement byte.
pub const ACK: u8 = 0x06;

/// Negative acknowledgement byte.
pub const NACK: u8 = 0x15;

/// Toggle bit within the control byte.
pub const CONTROL_TOGGLE: u8 = 0x20;

/// Identity byte used by a point-to-point client.
pub const DEFAULT_IDENTITY: u8 = 0x00;

/// Maximum payload carried by a single frame.
pub const MAX_PAYLOAD_SIZE: usize = 8183;

/// Start, identity, control, sequence and the 2-byte length.
pub const FRAME_HEADER_SIZE: usize = 6;

/// Size of the trailing CRC in bytes.
pub const FRAME_CRC_SIZE: usize = 2;

/// Frame codec errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Payload exceeds [`MAX_PAYLOAD_SIZE`].
    PayloadTooLarge(usize),
    /// First byte is not [`FRAME_START`].
    BadStart(u8),
    /// Fewer bytes than the header or the declared length requires.
    Truncated {
        /// Bytes required to hold the whole frame.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },
    /// Trailing CRC disagrees with the computed CRC.
    ChecksumMismatch {
        /// CRC computed over the received bytes.
        expected: u16,
        /// CRC carried by the frame.
        actual: u16,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadTooLarge(len) => {
                write!(f, "frame payload of {} bytes exceeds {} bytes", len, MAX_PAYLOAD_SIZE)
            }
            Self::BadStart(byte) => write!(f, "invalid start of frame 0x{:02X}", byte),
            Self::Truncated { needed, available } => {
                write!(f, "truncated frame: need {} bytes, have {}", needed, available)
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "frame CRC mismatch: computed 0x{:04X}, received 0x{:04X}", expected, actual)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}

/// A single C12.18 link frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Frame {
    /// Identity byte (0x00 for point-to-point).
    pub identity: u8,
    /// Control byte (bit 0x20 = toggle).
    pub control: u8,
    /// Frames remaining after this one.
    pub sequence: u8,
    /// Service payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a frame, rejecting payloads larger than [`MAX_PAYLOAD_SIZE`].
    pub fn new(
        identity: u8,
        control: u8,
        sequence: u8,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { identity, control, sequence, payload })
    }

    /// Returns the state of the toggle bit.
    pub fn toggle(&self) -> bool {
        self.control & CONTROL_TOGGLE != 0
    }

    /// Returns `true` if no further frames follow.
    pub fn is_final(&self) -> bool {
        self.sequence == 0
    }

    /// Total encoded size of the frame.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len() + FRAME_CRC_SIZE
    }
}

// ============================================================================
// ENCODING
// ============================================================================

#[cfg(feature = "encode")]
impl Frame {
    /// Encodes the frame including the trailing CRC.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(FRAME_START);
        buf.push(self.identity);
        buf.push(self.control);
        buf.push(self.sequence);
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);

        let crc = frame_crc(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Builds and encodes a frame in one step.
    ///
    /// ```
    /// use ansi_c12::frame::Frame;
    ///
    /// let bytes = Frame::build(0x00, 0x00, 0x00, &[0x20]).unwrap();
    /// assert_eq!(&bytes[..7], &[0xEE, 0x00, 0x00, 0x00, 0x00, 0x01, 0x20]);
    /// ```
    pub fn build(
        identity: u8,
        control: u8,
        sequence: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>, FrameError> {
        Ok(Self::new(identity, control, sequence, payload)?.encode())
    }
}

// ============================================================================
// PARSING
// ============================================================================

/// Header fields following the start byte: identity, control, sequence, length.
#[cfg(feature = "parse")]
fn parse_header(input: &[u8]) -> IResult<&[u8], (u8, u8, u8, u16)> {
    let (input, identity) = nom_u8(input)?;
    let (input, control) = nom_u8(input)?;
    let (input, sequence) = nom_u8(input)?;
    let (input, length) = be_u16(input)?;
    Ok((input, (identity, control, sequence, length)))
}

#[cfg(feature = "parse")]
fn parse_body(input: &[u8], length: usize) -> IResult<&[u8], (&[u8], u16)> {
    let (input, payload) = take(length).parse(input)?;
    let (input, crc) = le_u16(input)?;
    Ok((input, (payload, crc)))
}

/// Reads the declared payload length from a frame header.
///
/// `header` must hold at least [`FRAME_HEADER_SIZE`] bytes starting with the
/// start byte.
#[cfg(feature = "parse")]
pub fn declared_length(header: &[u8]) -> Result<usize, FrameError> {
    if header.len() < FRAME_HEADER_SIZE {
        return Err(FrameError::Truncated { needed: FRAME_HEADER_SIZE, available: header.len() });
    }
    if header[0] != FRAME_START {
        return Err(FrameError::BadStart(header[0]));
    }
    let (_, (_, _, _, length)) = parse_header(&header[1..])
        .map_err(|_| FrameError::Truncated { needed: FRAME_HEADER_SIZE, available: header.len() })?;
    Ok(length as usize)
}

#[cfg(feature = "parse")]
impl Frame {
    /// Decodes one frame from the start of `input`.
    ///
    /// Returns the frame and any bytes following it.
    pub fn decode(input: &[u8]) -> Result<(Self, &[u8]), FrameError> {
        let length = declared_length(input)?;
        let needed = FRAME_HEADER_SIZE + length + FRAME_CRC_SIZE;
        let truncated = FrameError::Truncated { needed, available: input.len() };
        if input.len() < needed {
            return Err(truncated);
        }

        let (rest, (identity, control, sequence, _)) =
            parse_header(&input[1..]).map_err(|_| truncated)?;
        let (rest, (payload, actual)) = parse_body(rest, length).map_err(|_| truncated)?;

        let expected = frame_crc(&input[..FRAME_HEADER_SIZE + length]);
        if expected != actual {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        Ok((Self { identity, control, sequence, payload: payload.to_vec() }, rest))
    }
}
