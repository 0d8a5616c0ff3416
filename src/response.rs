//! PSEM responses.
//!
//! Every response payload starts with a one-byte status code. A zero status is
//! followed by service-specific data:
//!
//! - identify: `<std> <ver> <rev> [feature ...] 0x00`
//! - negotiate: `<packet size u16> <packet count> [baud code]`
//! - read: `<count u16> <data> <checksum>`
//!
//! Other services carry nothing after the status byte.

use alloc::vec::Vec;
use core::fmt;

use derive_try_from_primitive::TryFromPrimitive;
use nom::{
    IResult, Parser,
    bytes::complete::take_till,
    number::complete::{be_u16, u8 as nom_u8},
};

use crate::checksum::table_checksum;
use crate::request::BaudRate;

/// PSEM response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum ResponseCode {
    /// Acknowledge, no problems.
    Ok = 0x00,
    /// Rejection of the received service request.
    Err = 0x01,
    /// Service not supported.
    Sns = 0x02,
    /// Insufficient security clearance.
    Isc = 0x03,
    /// Operation not possible.
    Onp = 0x04,
    /// Inappropriate action requested.
    Iar = 0x05,
    /// Device busy.
    Bsy = 0x06,
    /// Data not ready.
    Dnr = 0x07,
    /// Data locked.
    Dlk = 0x08,
    /// Renegotiate request.
    Rno = 0x09,
    /// Invalid service sequence state.
    Isss = 0x0A,
}

impl ResponseCode {
    /// Short protocol name of the code, e.g. `"isss"`.
    pub fn abbreviation(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Err => "err",
            Self::Sns => "sns",
            Self::Isc => "isc",
            Self::Onp => "onp",
            Self::Iar => "iar",
            Self::Bsy => "bsy",
            Self::Dnr => "dnr",
            Self::Dlk => "dlk",
            Self::Rno => "rno",
            Self::Isss => "isss",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Ok => "acknowledge",
            Self::Err => "error",
            Self::Sns => "service not supported",
            Self::Isc => "insufficient security clearance",
            Self::Onp => "operation not possible",
            Self::Iar => "inappropriate action requested",
            Self::Bsy => "device busy",
            Self::Dnr => "data not ready",
            Self::Dlk => "data locked",
            Self::Rno => "renegotiate request",
            Self::Isss => "invalid service sequence state",
        }
    }

    /// Human-readable text for a raw status byte, including unknown codes.
    pub fn describe(code: u8) -> &'static str {
        Self::try_from(code).map_or("unknown response code", Self::description)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.abbreviation(), self.description())
    }
}

/// Structural problems in a response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    /// The payload was empty, not even a status byte.
    NoData,
    /// Fewer bytes than the fixed part of the response requires.
    TooShort(usize),
    /// The declared data count disagrees with the bytes received.
    LengthMismatch { declared: usize, available: usize },
    /// The table checksum did not validate.
    ChecksumMismatch { expected: u8, actual: u8 },
    /// The service-specific body could not be parsed.
    Malformed,
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => write!(f, "empty response"),
            Self::TooShort(len) => write!(f, "response too short ({} bytes)", len),
            Self::LengthMismatch { declared, available } => write!(
                f,
                "response declares {} data bytes but carries {}",
                declared, available
            ),
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "table checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
                expected, actual
            ),
            Self::Malformed => write!(f, "malformed response body"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ResponseError {}

/// Splits a response payload into its status byte and body.
pub fn split_status(payload: &[u8]) -> Result<(u8, &[u8]), ResponseError> {
    match payload.split_first() {
        Some((&status, body)) => Ok((status, body)),
        None => Err(ResponseError::NoData),
    }
}

/// Body of an identify response.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IdentifyResponse {
    /// Reference standard (0 = C12.18, 1 = C12.21, 2 = C12.22).
    pub standard: u8,
    pub version: u8,
    pub revision: u8,
    /// Raw feature list, without the terminating zero.
    pub features: Vec<u8>,
}

impl IdentifyResponse {
    /// Parses the body following an `ok` status.
    ///
    /// A missing end-of-list byte is tolerated.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (standard, version, revision)) = (nom_u8, nom_u8, nom_u8).parse(input)?;
        let (input, features) = take_till(|byte: u8| byte == 0x00).parse(input)?;
        let input = input.strip_prefix(&[0x00u8][..]).unwrap_or(input);
        Ok((input, Self { standard, version, revision, features: features.to_vec() }))
    }
}

/// Body of a negotiate response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NegotiateResponse {
    /// Packet size accepted by the device.
    pub packet_size: u16,
    /// Packet count accepted by the device.
    pub packet_count: u8,
    /// Baud rate selected by the device, if it sent one.
    pub baud_rate: Option<BaudRate>,
}

impl NegotiateResponse {
    /// Parses the body following an `ok` status.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, packet_size) = be_u16(input)?;
        let (input, packet_count) = nom_u8(input)?;
        let (input, baud_rate) = match input.split_first() {
            Some((&code, rest)) => (rest, BaudRate::try_from(code).ok()),
            None => (input, None),
        };
        Ok((input, Self { packet_size, packet_count, baud_rate }))
    }
}

/// Body of a table read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub data: Vec<u8>,
}

impl ReadResponse {
    /// Validates and decodes the body following an `ok` status.
    ///
    /// The declared count must match the bytes present before the trailing
    /// checksum exactly, and the checksum must validate.
    pub fn decode(body: &[u8]) -> Result<Self, ResponseError> {
        if body.len() < 3 {
            return Err(ResponseError::TooShort(body.len()));
        }

        let declared = u16::from_be_bytes([body[0], body[1]]) as usize;
        let (data, checksum) = body[2..].split_at(body.len() - 3);
        if declared != data.len() {
            return Err(ResponseError::LengthMismatch { declared, available: data.len() });
        }

        let expected = table_checksum(data);
        if expected != checksum[0] {
            return Err(ResponseError::ChecksumMismatch { expected, actual: checksum[0] });
        }

        Ok(Self { data: data.to_vec() })
    }

    /// Encodes an `ok` read response carrying `data`.
    #[cfg(feature = "encode")]
    pub fn encode(data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(data.len() + 4);
        buf.push(ResponseCode::Ok as u8);
        buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
        buf.extend_from_slice(data);
        buf.push(table_checksum(data));
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_response_code_names() {
        assert_eq!(ResponseCode::try_from(0x0A), Ok(ResponseCode::Isss));
        assert_eq!(ResponseCode::Isss.abbreviation(), "isss");
        assert_eq!(ResponseCode::describe(0x03), "insufficient security clearance");
        assert_eq!(ResponseCode::describe(0x42), "unknown response code");
        assert!(ResponseCode::try_from(0x0B).is_err());
    }

    #[test]
    fn test_split_status() {
        assert_eq!(split_status(&[]), Err(ResponseError::NoData));
        assert_eq!(split_status(&[0x00, 0x01]), Ok((0x00, &[0x01][..])));
    }

    #[test]
    fn test_identify_response() {
        let body = [0x00, 0x01, 0x00, 0x06, 0x02, 0x00];
        let (rest, identify) = IdentifyResponse::parse(&body).unwrap();
        assert!(rest.is_empty());
        assert_eq!(identify.standard, 0);
        assert_eq!(identify.version, 1);
        assert_eq!(identify.revision, 0);
        assert_eq!(identify.features, vec![0x06, 0x02]);
    }

    #[test]
    fn test_identify_response_without_terminator() {
        let (_, identify) = IdentifyResponse::parse(&[0x02, 0x01, 0x01]).unwrap();
        assert_eq!(identify.standard, 2);
        assert!(identify.features.is_empty());
        assert!(IdentifyResponse::parse(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn test_negotiate_response() {
        let (_, negotiate) = NegotiateResponse::parse(&[0x02, 0x00, 0x02, 0x06]).unwrap();
        assert_eq!(
            negotiate,
            NegotiateResponse { packet_size: 512, packet_count: 2, baud_rate: Some(BaudRate::B9600) }
        );

        let (_, negotiate) = NegotiateResponse::parse(&[0x00, 0x40, 0x01]).unwrap();
        assert_eq!(negotiate.baud_rate, None);
    }

    #[test]
    fn test_read_response_decode() {
        let body = [0x00, 0x03, 0x01, 0x02, 0x03, 0xFA];
        assert_eq!(ReadResponse::decode(&body), Ok(ReadResponse { data: vec![1, 2, 3] }));
    }

    #[test]
    fn test_read_response_errors() {
        assert_eq!(ReadResponse::decode(&[0x00, 0x00]), Err(ResponseError::TooShort(2)));
        assert_eq!(
            ReadResponse::decode(&[0x00, 0x04, 0x01, 0x02, 0x03, 0xFA]),
            Err(ResponseError::LengthMismatch { declared: 4, available: 3 })
        );
        assert_eq!(
            ReadResponse::decode(&[0x00, 0x03, 0x01, 0x02, 0x03, 0xFB]),
            Err(ResponseError::ChecksumMismatch { expected: 0xFA, actual: 0xFB })
        );
    }

    #[test]
    fn test_read_response_empty_table() {
        assert_eq!(ReadResponse::decode(&[0x00, 0x00, 0x00]), Ok(ReadResponse { data: vec![] }));
    }

    #[cfg(feature = "encode")]
    #[test]
    fn test_read_response_encode() {
        let encoded = ReadResponse::encode(b"data data data");
        assert_eq!(encoded[..3], [0x00, 0x00, 0x0E]);
        assert_eq!(encoded.last(), Some(&0xF2));
        let (status, body) = split_status(&encoded).unwrap();
        assert_eq!(status, 0);
        assert_eq!(ReadResponse::decode(body).unwrap().data, b"data data data");
    }
}
