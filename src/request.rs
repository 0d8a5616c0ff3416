//! PSEM service requests carried inside link frames.
//!
//! Every request starts with a one-byte opcode; the short and extended forms of
//! the table services are distinguished by the opcode alone.
//!
//! | Service    | Opcode        | Body                                                  |
//! |------------|---------------|-------------------------------------------------------|
//! | Identify   | `0x20`        |                                                       |
//! | Terminate  | `0x21`        |                                                       |
//! | Read       | `0x30`        | table id (2)                                          |
//! | Read       | `0x3F`        | table id (2), offset (3), octet count (2)             |
//! | Write      | `0x40`        | table id (2), count (2), data, checksum (1)           |
//! | Write      | `0x4F`        | table id (2), offset (3), count (2), data, checksum   |
//! | Logon      | `0x50`        | user id (2), user name (10, space padded)             |
//! | Security   | `0x51`        | password (20, space padded)                           |
//! | Logoff     | `0x52`        |                                                       |
//! | Negotiate  | `0x60`–`0x6B` | packet size (2), packet count (1), baud codes (0–11)  |
//! | Wait       | `0x70`        | seconds (1)                                           |
//!
//! All multi-byte integers are big-endian.
//!
//! # Examples
//!
//! ```
//! use ansi_c12::request::Request;
//!
//! let request = Request::logon("Admin", 1).unwrap();
//! assert_eq!(
//!     request.encode(),
//!     [0x50, 0x00, 0x01, 0x41, 0x64, 0x6D, 0x69, 0x6E, 0x20, 0x20, 0x20, 0x20, 0x20]
//! );
//! ```

use alloc::vec::Vec;
use core::fmt;

use derive_try_from_primitive::TryFromPrimitive;

#[cfg(feature = "parse")]
use nom::{
    IResult, Parser,
    bytes::complete::take,
    number::complete::{be_u16, be_u24, u8 as nom_u8},
};

#[cfg(any(feature = "encode", feature = "parse"))]
use crate::checksum::table_checksum;

/// Identification service.
pub const OPCODE_IDENTIFY: u8 = 0x20;
/// Terminate service.
pub const OPCODE_TERMINATE: u8 = 0x21;
/// Full table read.
pub const OPCODE_READ_FULL: u8 = 0x30;
/// Partial (offset) table read.
pub const OPCODE_READ_PARTIAL: u8 = 0x3F;
/// Full table write.
pub const OPCODE_WRITE_FULL: u8 = 0x40;
/// Partial (offset) table write.
pub const OPCODE_WRITE_PARTIAL: u8 = 0x4F;
/// Logon service.
pub const OPCODE_LOGON: u8 = 0x50;
/// Security (password) service.
pub const OPCODE_SECURITY: u8 = 0x51;
/// Logoff service.
pub const OPCODE_LOGOFF: u8 = 0x52;
/// Negotiate service without baud rates; `0x61..=0x6B` carry one to eleven.
pub const OPCODE_NEGOTIATE: u8 = 0x60;
/// Wait service.
pub const OPCODE_WAIT: u8 = 0x70;

/// Maximum user name length in bytes.
pub const MAX_USERNAME_LEN: usize = 10;
/// Maximum password length in bytes.
pub const MAX_PASSWORD_LEN: usize = 20;
/// Largest offset expressible in the 3-byte offset field.
pub const MAX_TABLE_OFFSET: u32 = 0x00FF_FFFF;
/// Maximum number of baud rate codes in a negotiate request.
pub const MAX_BAUD_RATES: usize = 11;

/// Padding byte for user names and passwords.
const PAD_BYTE: u8 = 0x20;

/// Helpers for big-endian fields.
pub(crate) trait ByteBuffer {
    fn push_u16(&mut self, value: u16);
    fn push_u24(&mut self, value: u32);
    fn push_padded(&mut self, value: &[u8], width: usize);
}

impl ByteBuffer for Vec<u8> {
    fn push_u16(&mut self, value: u16) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn push_u24(&mut self, value: u32) {
        self.extend_from_slice(&(value & MAX_TABLE_OFFSET).to_be_bytes()[1..]);
    }

    fn push_padded(&mut self, value: &[u8], width: usize) {
        self.extend_from_slice(value);
        self.resize(self.len() + width.saturating_sub(value.len()), PAD_BYTE);
    }
}

/// Baud rate codes used by the negotiate service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
#[rustfmt::skip]
pub enum BaudRate {
    External = 0x00,
    B300     = 0x01,
    B600     = 0x02,
    B1200    = 0x03,
    B2400    = 0x04,
    B4800    = 0x05,
    B9600    = 0x06,
    B14400   = 0x07,
    B19200   = 0x08,
    B28800   = 0x09,
    B57600   = 0x0A,
    B38400   = 0x0B,
    B115200  = 0x0C,
    B128000  = 0x0D,
    B256000  = 0x0E,
}

impl BaudRate {
    /// Bits per second, or `None` for [`BaudRate::External`].
    pub fn bits_per_second(self) -> Option<u32> {
        match self {
            Self::External => None,
            Self::B300 => Some(300),
            Self::B600 => Some(600),
            Self::B1200 => Some(1200),
            Self::B2400 => Some(2400),
            Self::B4800 => Some(4800),
            Self::B9600 => Some(9600),
            Self::B14400 => Some(14400),
            Self::B19200 => Some(19200),
            Self::B28800 => Some(28800),
            Self::B57600 => Some(57600),
            Self::B38400 => Some(38400),
            Self::B115200 => Some(115200),
            Self::B128000 => Some(128000),
            Self::B256000 => Some(256000),
        }
    }

    /// Looks up the code for a rate in bits per second.
    pub fn from_bits_per_second(bps: u32) -> Option<Self> {
        (0x01u8..=0x0E)
            .filter_map(|code| Self::try_from(code).ok())
            .find(|rate| rate.bits_per_second() == Some(bps))
    }
}

/// Offset window of a partial table access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TableRange {
    /// Byte offset into the table (24 bits).
    pub offset: u32,
    /// Number of octets to read.
    pub octet_count: u16,
}

/// Request validation errors, raised before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// User name longer than [`MAX_USERNAME_LEN`].
    UsernameTooLong(usize),
    /// Password longer than [`MAX_PASSWORD_LEN`].
    PasswordTooLong(usize),
    /// Offset does not fit in 24 bits.
    OffsetOutOfRange(u32),
    /// Write data does not fit the 2-byte count field.
    DataTooLong(usize),
    /// More than [`MAX_BAUD_RATES`] baud rates.
    TooManyBaudRates(usize),
    /// Only one of offset and octet count was given for a read.
    IncompleteRange,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UsernameTooLong(len) => {
                write!(f, "user name is {} bytes, at most {} allowed", len, MAX_USERNAME_LEN)
            }
            Self::PasswordTooLong(len) => {
                write!(f, "password is {} bytes, at most {} allowed", len, MAX_PASSWORD_LEN)
            }
            Self::OffsetOutOfRange(offset) => write!(f, "offset 0x{:X} exceeds 24 bits", offset),
            Self::DataTooLong(len) => write!(f, "write data of {} bytes is too long", len),
            Self::TooManyBaudRates(count) => {
                write!(f, "{} baud rates given, at most {} allowed", count, MAX_BAUD_RATES)
            }
            Self::IncompleteRange => write!(f, "partial reads need both an offset and a count"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RequestError {}

/// A PSEM service request.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Request {
    /// Identification (`0x20`).
    Identify,
    /// Terminate (`0x21`).
    Terminate,
    /// Logoff (`0x52`).
    Logoff,
    /// Negotiate (`0x60`–`0x6B`).
    Negotiate {
        /// Maximum packet size in bytes.
        packet_size: u16,
        /// Maximum number of packets per message.
        packet_count: u8,
        /// Proposed baud rates, most preferred first.
        baud_rates: Vec<BaudRate>,
    },
    /// Logon (`0x50`).
    Logon {
        /// User id recorded by the device.
        user_id: u16,
        /// User name, without padding.
        username: Vec<u8>,
    },
    /// Security (`0x51`).
    Security {
        /// Password, without padding.
        password: Vec<u8>,
    },
    /// Wait (`0x70`).
    Wait {
        /// Seconds to keep the session open.
        seconds: u8,
    },
    /// Table read (`0x30` / `0x3F`).
    Read {
        /// Table identifier.
        table_id: u16,
        /// Offset window; `None` reads the whole table.
        range: Option<TableRange>,
    },
    /// Table write (`0x40` / `0x4F`).
    Write {
        /// Table identifier.
        table_id: u16,
        /// Byte offset; `None` writes the whole table.
        offset: Option<u32>,
        /// Table data.
        data: Vec<u8>,
    },
}

impl Request {
    /// Builds a negotiate request.
    pub fn negotiate(
        packet_size: u16,
        packet_count: u8,
        baud_rates: &[BaudRate],
    ) -> Result<Self, RequestError> {
        if baud_rates.len() > MAX_BAUD_RATES {
            return Err(RequestError::TooManyBaudRates(baud_rates.len()));
        }
        Ok(Self::Negotiate { packet_size, packet_count, baud_rates: baud_rates.to_vec() })
    }

    /// Builds a logon request.
    pub fn logon(username: impl AsRef<[u8]>, user_id: u16) -> Result<Self, RequestError> {
        let username = username.as_ref();
        if username.len() > MAX_USERNAME_LEN {
            return Err(RequestError::UsernameTooLong(username.len()));
        }
        Ok(Self::Logon { user_id, username: username.to_vec() })
    }

    /// Builds a security request.
    pub fn security(password: impl AsRef<[u8]>) -> Result<Self, RequestError> {
        let password = password.as_ref();
        if password.len() > MAX_PASSWORD_LEN {
            return Err(RequestError::PasswordTooLong(password.len()));
        }
        Ok(Self::Security { password: password.to_vec() })
    }

    /// Builds a read request.
    ///
    /// The short form is used when both `offset` and `octet_count` are absent;
    /// the extended form requires both.
    pub fn read(
        table_id: u16,
        offset: Option<u32>,
        octet_count: Option<u16>,
    ) -> Result<Self, RequestError> {
        let range = match (offset, octet_count) {
            (None, None) => None,
            (Some(offset), Some(octet_count)) => {
                check_offset(offset)?;
                Some(TableRange { offset, octet_count })
            }
            _ => return Err(RequestError::IncompleteRange),
        };
        Ok(Self::Read { table_id, range })
    }

    /// Builds a write request; a present `offset` selects the extended form.
    pub fn write(table_id: u16, data: &[u8], offset: Option<u32>) -> Result<Self, RequestError> {
        if let Some(offset) = offset {
            check_offset(offset)?;
        }
        if data.len() > u16::MAX as usize {
            return Err(RequestError::DataTooLong(data.len()));
        }
        Ok(Self::Write { table_id, offset, data: data.to_vec() })
    }

    /// Returns the opcode this request encodes to.
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Identify => OPCODE_IDENTIFY,
            Self::Terminate => OPCODE_TERMINATE,
            Self::Logoff => OPCODE_LOGOFF,
            Self::Negotiate { baud_rates, .. } => OPCODE_NEGOTIATE + baud_rates.len() as u8,
            Self::Logon { .. } => OPCODE_LOGON,
            Self::Security { .. } => OPCODE_SECURITY,
            Self::Wait { .. } => OPCODE_WAIT,
            Self::Read { range: None, .. } => OPCODE_READ_FULL,
            Self::Read { range: Some(_), .. } => OPCODE_READ_PARTIAL,
            Self::Write { offset: None, .. } => OPCODE_WRITE_FULL,
            Self::Write { offset: Some(_), .. } => OPCODE_WRITE_PARTIAL,
        }
    }

    /// Short service name used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Terminate => "terminate",
            Self::Logoff => "logoff",
            Self::Negotiate { .. } => "negotiate",
            Self::Logon { .. } => "logon",
            Self::Security { .. } => "security",
            Self::Wait { .. } => "wait",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
        }
    }
}

fn check_offset(offset: u32) -> Result<(), RequestError> {
    if offset > MAX_TABLE_OFFSET {
        return Err(RequestError::OffsetOutOfRange(offset));
    }
    Ok(())
}

// ============================================================================
// ENCODING
// ============================================================================

#[cfg(feature = "encode")]
impl Request {
    /// Encodes the request payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.opcode());

        match self {
            Self::Identify | Self::Terminate | Self::Logoff => {}
            Self::Negotiate { packet_size, packet_count, baud_rates } => {
                buf.push_u16(*packet_size);
                buf.push(*packet_count);
                buf.extend(baud_rates.iter().map(|rate| *rate as u8));
            }
            Self::Logon { user_id, username } => {
                buf.push_u16(*user_id);
                buf.push_padded(username, MAX_USERNAME_LEN);
            }
            Self::Security { password } => {
                buf.push_padded(password, MAX_PASSWORD_LEN);
            }
            Self::Wait { seconds } => buf.push(*seconds),
            Self::Read { table_id, range } => {
                buf.push_u16(*table_id);
                if let Some(range) = range {
                    buf.push_u24(range.offset);
                    buf.push_u16(range.octet_count);
                }
            }
            Self::Write { table_id, offset, data } => {
                buf.push_u16(*table_id);
                if let Some(offset) = offset {
                    buf.push_u24(*offset);
                }
                buf.push_u16(data.len() as u16);
                buf.extend_from_slice(data);
                buf.push(table_checksum(data));
            }
        }

        buf
    }
}

// ============================================================================
// PARSING
// ============================================================================

#[cfg(feature = "parse")]
fn parse_error<T>(input: &[u8], kind: nom::error::ErrorKind) -> IResult<&[u8], T> {
    Err(nom::Err::Error(nom::error::Error::new(input, kind)))
}

#[cfg(feature = "parse")]
fn trim_padding(value: &[u8]) -> Vec<u8> {
    let end = value.iter().rposition(|&byte| byte != PAD_BYTE).map_or(0, |pos| pos + 1);
    value[..end].to_vec()
}

#[cfg(feature = "parse")]
fn parse_write_body(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    let (input, count) = be_u16(input)?;
    let (input, data) = take(count as usize).parse(input)?;
    let (input, checksum) = nom_u8(input)?;
    if table_checksum(data) != checksum {
        return parse_error(input, nom::error::ErrorKind::Verify);
    }
    Ok((input, data.to_vec()))
}

#[cfg(feature = "parse")]
impl Request {
    /// Parses a request payload, dispatching on the opcode.
    ///
    /// Write requests with a bad table checksum are rejected.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, opcode) = nom_u8(input)?;

        match opcode {
            OPCODE_IDENTIFY => Ok((input, Self::Identify)),
            OPCODE_TERMINATE => Ok((input, Self::Terminate)),
            OPCODE_LOGOFF => Ok((input, Self::Logoff)),
            OPCODE_NEGOTIATE..=0x6B => {
                let (input, packet_size) = be_u16(input)?;
                let (input, packet_count) = nom_u8(input)?;
                let (input, codes) = take((opcode - OPCODE_NEGOTIATE) as usize).parse(input)?;
                let mut baud_rates = Vec::with_capacity(codes.len());
                for &code in codes {
                    match BaudRate::try_from(code) {
                        Ok(rate) => baud_rates.push(rate),
                        Err(_) => return parse_error(input, nom::error::ErrorKind::Verify),
                    }
                }
                Ok((input, Self::Negotiate { packet_size, packet_count, baud_rates }))
            }
            OPCODE_LOGON => {
                let (input, user_id) = be_u16(input)?;
                let (input, username) = take(MAX_USERNAME_LEN).parse(input)?;
                Ok((input, Self::Logon { user_id, username: trim_padding(username) }))
            }
            OPCODE_SECURITY => {
                let (input, password) = take(MAX_PASSWORD_LEN).parse(input)?;
                Ok((input, Self::Security { password: trim_padding(password) }))
            }
            OPCODE_WAIT => {
                let (input, seconds) = nom_u8(input)?;
                Ok((input, Self::Wait { seconds }))
            }
            OPCODE_READ_FULL => {
                let (input, table_id) = be_u16(input)?;
                Ok((input, Self::Read { table_id, range: None }))
            }
            OPCODE_READ_PARTIAL => {
                let (input, table_id) = be_u16(input)?;
                let (input, offset) = be_u24(input)?;
                let (input, octet_count) = be_u16(input)?;
                Ok((input, Self::Read { table_id, range: Some(TableRange { offset, octet_count }) }))
            }
            OPCODE_WRITE_FULL => {
                let (input, table_id) = be_u16(input)?;
                let (input, data) = parse_write_body(input)?;
                Ok((input, Self::Write { table_id, offset: None, data }))
            }
            OPCODE_WRITE_PARTIAL => {
                let (input, table_id) = be_u16(input)?;
                let (input, offset) = be_u24(input)?;
                let (input, data) = parse_write_body(input)?;
                Ok((input, Self::Write { table_id, offset: Some(offset), data }))
            }
            _ => parse_error(input, nom::error::ErrorKind::Tag),
        }
    }
}

#[cfg(all(test, feature = "encode", feature = "parse"))]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_logon_encoding() {
        let request = Request::logon("Admin", 1).unwrap();
        assert_eq!(
            request.encode(),
            vec![0x50, 0x00, 0x01, 0x41, 0x64, 0x6D, 0x69, 0x6E, 0x20, 0x20, 0x20, 0x20, 0x20]
        );
    }

    #[test]
    fn test_security_encoding() {
        let encoded = Request::security("Password1").unwrap().encode();
        assert_eq!(encoded.len(), 1 + MAX_PASSWORD_LEN);
        assert_eq!(encoded[0], OPCODE_SECURITY);
        assert_eq!(&encoded[1..10], b"Password1");
        assert!(encoded[10..].iter().all(|&byte| byte == 0x20));
    }

    #[test]
    fn test_read_short_form() {
        let request = Request::read(1, None, None).unwrap();
        assert_eq!(request.encode(), vec![0x30, 0x00, 0x01]);
    }

    #[test]
    fn test_read_extended_form() {
        let request = Request::read(0x0802, Some(0x012345), Some(0x0010)).unwrap();
        assert_eq!(request.encode(), vec![0x3F, 0x08, 0x02, 0x01, 0x23, 0x45, 0x00, 0x10]);
    }

    #[test]
    fn test_read_incomplete_range_rejected() {
        assert_eq!(Request::read(1, Some(4), None), Err(RequestError::IncompleteRange));
        assert_eq!(Request::read(1, None, Some(4)), Err(RequestError::IncompleteRange));
    }

    #[test]
    fn test_write_extended_form() {
        let request = Request::write(1, b"data data data", Some(1)).unwrap();
        let mut expected = vec![0x4F, 0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x0E];
        expected.extend_from_slice(b"data data data");
        expected.push(0xF2);
        assert_eq!(request.encode(), expected);
    }

    #[test]
    fn test_write_short_form() {
        let request = Request::write(3, &[0x01, 0x02, 0x03], None).unwrap();
        assert_eq!(request.encode(), vec![0x40, 0x00, 0x03, 0x00, 0x03, 0x01, 0x02, 0x03, 0xFA]);
    }

    #[test]
    fn test_negotiate_encoding() {
        let plain = Request::negotiate(512, 2, &[]).unwrap();
        assert_eq!(plain.encode(), vec![0x60, 0x02, 0x00, 0x02]);

        let with_baud = Request::negotiate(512, 2, &[BaudRate::B9600]).unwrap();
        assert_eq!(with_baud.encode(), vec![0x61, 0x02, 0x00, 0x02, 0x06]);
    }

    #[test]
    fn test_simple_services() {
        assert_eq!(Request::Identify.encode(), vec![0x20]);
        assert_eq!(Request::Terminate.encode(), vec![0x21]);
        assert_eq!(Request::Logoff.encode(), vec![0x52]);
        assert_eq!(Request::Wait { seconds: 30 }.encode(), vec![0x70, 0x1E]);
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(Request::logon("ABCDEFGHIJK", 0), Err(RequestError::UsernameTooLong(11)));
        assert_eq!(Request::security([0x41; 21]), Err(RequestError::PasswordTooLong(21)));
        assert_eq!(
            Request::read(1, Some(0x0100_0000), Some(1)),
            Err(RequestError::OffsetOutOfRange(0x0100_0000))
        );
        assert_eq!(
            Request::negotiate(64, 1, &[BaudRate::B300; 12]),
            Err(RequestError::TooManyBaudRates(12))
        );
    }

    #[test]
    fn test_parse_dispatches_by_opcode() {
        let requests = vec![
            Request::Identify,
            Request::Terminate,
            Request::Logoff,
            Request::Wait { seconds: 5 },
            Request::negotiate(256, 1, &[BaudRate::B9600, BaudRate::B19200]).unwrap(),
            Request::logon("reader", 0x0102).unwrap(),
            Request::security("secret").unwrap(),
            Request::read(5, None, None).unwrap(),
            Request::read(5, Some(10), Some(4)).unwrap(),
            Request::write(7, &[0xAA, 0xBB], None).unwrap(),
            Request::write(7, &[0xAA, 0xBB], Some(2)).unwrap(),
        ];

        for request in requests {
            let encoded = request.encode();
            let (rest, parsed) = Request::parse(&encoded).unwrap();
            assert!(rest.is_empty());
            assert_eq!(parsed, request);
        }
    }

    #[test]
    fn test_parse_rejects_bad_write_checksum() {
        let mut encoded = Request::write(7, &[0xAA, 0xBB], None).unwrap().encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;
        assert!(Request::parse(&encoded).is_err());
    }

    #[test]
    fn test_parse_unknown_opcode() {
        assert!(Request::parse(&[0x99]).is_err());
    }

    #[test]
    fn test_baud_rate_lookup() {
        assert_eq!(BaudRate::from_bits_per_second(9600), Some(BaudRate::B9600));
        assert_eq!(BaudRate::from_bits_per_second(1234), None);
        assert_eq!(BaudRate::External.bits_per_second(), None);
        assert_eq!(BaudRate::try_from(0x0A), Ok(BaudRate::B57600));
    }
}
