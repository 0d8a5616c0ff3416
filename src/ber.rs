//! ASN.1 BER (Basic Encoding Rules) helpers
//!
//! The minimal subset needed by the C12.22 ACSE envelope: single-byte tags,
//! definite lengths, OBJECT IDENTIFIER / RELATIVE-OID values for AP titles and
//! unsigned INTEGER values for invocation ids.
//!
//! Reference: ISO/IEC 8825-1, ANSI C12.22 Section 6

use alloc::vec::Vec;
use core::fmt;

#[cfg(feature = "parse")]
use nom::{
    IResult, Parser,
    bytes::streaming::take,
    error::{Error, ErrorKind},
    number::streaming::u8 as nom_u8,
};

/// Universal OBJECT IDENTIFIER tag.
pub const TAG_OBJECT_IDENTIFIER: u8 = 0x06;
/// Universal RELATIVE-OID tag.
pub const TAG_RELATIVE_OID: u8 = 0x0D;
/// Universal INTEGER tag.
pub const TAG_INTEGER: u8 = 0x02;

/// Largest number of length octets accepted in the long form.
const MAX_LENGTH_OCTETS: usize = 4;

// ============================================================================
// BER Tag Classes and Types
// ============================================================================

/// BER tag class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    /// Universal (0b00)
    Universal,
    /// Application (0b01)
    Application,
    /// Context-specific (0b10)
    ContextSpecific,
    /// Private (0b11)
    Private,
}

impl TagClass {
    /// Encode tag class to upper 2 bits
    pub const fn to_bits(self) -> u8 {
        match self {
            TagClass::Universal => 0b00_000000,
            TagClass::Application => 0b01_000000,
            TagClass::ContextSpecific => 0b10_000000,
            TagClass::Private => 0b11_000000,
        }
    }
}

/// BER tag type (primitive or constructed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    /// Primitive (0b0)
    Primitive,
    /// Constructed (0b1) - contains nested TLVs
    Constructed,
}

impl TagType {
    /// Encode tag type to bit 5
    pub const fn to_bit(self) -> u8 {
        match self {
            TagType::Primitive => 0b0000_0000,
            TagType::Constructed => 0b0010_0000,
        }
    }
}

/// Builds a single-byte tag. Tag numbers above 30 are masked to five bits.
pub const fn encode_tag(class: TagClass, tag_type: TagType, tag_number: u8) -> u8 {
    class.to_bits() | tag_type.to_bit() | (tag_number & 0b000_11111)
}

/// Errors from OBJECT IDENTIFIER and INTEGER value handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BerError {
    /// Not a valid dotted OID, or arcs out of range for an absolute OID.
    InvalidObjectIdentifier,
    /// An arc or integer does not fit in 32 bits.
    Overflow,
    /// The last subidentifier has its continuation bit set.
    Truncated,
}

impl fmt::Display for BerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidObjectIdentifier => write!(f, "invalid object identifier"),
            Self::Overflow => write!(f, "value does not fit in 32 bits"),
            Self::Truncated => write!(f, "truncated subidentifier"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BerError {}

// ============================================================================
// BER Length Encoding/Parsing (Definite Form Only)
// ============================================================================

/// Encode BER length in definite form
///
/// - Length 0-127: single byte [length]
/// - Length 128-255: [0x81, length]
/// - Longer: [0x80 | n, n big-endian bytes]
#[cfg(feature = "encode")]
pub fn encode_length(length: usize) -> Vec<u8> {
    if length <= 127 {
        return alloc::vec![length as u8];
    }

    let bytes = length.to_be_bytes();
    let skip = bytes.iter().take_while(|&&byte| byte == 0).count();
    let mut result = Vec::with_capacity(1 + bytes.len() - skip);
    result.push(0x80 | (bytes.len() - skip) as u8);
    result.extend_from_slice(&bytes[skip..]);
    result
}

/// Parse BER length in definite form
///
/// Streaming: a cut-off length yields `Incomplete`.
#[cfg(feature = "parse")]
pub fn parse_length(input: &[u8]) -> IResult<&[u8], usize> {
    let (input, first_byte) = nom_u8(input)?;

    if first_byte & 0x80 == 0 {
        return Ok((input, first_byte as usize));
    }

    let num_octets = (first_byte & 0x7F) as usize;
    if num_octets == 0 || num_octets > MAX_LENGTH_OCTETS {
        // Indefinite form and oversized lengths are not supported
        return Err(nom::Err::Error(Error::new(input, ErrorKind::LengthValue)));
    }

    let mut length = 0usize;
    let mut remaining = input;
    for _ in 0..num_octets {
        let (rest, byte) = nom_u8(remaining)?;
        length = (length << 8) | (byte as usize);
        remaining = rest;
    }

    Ok((remaining, length))
}

// ============================================================================
// TLV Encoding/Parsing
// ============================================================================

/// Encodes `[tag, length, ...content]`.
#[cfg(feature = "encode")]
pub fn encode_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut result = alloc::vec![tag];
    result.extend(encode_length(content.len()));
    result.extend_from_slice(content);
    result
}

/// Encode a context-specific tag with content
///
/// - Context[2], Constructed → 0xA2
/// - Context[30], Constructed → 0xBE
#[cfg(feature = "encode")]
pub fn encode_context_specific(tag_number: u8, tag_type: TagType, content: &[u8]) -> Vec<u8> {
    encode_tlv(encode_tag(TagClass::ContextSpecific, tag_type, tag_number), content)
}

/// Encode an APPLICATION tag with content
///
/// - APPLICATION[0], Constructed → 0x60
#[cfg(feature = "encode")]
pub fn encode_application(tag_number: u8, tag_type: TagType, content: &[u8]) -> Vec<u8> {
    encode_tlv(encode_tag(TagClass::Application, tag_type, tag_number), content)
}

/// Parses one TLV, returning the raw tag byte and its content.
///
/// Streaming: if the declared content is not all present the result is
/// `Incomplete`, so callers can keep reading from the wire.
#[cfg(feature = "parse")]
pub fn parse_tlv(input: &[u8]) -> IResult<&[u8], (u8, &[u8])> {
    let (input, tag) = nom_u8(input)?;
    if tag & 0b000_11111 == 0b000_11111 {
        // Multi-byte tag not supported
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    let (input, length) = parse_length(input)?;
    let (input, content) = take(length).parse(input)?;
    Ok((input, (tag, content)))
}

// ============================================================================
// OBJECT IDENTIFIER / RELATIVE-OID / INTEGER values
// ============================================================================

/// Parses dotted decimal arcs such as `2.16.124.113620.1.22`.
pub fn parse_arcs(text: &str) -> Result<Vec<u32>, BerError> {
    if text.is_empty() {
        return Err(BerError::InvalidObjectIdentifier);
    }
    text.split('.')
        .map(|arc| arc.parse::<u32>().map_err(|_| BerError::InvalidObjectIdentifier))
        .collect()
}

#[cfg(feature = "encode")]
fn push_subidentifier(buf: &mut Vec<u8>, value: u32) {
    let mut chunks = [0u8; 5];
    let mut count = 0;
    let mut remaining = value;
    loop {
        chunks[count] = (remaining & 0x7F) as u8;
        count += 1;
        remaining >>= 7;
        if remaining == 0 {
            break;
        }
    }
    for index in (0..count).rev() {
        let continuation = if index > 0 { 0x80 } else { 0x00 };
        buf.push(chunks[index] | continuation);
    }
}

/// Checks that `arcs` form an absolute OID: at least two arcs, the first at
/// most 2 and the second below 40 unless the first is 2.
pub fn check_object_identifier(arcs: &[u32]) -> Result<(), BerError> {
    match arcs {
        [first, second, ..] if *first < 2 && *second < 40 => Ok(()),
        [2, _, ..] => Ok(()),
        _ => Err(BerError::InvalidObjectIdentifier),
    }
}

/// Encodes the content octets of an absolute OBJECT IDENTIFIER.
///
/// The first two arcs are packed into one subidentifier (`40 * a + b`).
#[cfg(feature = "encode")]
pub fn encode_object_identifier(arcs: &[u32]) -> Result<Vec<u8>, BerError> {
    check_object_identifier(arcs)?;
    let [first, second, rest @ ..] = arcs else {
        return Err(BerError::InvalidObjectIdentifier);
    };
    let head = (first * 40).checked_add(*second).ok_or(BerError::Overflow)?;

    let mut buf = Vec::new();
    push_subidentifier(&mut buf, head);
    for &arc in rest {
        push_subidentifier(&mut buf, arc);
    }
    Ok(buf)
}

/// Encodes the content octets of a RELATIVE-OID.
#[cfg(feature = "encode")]
pub fn encode_relative_oid(arcs: &[u32]) -> Vec<u8> {
    let mut buf = Vec::new();
    for &arc in arcs {
        push_subidentifier(&mut buf, arc);
    }
    buf
}

fn decode_subidentifiers(content: &[u8]) -> Result<Vec<u32>, BerError> {
    let mut arcs = Vec::new();
    let mut value: u32 = 0;
    let mut pending = false;

    for &byte in content {
        if value > (u32::MAX >> 7) {
            return Err(BerError::Overflow);
        }
        value = (value << 7) | (byte & 0x7F) as u32;
        pending = byte & 0x80 != 0;
        if !pending {
            arcs.push(value);
            value = 0;
        }
    }

    if pending {
        return Err(BerError::Truncated);
    }
    Ok(arcs)
}

/// Decodes the content octets of an absolute OBJECT IDENTIFIER into arcs.
pub fn decode_object_identifier(content: &[u8]) -> Result<Vec<u32>, BerError> {
    let subidentifiers = decode_subidentifiers(content)?;
    let Some((&head, rest)) = subidentifiers.split_first() else {
        return Err(BerError::InvalidObjectIdentifier);
    };

    let (first, second) = match head {
        0..=39 => (0, head),
        40..=79 => (1, head - 40),
        _ => (2, head - 80),
    };
    let mut arcs = Vec::with_capacity(subidentifiers.len() + 1);
    arcs.push(first);
    arcs.push(second);
    arcs.extend_from_slice(rest);
    Ok(arcs)
}

/// Decodes the content octets of a RELATIVE-OID into arcs.
pub fn decode_relative_oid(content: &[u8]) -> Result<Vec<u32>, BerError> {
    let arcs = decode_subidentifiers(content)?;
    if arcs.is_empty() {
        return Err(BerError::InvalidObjectIdentifier);
    }
    Ok(arcs)
}

/// Encodes the content octets of a non-negative INTEGER in minimal form.
#[cfg(feature = "encode")]
pub fn encode_integer(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&byte| byte == 0).count().min(3);
    let mut result = Vec::with_capacity(5);
    if bytes[skip] & 0x80 != 0 {
        // Keep the value positive in two's complement
        result.push(0x00);
    }
    result.extend_from_slice(&bytes[skip..]);
    result
}

/// Decodes the content octets of a non-negative INTEGER.
pub fn decode_integer(content: &[u8]) -> Result<u32, BerError> {
    let trimmed = match content {
        [0x00, rest @ ..] if !rest.is_empty() => rest,
        _ => content,
    };
    if trimmed.is_empty() || trimmed.len() > 4 {
        return Err(BerError::Overflow);
    }
    Ok(trimmed.iter().fold(0u32, |acc, &byte| (acc << 8) | byte as u32))
}

// ============================================================================
// Tests
// ============================================================================
