//! C12.22 envelopes: the EPSEM content envelope and the ACSE APDU around it.
//!
//! ```text
//! 60 len                               ACSE APDU (APPLICATION 0)
//!    A2 len 06|0D len <oid>            called AP title
//!    A6 len 06|0D len <oid>            calling AP title
//!    A8 len 02 len <int>               calling AP invocation id
//!    BE len                            user information
//!       28 len                         EXTERNAL
//!          81 len                      single-ASN1-type
//!             <flags> [ed class] len <PSEM payload>
//! ```
//!
//! The EPSEM flags byte is `1 R P E SS CC`: recovery session, proxy service,
//! ED class present, security mode and response control.

use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;

use derive_try_from_primitive::TryFromPrimitive;

#[cfg(feature = "parse")]
use crate::ber::parse_tlv;
use crate::ber::{
    BerError, TAG_INTEGER, TAG_OBJECT_IDENTIFIER, TAG_RELATIVE_OID, check_object_identifier,
    decode_integer, decode_object_identifier, decode_relative_oid, parse_arcs,
};
#[cfg(feature = "encode")]
use crate::ber::{
    TagType, encode_application, encode_context_specific, encode_integer, encode_length,
    encode_object_identifier, encode_relative_oid, encode_tlv,
};

/// ACSE APDU tag (APPLICATION 0, constructed).
pub const TAG_ACSE_APDU: u8 = 0x60;
/// Called AP title (context 2).
pub const TAG_CALLED_AP_TITLE: u8 = 0xA2;
/// Calling AP title (context 6).
pub const TAG_CALLING_AP_TITLE: u8 = 0xA6;
/// Calling AP invocation id (context 8).
pub const TAG_CALLING_AP_INVOCATION_ID: u8 = 0xA8;
/// User information (context 30).
pub const TAG_USER_INFORMATION: u8 = 0xBE;
/// EXTERNAL (universal 8, constructed).
pub const TAG_EXTERNAL: u8 = 0x28;
/// single-ASN1-type (context 1, primitive).
pub const TAG_SINGLE_ASN1_TYPE: u8 = 0x81;

const EPSEM_RESERVED: u8 = 0x80;
const EPSEM_RECOVERY_SESSION: u8 = 0x40;
const EPSEM_PROXY_SERVICE: u8 = 0x20;
const EPSEM_ED_CLASS_INCLUDED: u8 = 0x10;

/// Envelope decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// A tag other than the expected one was found.
    UnexpectedTag { expected: u8, found: u8 },
    /// The APDU has no user-information element.
    MissingUserInformation,
    /// The EPSEM flags byte lacks the reserved high bit or uses reserved values.
    InvalidFlags(u8),
    /// Lengths or nesting do not add up.
    Malformed,
    /// An AP title or invocation id value could not be decoded.
    Ber(BerError),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedTag { expected, found } => {
                write!(f, "expected tag 0x{:02X}, found 0x{:02X}", expected, found)
            }
            Self::MissingUserInformation => write!(f, "APDU carries no user information"),
            Self::InvalidFlags(flags) => write!(f, "invalid EPSEM flags 0x{:02X}", flags),
            Self::Malformed => write!(f, "malformed envelope"),
            Self::Ber(err) => write!(f, "BER value error: {}", err),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EnvelopeError {}

impl From<BerError> for EnvelopeError {
    fn from(err: BerError) -> Self {
        EnvelopeError::Ber(err)
    }
}

/// Application-process title identifying a C12.22 node.
///
/// Parsed from dotted text: `2.16.124.113620.1.22.0` is absolute, a leading dot
/// (`.1.2.3`) marks a relative title.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ApTitle {
    /// Universal OBJECT IDENTIFIER.
    Absolute(Vec<u32>),
    /// RELATIVE-OID.
    Relative(Vec<u32>),
}

impl ApTitle {
    /// The OID arcs.
    pub fn arcs(&self) -> &[u32] {
        match self {
            Self::Absolute(arcs) | Self::Relative(arcs) => arcs,
        }
    }

    /// Encodes the inner `06`/`0D` TLV.
    #[cfg(feature = "encode")]
    pub fn encode(&self) -> Result<Vec<u8>, BerError> {
        match self {
            Self::Absolute(arcs) => {
                Ok(encode_tlv(TAG_OBJECT_IDENTIFIER, &encode_object_identifier(arcs)?))
            }
            Self::Relative(arcs) => Ok(encode_tlv(TAG_RELATIVE_OID, &encode_relative_oid(arcs))),
        }
    }

    fn from_tlv(tag: u8, content: &[u8]) -> Result<Self, EnvelopeError> {
        match tag {
            TAG_OBJECT_IDENTIFIER => Ok(Self::Absolute(decode_object_identifier(content)?)),
            TAG_RELATIVE_OID => Ok(Self::Relative(decode_relative_oid(content)?)),
            found => Err(EnvelopeError::UnexpectedTag { expected: TAG_OBJECT_IDENTIFIER, found }),
        }
    }
}

impl FromStr for ApTitle {
    type Err = BerError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.strip_prefix('.') {
            Some(relative) => Ok(Self::Relative(parse_arcs(relative)?)),
            None => {
                let arcs = parse_arcs(text)?;
                check_object_identifier(&arcs)?;
                Ok(Self::Absolute(arcs))
            }
        }
    }
}

impl fmt::Display for ApTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, arc) in self.arcs().iter().enumerate() {
            if index > 0 || matches!(self, Self::Relative(_)) {
                f.write_str(".")?;
            }
            write!(f, "{}", arc)?;
        }
        Ok(())
    }
}

/// EPSEM security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum SecurityMode {
    #[default]
    Cleartext = 0,
    CleartextAuthenticated = 1,
    Ciphertext = 2,
}

/// EPSEM response control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum ResponseControl {
    /// Always respond.
    #[default]
    Always = 0,
    /// Respond on exception only.
    OnException = 1,
    /// Never respond.
    Never = 2,
}

/// Extended PSEM content envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Epsem {
    pub recovery_session: bool,
    pub proxy_service: bool,
    pub security_mode: SecurityMode,
    pub response_control: ResponseControl,
    /// Optional 4-byte device class.
    pub ed_class: Option<[u8; 4]>,
    /// The PSEM request or response payload.
    pub content: Vec<u8>,
}

impl Epsem {
    /// Cleartext envelope, always-respond, no ED class.
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self { content: content.into(), ..Self::default() }
    }

    pub fn flags(&self) -> u8 {
        let mut flags = EPSEM_RESERVED;
        if self.recovery_session {
            flags |= EPSEM_RECOVERY_SESSION;
        }
        if self.proxy_service {
            flags |= EPSEM_PROXY_SERVICE;
        }
        if self.ed_class.is_some() {
            flags |= EPSEM_ED_CLASS_INCLUDED;
        }
        flags | (self.security_mode as u8) << 2 | self.response_control as u8
    }

    #[cfg(feature = "encode")]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.content.len() + 8);
        buf.push(self.flags());
        if let Some(ed_class) = self.ed_class {
            buf.extend_from_slice(&ed_class);
        }
        buf.extend(encode_length(self.content.len()));
        buf.extend_from_slice(&self.content);
        buf
    }

    /// Decodes a complete EPSEM; trailing bytes are ignored.
    #[cfg(feature = "parse")]
    pub fn decode(input: &[u8]) -> Result<Self, EnvelopeError> {
        let (&flags, mut rest) = input.split_first().ok_or(EnvelopeError::Malformed)?;
        if flags & EPSEM_RESERVED == 0 {
            return Err(EnvelopeError::InvalidFlags(flags));
        }
        let security_mode =
            SecurityMode::try_from((flags >> 2) & 0x03).map_err(|_| EnvelopeError::InvalidFlags(flags))?;
        let response_control =
            ResponseControl::try_from(flags & 0x03).map_err(|_| EnvelopeError::InvalidFlags(flags))?;

        let ed_class = if flags & EPSEM_ED_CLASS_INCLUDED != 0 {
            if rest.len() < 4 {
                return Err(EnvelopeError::Malformed);
            }
            let (class, tail) = rest.split_at(4);
            rest = tail;
            Some([class[0], class[1], class[2], class[3]])
        } else {
            None
        };

        let (rest, length) =
            crate::ber::parse_length(rest).map_err(|_| EnvelopeError::Malformed)?;
        let content = rest.get(..length).ok_or(EnvelopeError::Malformed)?;

        Ok(Self {
            recovery_session: flags & EPSEM_RECOVERY_SESSION != 0,
            proxy_service: flags & EPSEM_PROXY_SERVICE != 0,
            security_mode,
            response_control,
            ed_class,
            content: content.to_vec(),
        })
    }
}

/// C12.22 ACSE APDU carrying one EPSEM.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AcseApdu {
    pub called_ap_title: Option<ApTitle>,
    pub calling_ap_title: Option<ApTitle>,
    pub calling_ap_invocation_id: Option<u32>,
    pub user_information: Epsem,
}

#[cfg(feature = "encode")]
impl AcseApdu {
    pub fn encode(&self) -> Result<Vec<u8>, BerError> {
        let mut content = Vec::new();
        if let Some(title) = &self.called_ap_title {
            content.extend(encode_context_specific(2, TagType::Constructed, &title.encode()?));
        }
        if let Some(title) = &self.calling_ap_title {
            content.extend(encode_context_specific(6, TagType::Constructed, &title.encode()?));
        }
        if let Some(id) = self.calling_ap_invocation_id {
            let integer = encode_tlv(TAG_INTEGER, &encode_integer(id));
            content.extend(encode_context_specific(8, TagType::Constructed, &integer));
        }

        let single = encode_tlv(TAG_SINGLE_ASN1_TYPE, &self.user_information.encode());
        let external = encode_tlv(TAG_EXTERNAL, &single);
        content.extend(encode_context_specific(30, TagType::Constructed, &external));

        Ok(encode_application(0, TagType::Constructed, &content))
    }
}

#[cfg(feature = "parse")]
fn expect_single(input: &[u8], expected: u8) -> Result<&[u8], EnvelopeError> {
    let (_, (tag, content)) = parse_tlv(input).map_err(|_| EnvelopeError::Malformed)?;
    if tag != expected {
        return Err(EnvelopeError::UnexpectedTag { expected, found: tag });
    }
    Ok(content)
}

#[cfg(feature = "parse")]
impl AcseApdu {
    /// Decodes an APDU from the front of `input`.
    ///
    /// Returns `Ok(None)` while the buffered bytes do not yet hold a complete
    /// APDU, otherwise the APDU and the number of bytes it occupied.
    pub fn decode(input: &[u8]) -> Result<Option<(Self, usize)>, EnvelopeError> {
        let (rest, (tag, content)) = match parse_tlv(input) {
            Ok(parsed) => parsed,
            Err(nom::Err::Incomplete(_)) => return Ok(None),
            Err(_) => return Err(EnvelopeError::Malformed),
        };
        if tag != TAG_ACSE_APDU {
            return Err(EnvelopeError::UnexpectedTag { expected: TAG_ACSE_APDU, found: tag });
        }

        let apdu = Self::decode_elements(content)?;
        Ok(Some((apdu, input.len() - rest.len())))
    }

    fn decode_elements(mut content: &[u8]) -> Result<Self, EnvelopeError> {
        let mut called_ap_title = None;
        let mut calling_ap_title = None;
        let mut calling_ap_invocation_id = None;
        let mut user_information = None;

        while !content.is_empty() {
            let (rest, (tag, element)) =
                parse_tlv(content).map_err(|_| EnvelopeError::Malformed)?;
            content = rest;

            match tag {
                TAG_CALLED_AP_TITLE | TAG_CALLING_AP_TITLE => {
                    let (_, (inner_tag, value)) =
                        parse_tlv(element).map_err(|_| EnvelopeError::Malformed)?;
                    let title = ApTitle::from_tlv(inner_tag, value)?;
                    if tag == TAG_CALLED_AP_TITLE {
                        called_ap_title = Some(title);
                    } else {
                        calling_ap_title = Some(title);
                    }
                }
                TAG_CALLING_AP_INVOCATION_ID => {
                    let value = expect_single(element, TAG_INTEGER)?;
                    calling_ap_invocation_id = Some(decode_integer(value)?);
                }
                TAG_USER_INFORMATION => {
                    let external = expect_single(element, TAG_EXTERNAL)?;
                    let single = expect_single(external, TAG_SINGLE_ASN1_TYPE)?;
                    user_information = Some(Epsem::decode(single)?);
                }
                // Other ACSE elements (mechanism name, authentication value, ...)
                _ => {}
            }
        }

        Ok(Self {
            called_ap_title,
            calling_ap_title,
            calling_ap_invocation_id,
            user_information: user_information.ok_or(EnvelopeError::MissingUserInformation)?,
        })
    }
}

#[cfg(all(test, feature = "encode", feature = "parse"))]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;

    fn sample_apdu() -> AcseApdu {
        AcseApdu {
            called_ap_title: Some("2.16.124.113620.1.22.0".parse().unwrap()),
            calling_ap_title: Some(".1.2".parse().unwrap()),
            calling_ap_invocation_id: Some(0x1234),
            user_information: Epsem::new(vec![0x30, 0x00, 0x01]),
        }
    }

    #[test]
    fn test_ap_title_text() {
        let absolute: ApTitle = "2.16.124.113620.1.22.0".parse().unwrap();
        assert_eq!(absolute, ApTitle::Absolute(vec![2, 16, 124, 113620, 1, 22, 0]));
        assert_eq!(absolute.to_string(), "2.16.124.113620.1.22.0");

        let relative: ApTitle = ".1.2".parse().unwrap();
        assert_eq!(relative, ApTitle::Relative(vec![1, 2]));
        assert_eq!(relative.to_string(), ".1.2");

        assert_eq!("5.1".parse::<ApTitle>(), Err(BerError::InvalidObjectIdentifier));
        assert_eq!("".parse::<ApTitle>(), Err(BerError::InvalidObjectIdentifier));
    }

    #[test]
    fn test_epsem_encoding() {
        let epsem = Epsem::new(vec![0x20]);
        assert_eq!(epsem.encode(), vec![0x80, 0x01, 0x20]);

        let epsem = Epsem {
            ed_class: Some(*b"ITRN"),
            response_control: ResponseControl::OnException,
            ..Epsem::new(vec![0x20])
        };
        assert_eq!(epsem.flags(), 0x91);
        assert_eq!(epsem.encode(), vec![0x91, b'I', b'T', b'R', b'N', 0x01, 0x20]);
        assert_eq!(Epsem::decode(&epsem.encode()), Ok(epsem));
    }

    #[test]
    fn test_epsem_rejects_bad_flags() {
        assert_eq!(Epsem::decode(&[0x00, 0x00]), Err(EnvelopeError::InvalidFlags(0x00)));
        assert_eq!(Epsem::decode(&[0x83, 0x00]), Err(EnvelopeError::InvalidFlags(0x83)));
        assert_eq!(Epsem::decode(&[0x80, 0x05, 0x01]), Err(EnvelopeError::Malformed));
    }

    #[test]
    fn test_acse_layout() {
        let encoded = sample_apdu().encode().unwrap();
        let expected = vec![
            0x60, 0x23, //
            0xA2, 0x0A, 0x06, 0x08, 0x60, 0x7C, 0x86, 0xF7, 0x54, 0x01, 0x16, 0x00, //
            0xA6, 0x04, 0x0D, 0x02, 0x01, 0x02, //
            0xA8, 0x04, 0x02, 0x02, 0x12, 0x34, //
            0xBE, 0x09, 0x28, 0x07, 0x81, 0x05, 0x80, 0x03, 0x30, 0x00, 0x01,
        ];
        assert_eq!(encoded, expected);
    }

    #[test]
    fn test_acse_decode() {
        let apdu = sample_apdu();
        let encoded = apdu.encode().unwrap();
        assert_eq!(AcseApdu::decode(&encoded), Ok(Some((apdu, encoded.len()))));
    }

    #[test]
    fn test_acse_decode_incomplete() {
        let encoded = sample_apdu().encode().unwrap();
        for cut in 0..encoded.len() {
            assert_eq!(AcseApdu::decode(&encoded[..cut]), Ok(None), "cut at {}", cut);
        }
    }

    #[test]
    fn test_acse_decode_errors() {
        assert_eq!(
            AcseApdu::decode(&[0x61, 0x00]),
            Err(EnvelopeError::UnexpectedTag { expected: 0x60, found: 0x61 })
        );
        assert_eq!(AcseApdu::decode(&[0x60, 0x00]), Err(EnvelopeError::MissingUserInformation));
    }
}
