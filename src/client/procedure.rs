//! Procedure invocation through tables 7 and 8.
//!
//! A procedure request is written to table 7 as a two-byte id word, a
//! sequence number and the parameters. The device posts its answer in table 8,
//! which starts with the same three bytes followed by a result code and any
//! response data.
//!
//! The id word packs the procedure number (bits 0-10), the manufacturer flag
//! (bit 11) and the response selector (bits 12-15). It is written in the
//! session's byte order.

use std::fmt;

use derive_try_from_primitive::TryFromPrimitive;
use log::{info, warn};

use crate::client::{
    C1218Client, ClientError, Endianness, PROCEDURE_INITIATE_TABLE, PROCEDURE_RESPONSE_TABLE,
};
use crate::link::Link;

/// Largest standard or manufacturer procedure number.
pub const MAX_PROCEDURE_NUMBER: u16 = 0x07FF;

const MANUFACTURER_BIT: u16 = 1 << 11;
const SELECTOR_SHIFT: u16 = 12;

/// When the device posts the procedure response in table 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum ResponseSelector {
    /// Post the response once the procedure completes.
    #[default]
    OnCompletion = 0,
    /// Post a response only if the procedure fails.
    OnException = 1,
    /// Never post a response.
    NoResponse = 2,
    /// Post an immediate response and again on completion.
    ImmediateAndOnCompletion = 3,
}

/// Result codes posted in table 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ProcedureResult {
    Completed = 0,
    NotFullyCompleted = 1,
    InvalidParameter = 2,
    ConflictWithSetup = 3,
    TimingConstraint = 4,
    NoAuthorization = 5,
    UnrecognizedProcedure = 6,
}

impl fmt::Display for ProcedureResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProcedureResult::Completed => "procedure completed",
            ProcedureResult::NotFullyCompleted => "procedure accepted but not fully completed",
            ProcedureResult::InvalidParameter => "invalid parameter",
            ProcedureResult::ConflictWithSetup => "conflict with current device setup",
            ProcedureResult::TimingConstraint => "timing constraint",
            ProcedureResult::NoAuthorization => "no authorization",
            ProcedureResult::UnrecognizedProcedure => "unrecognized procedure",
        };
        write!(f, "{}", text)
    }
}

/// Procedure failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureError {
    /// Table 8 did not echo the id word and sequence number that were sent.
    CorrelationMismatch { expected: [u8; 3], actual: Vec<u8> },
    /// Table 8 was too short to hold the echo and a result code.
    ShortResponse(usize),
    /// No randomness was available for the sequence number.
    Entropy,
}

impl fmt::Display for ProcedureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcedureError::CorrelationMismatch { expected, actual } => write!(
                f,
                "procedure response does not match request: expected {:02X?}, got {:02X?}",
                expected, actual
            ),
            ProcedureError::ShortResponse(len) => {
                write!(f, "procedure response too short ({} bytes)", len)
            }
            ProcedureError::Entropy => write!(f, "random sequence number unavailable"),
        }
    }
}

impl std::error::Error for ProcedureError {}

/// A procedure to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureRequest {
    /// Procedure number; only the low 11 bits are sent.
    pub number: u16,
    /// Manufacturer-defined rather than standard procedure.
    pub manufacturer: bool,
    pub selector: ResponseSelector,
    pub params: Vec<u8>,
}

impl ProcedureRequest {
    pub fn new(number: u16, manufacturer: bool, params: &[u8]) -> Self {
        Self {
            number,
            manufacturer,
            selector: ResponseSelector::OnCompletion,
            params: params.to_vec(),
        }
    }

    pub fn with_selector(mut self, selector: ResponseSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Packed id word.
    pub fn id_bits(&self) -> u16 {
        let mut bits = self.number & MAX_PROCEDURE_NUMBER;
        if self.manufacturer {
            bits |= MANUFACTURER_BIT;
        }
        bits | (self.selector as u16) << SELECTOR_SHIFT
    }

    /// Table 7 contents for this request.
    pub fn encode(&self, sequence: u8, endianness: Endianness) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + self.params.len());
        buf.extend_from_slice(&endianness.encode_u16(self.id_bits()));
        buf.push(sequence);
        buf.extend_from_slice(&self.params);
        buf
    }
}

/// Table 8 contents after a procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureResponse {
    /// Sequence number echoed by the device.
    pub sequence: u8,
    /// Raw result code.
    pub result_code: u8,
    /// Response data following the result code.
    pub data: Vec<u8>,
}

impl ProcedureResponse {
    /// The result code, if it is a known one.
    pub fn result(&self) -> Option<ProcedureResult> {
        ProcedureResult::try_from(self.result_code).ok()
    }

    pub fn is_completed(&self) -> bool {
        self.result_code == ProcedureResult::Completed as u8
    }

    /// Checks the echo against what was written and splits off the result.
    fn decode(expected: [u8; 3], table: &[u8]) -> Result<Self, ProcedureError> {
        if table.len() < 4 {
            return Err(ProcedureError::ShortResponse(table.len()));
        }
        if table[..3] != expected {
            return Err(ProcedureError::CorrelationMismatch {
                expected,
                actual: table[..3].to_vec(),
            });
        }
        Ok(Self { sequence: table[2], result_code: table[3], data: table[4..].to_vec() })
    }
}

/// Draws a sequence number in 2..=254.
fn random_sequence() -> Result<u8, ProcedureError> {
    let mut byte = [0u8; 1];
    getrandom::getrandom(&mut byte).map_err(|_| ProcedureError::Entropy)?;
    Ok(2 + byte[0] % 253)
}

impl<L: Link> C1218Client<L> {
    /// Runs procedure `number` with `params` and returns the device's answer.
    pub fn run_procedure(
        &mut self,
        number: u16,
        manufacturer: bool,
        params: &[u8],
    ) -> Result<ProcedureResponse, ClientError<L::Error>> {
        self.run_procedure_with(&ProcedureRequest::new(number, manufacturer, params))
    }

    /// Runs a fully specified procedure request.
    ///
    /// A response that does not echo the request is reported as
    /// [`ProcedureError::CorrelationMismatch`] and not retried.
    pub fn run_procedure_with(
        &mut self,
        request: &ProcedureRequest,
    ) -> Result<ProcedureResponse, ClientError<L::Error>> {
        let sequence = random_sequence()?;
        let table = request.encode(sequence, self.state.endianness);
        let expected = [table[0], table[1], table[2]];

        info!(
            "running procedure {} (sequence {}, {} parameter bytes)",
            request.number,
            sequence,
            request.params.len()
        );
        self.write_table(PROCEDURE_INITIATE_TABLE, &table, None)?;

        let answer = self.read_table(PROCEDURE_RESPONSE_TABLE, None, None)?;
        let response = ProcedureResponse::decode(expected, &answer).inspect_err(|err| {
            warn!("procedure {}: {}", request.number, err);
        })?;

        match response.result() {
            Some(result) => info!("procedure {}: {}", request.number, result),
            None => warn!("procedure {}: unknown result code {}", request.number, response.result_code),
        }
        Ok(response)
    }
}
