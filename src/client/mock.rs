//! In-memory meter answering PSEM requests, for client tests.

use std::collections::BTreeMap;
use std::convert::Infallible;

use crate::client::{PROCEDURE_INITIATE_TABLE, PROCEDURE_RESPONSE_TABLE};
use crate::link::{Link, TransportError};
use crate::request::Request;
use crate::response::{ReadResponse, ResponseCode};

#[derive(Debug, Default)]
pub(crate) struct SimulatedMeter {
    pub tables: BTreeMap<u16, Vec<u8>>,
    /// Every request received, in order.
    pub requests: Vec<Request>,
    /// Status to answer per opcode instead of `ok`.
    pub statuses: BTreeMap<u8, u8>,
    pub fail_sends: bool,
    pub corrupt_read_checksum: bool,
    pub corrupt_procedure_echo: bool,
    pub procedure_result: u8,
    pub procedure_data: Vec<u8>,
    pub resets: usize,
    pub clears: usize,
    pending: Option<Vec<u8>>,
}

impl SimulatedMeter {
    pub fn new() -> Self {
        Self::default()
    }

    fn answer(&mut self, request: &Request) -> Vec<u8> {
        if let Some(&status) = self.statuses.get(&request.opcode()) {
            return vec![status];
        }

        match request {
            Request::Identify => vec![0x00, 0x00, 0x01, 0x00, 0x00],
            Request::Negotiate { packet_size, packet_count, baud_rates } => {
                let mut response = vec![0x00];
                response.extend_from_slice(&packet_size.to_be_bytes());
                response.push(*packet_count);
                if let Some(rate) = baud_rates.first() {
                    response.push(*rate as u8);
                }
                response
            }
            Request::Read { table_id, range } => {
                let Some(table) = self.tables.get(table_id) else {
                    return vec![ResponseCode::Onp as u8];
                };
                let data = match range {
                    None => Some(table.as_slice()),
                    Some(range) => {
                        let start = range.offset as usize;
                        table.get(start..start + range.octet_count as usize)
                    }
                };
                match data {
                    Some(data) => {
                        let mut response = ReadResponse::encode(data);
                        if self.corrupt_read_checksum {
                            if let Some(checksum) = response.last_mut() {
                                *checksum ^= 0xFF;
                            }
                        }
                        response
                    }
                    None => vec![ResponseCode::Onp as u8],
                }
            }
            Request::Write { table_id, offset, data } => {
                if *table_id == PROCEDURE_INITIATE_TABLE {
                    self.post_procedure_response(data);
                }
                let table = self.tables.entry(*table_id).or_default();
                match offset {
                    None => *table = data.clone(),
                    Some(offset) => {
                        let start = *offset as usize;
                        if table.len() < start + data.len() {
                            table.resize(start + data.len(), 0x00);
                        }
                        table[start..start + data.len()].copy_from_slice(data);
                    }
                }
                vec![0x00]
            }
            _ => vec![0x00],
        }
    }

    fn post_procedure_response(&mut self, request: &[u8]) {
        let mut echo = request.iter().take(3).copied().collect::<Vec<_>>();
        if self.corrupt_procedure_echo {
            if let Some(sequence) = echo.get_mut(2) {
                *sequence = sequence.wrapping_add(1);
            }
        }
        echo.push(self.procedure_result);
        echo.extend_from_slice(&self.procedure_data);
        self.tables.insert(PROCEDURE_RESPONSE_TABLE, echo);
    }
}

impl Link for SimulatedMeter {
    type Error = Infallible;

    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError<Self::Error>> {
        if self.fail_sends {
            return Err(TransportError::SendFailed { attempts: 3 });
        }
        let (_, request) = Request::parse(payload)
            .map_err(|_| TransportError::RecvFailed { attempts: 0 })?;
        self.pending = Some(self.answer(&request));
        self.requests.push(request);
        Ok(())
    }

    fn recv(&mut self) -> Result<Vec<u8>, TransportError<Self::Error>> {
        self.pending.take().ok_or(TransportError::Timeout)
    }

    fn reset(&mut self) {
        self.resets += 1;
    }

    fn clear(&mut self) -> Result<(), TransportError<Self::Error>> {
        self.clears += 1;
        Ok(())
    }
}
