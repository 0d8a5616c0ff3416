//! Client-side protocol engine for ANSI C12.18 optical-port sessions and
//! C12.22 networked sessions with electricity meters.
//!
//! The crate is layered bottom-up:
//!
//! - [`checksum`]: frame CRC and C12.19 table checksum.
//! - [`frame`]: C12.18 link frames (start byte, toggle bit, sequence, CRC).
//! - [`request`] and [`response`]: PSEM service payloads.
//! - [`ber`] and [`epsem`]: the C12.22 ACSE/EPSEM envelope.
//! - `transport`: raw byte channels (TCP, serial port).
//! - `link`: reliable delivery of one payload, framed with ACK/NACK retries
//!   or wrapped in a C12.22 envelope.
//! - `client`: session control, table reads and writes, procedures.
//!
//! The codec modules work without `std`; the link engine and client need it.
//!
//! # Examples
//!
//! ```
//! use ansi_c12::frame::Frame;
//! use ansi_c12::request::Request;
//!
//! let payload = Request::logon("Admin", 1).unwrap().encode();
//! let bytes = Frame::build(0x00, 0x00, 0x00, &payload).unwrap();
//! assert_eq!(&bytes[bytes.len() - 2..], &[0x9F, 0xC9]);
//!
//! let (frame, rest) = Frame::decode(&bytes).unwrap();
//! assert!(rest.is_empty());
//! assert_eq!(frame.payload, payload);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod ber;
pub mod checksum;
pub mod epsem;
pub mod frame;
pub mod request;

#[cfg(feature = "parse")]
pub mod response;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "client")]
pub mod link;
#[cfg(feature = "client")]
pub mod transport;

pub use checksum::{frame_crc, table_checksum};
pub use frame::{Frame, FrameError};
pub use request::{BaudRate, Request, RequestError};

#[cfg(feature = "parse")]
pub use response::ResponseCode;

#[cfg(feature = "client")]
pub use client::{C1218Client, ClientError, ClientSettings, LoginOutcome};
#[cfg(feature = "client")]
pub use link::{Link, SerialLink, TransportError};
#[cfg(feature = "client")]
pub use transport::Transport;
