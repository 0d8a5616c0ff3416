//! C12.18 / C12.22 client: session control, table access and procedures.
//!
//! [`C1218Client`] is generic over a [`Link`], so the same session, table and
//! procedure logic runs over a serial line ([`SerialLink`](crate::link::SerialLink))
//! or a C12.22 network ([`NetworkLink`](crate::link::network::NetworkLink)).
//!
//! # Examples
//!
//! ```no_run
//! # #[cfg(feature = "transport-tcp")]
//! # {
//! use ansi_c12::client::{C1218Client, ClientSettings, LoginOutcome};
//! use ansi_c12::link::SerialLink;
//! use ansi_c12::transport::tcp::TcpTransport;
//!
//! let link = SerialLink::new(TcpTransport::connect("10.0.0.5:4001")?);
//! let mut client = C1218Client::new(link, ClientSettings::default());
//!
//! client.start()?;
//! if client.login("0000", 2, Some(b"00000000".as_slice()))? == LoginOutcome::LoggedIn {
//!     let manufacturer = client.read_table(1, None, None)?;
//!     println!("{:02X?}", manufacturer);
//! }
//! client.stop(false)?;
//! # }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeSet;
use std::fmt;

use log::debug;

use crate::link::{Link, TransportError};
use crate::request::{BaudRate, Request, RequestError};
use crate::response::{IdentifyResponse, NegotiateResponse};

pub mod procedure;
pub mod session;
pub mod table;

#[cfg(test)]
mod mock;

pub use procedure::{
    ProcedureError, ProcedureRequest, ProcedureResponse, ProcedureResult, ResponseSelector,
};
pub use session::{LoginOutcome, SessionError};
pub use table::{TableCache, TableError, TableOperation};

// ============================================================================
// Shared Constants
// ============================================================================

/// General configuration table (ST 0).
pub const GENERAL_CONFIG_TABLE: u16 = 0;

/// General manufacturer identification table (ST 1).
pub const MANUFACTURER_ID_TABLE: u16 = 1;

/// Procedure initiate table (ST 7).
pub const PROCEDURE_INITIATE_TABLE: u16 = 7;

/// Procedure response table (ST 8).
pub const PROCEDURE_RESPONSE_TABLE: u16 = 8;

/// Default negotiated packet size.
pub const DEFAULT_PACKET_SIZE: u16 = 512;

/// Default negotiated packet count.
pub const DEFAULT_PACKET_COUNT: u8 = 2;

/// Tables whose contents do not change during a session.
pub const DEFAULT_CACHEABLE_TABLES: [u16; 2] = [GENERAL_CONFIG_TABLE, MANUFACTURER_ID_TABLE];

/// Byte order used for multi-byte values inside table data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

impl Endianness {
    pub fn encode_u16(self, value: u16) -> [u8; 2] {
        match self {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        }
    }

    pub fn decode_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            Endianness::Little => u16::from_le_bytes(bytes),
            Endianness::Big => u16::from_be_bytes(bytes),
        }
    }
}

/// Errors that can occur during client operations.
#[derive(Debug)]
pub enum ClientError<E> {
    /// The link gave up or the channel failed.
    Transport(TransportError<E>),
    /// Session control failed.
    Session(SessionError),
    /// A table read or write failed.
    Table(TableError),
    /// A procedure could not be completed.
    Procedure(ProcedureError),
    /// Invalid arguments, rejected before anything was sent.
    Request(RequestError),
}

impl<E> From<TransportError<E>> for ClientError<E> {
    fn from(err: TransportError<E>) -> Self {
        ClientError::Transport(err)
    }
}

impl<E> From<SessionError> for ClientError<E> {
    fn from(err: SessionError) -> Self {
        ClientError::Session(err)
    }
}

impl<E> From<TableError> for ClientError<E> {
    fn from(err: TableError) -> Self {
        ClientError::Table(err)
    }
}

impl<E> From<ProcedureError> for ClientError<E> {
    fn from(err: ProcedureError) -> Self {
        ClientError::Procedure(err)
    }
}

impl<E> From<RequestError> for ClientError<E> {
    fn from(err: RequestError) -> Self {
        ClientError::Request(err)
    }
}

impl<E: fmt::Display> fmt::Display for ClientError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(e) => write!(f, "Transport error: {}", e),
            ClientError::Session(e) => write!(f, "Session error: {}", e),
            ClientError::Table(e) => write!(f, "Table error: {}", e),
            ClientError::Procedure(e) => write!(f, "Procedure error: {}", e),
            ClientError::Request(e) => write!(f, "Invalid request: {}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ClientError<E> {}

/// Settings for the client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Packet size proposed in the negotiate request.
    /// Default: 512.
    pub packet_size: u16,
    /// Packet count proposed in the negotiate request.
    /// Default: 2.
    pub packet_count: u8,
    /// Baud rates proposed in the negotiate request, most preferred first.
    /// Default: 9600.
    pub baud_rates: Vec<BaudRate>,
    /// Serve repeated reads of cacheable tables from memory.
    /// Default: true.
    pub cache_enabled: bool,
    /// Tables eligible for caching.
    /// Default: {0, 1}.
    pub cacheable_tables: BTreeSet<u16>,
    /// Byte order of the device until detected otherwise.
    /// Default: little endian.
    pub endianness: Endianness,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            packet_count: DEFAULT_PACKET_COUNT,
            baud_rates: vec![BaudRate::B9600],
            cache_enabled: true,
            cacheable_tables: DEFAULT_CACHEABLE_TABLES.into_iter().collect(),
            endianness: Endianness::Little,
        }
    }
}

/// Where the session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SessionPhase {
    #[default]
    Disconnected,
    Identified,
    Negotiated,
    LoggedIn,
    Terminated,
}

/// Internal state of the client session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// Byte order used for procedure ids and table values.
    pub endianness: Endianness,
    /// Device identification from the last `start`.
    pub identify: Option<IdentifyResponse>,
    /// Parameters accepted in the last negotiate.
    pub negotiate: Option<NegotiateResponse>,
}

impl SessionState {
    /// True between a successful negotiate and terminate.
    pub fn is_initialized(&self) -> bool {
        matches!(self.phase, SessionPhase::Negotiated | SessionPhase::LoggedIn)
    }

    pub fn is_logged_in(&self) -> bool {
        self.phase == SessionPhase::LoggedIn
    }
}

/// Client for C12.18-style sessions over any [`Link`].
#[derive(Debug)]
pub struct C1218Client<L: Link> {
    link: L,
    settings: ClientSettings,
    state: SessionState,
    cache: TableCache,
}

impl<L: Link> C1218Client<L> {
    pub fn new(link: L, settings: ClientSettings) -> Self {
        let cache = TableCache::new(settings.cache_enabled, settings.cacheable_tables.clone());
        let state = SessionState { endianness: settings.endianness, ..SessionState::default() };
        Self { link, settings, state, cache }
    }

    /// Returns a reference to the underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Returns a mutable reference to the underlying link.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn cache(&self) -> &TableCache {
        &self.cache
    }

    pub fn into_inner(self) -> L {
        self.link
    }

    /// Sends one request and returns the raw response payload.
    fn exchange(&mut self, request: &Request) -> Result<Vec<u8>, ClientError<L::Error>> {
        let payload = request.encode();
        debug!("{} request: {:02X?}", request.name(), payload);
        self.link.send(&payload)?;
        let response = self.link.recv()?;
        debug!("{} response: {:02X?}", request.name(), response);
        Ok(response)
    }
}
