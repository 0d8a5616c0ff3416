//! C12.22 link: PSEM payloads in EPSEM/ACSE envelopes over TCP.
//!
//! There is no frame CRC or ACK/NACK here; delivery is left to TCP. A device
//! may answer on the outbound connection or call back on a listening socket,
//! so `recv` watches both until the receive timeout elapses.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::epsem::{AcseApdu, ApTitle, Epsem};
use crate::link::{Link, TransportError};
use crate::transport::Transport;
use crate::transport::tcp::{TcpTransport, is_timeout};

/// How long to wait for a complete response.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-read poll interval while waiting on the sockets.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Read chunk size while draining a socket.
const READ_CHUNK_SIZE: usize = 1024;

/// C12.22 addressing and timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    /// AP title of the device.
    pub called_ap_title: Option<ApTitle>,
    /// AP title of this client.
    pub calling_ap_title: Option<ApTitle>,
    /// Deadline for a complete response.
    pub recv_timeout: Duration,
    /// Address to accept device call-backs on.
    pub listen_addr: Option<SocketAddr>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            called_ap_title: None,
            calling_ap_title: None,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            listen_addr: None,
        }
    }
}

/// Network link over a TCP connection.
#[derive(Debug)]
pub struct NetworkLink {
    stream: TcpTransport,
    listener: Option<TcpListener>,
    inbound: Option<TcpTransport>,
    settings: NetworkSettings,
    buffer: Vec<u8>,
}

impl NetworkLink {
    /// Wraps a connected transport, binding the call-back listener if one is
    /// configured.
    pub fn new(mut stream: TcpTransport, settings: NetworkSettings) -> io::Result<Self> {
        stream.set_read_timeout(Some(POLL_INTERVAL))?;

        let listener = match settings.listen_addr {
            Some(addr) => {
                let listener = TcpListener::bind(addr)?;
                listener.set_nonblocking(true)?;
                info!("listening for call-backs on {}", listener.local_addr()?);
                Some(listener)
            }
            None => None,
        };

        Ok(Self { stream, listener, inbound: None, settings, buffer: Vec::new() })
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    /// Local address of the call-back listener while it is open.
    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|listener| listener.local_addr().ok())
    }

    /// Whether a device connection has been accepted on the listener.
    pub fn has_inbound(&self) -> bool {
        self.inbound.is_some()
    }

    /// Closes the listener and any accepted connection.
    pub fn close(&mut self) {
        self.listener = None;
        self.inbound = None;
    }

    fn accept_pending(&mut self) -> io::Result<()> {
        let Some(listener) = &self.listener else {
            return Ok(());
        };

        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                let mut inbound = TcpTransport::from_stream(stream)?;
                inbound.set_read_timeout(Some(POLL_INTERVAL))?;
                info!("accepted device connection from {}", peer);
                self.inbound = Some(inbound);
                // One peer per link
                self.listener = None;
                Ok(())
            }
            Err(err) if is_timeout(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Reads until a read comes back short.
    fn drain(transport: &mut TcpTransport, buffer: &mut Vec<u8>) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let read = transport.recv(&mut chunk)?;
            buffer.extend_from_slice(&chunk[..read]);
            if read < chunk.len() {
                return Ok(());
            }
        }
    }
}

impl Link for NetworkLink {
    type Error = io::Error;

    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError<Self::Error>> {
        let mut invocation_id = [0u8; 4];
        getrandom::getrandom(&mut invocation_id)
            .map_err(|err| TransportError::Channel(io::Error::other(err.to_string())))?;

        let apdu = AcseApdu {
            called_ap_title: self.settings.called_ap_title.clone(),
            calling_ap_title: self.settings.calling_ap_title.clone(),
            calling_ap_invocation_id: Some(u32::from_be_bytes(invocation_id)),
            user_information: Epsem::new(payload),
        };
        let encoded = apdu.encode().map_err(|err| TransportError::Envelope(err.into()))?;

        debug!("sending APDU: {:02X?}", encoded);
        let target = self.inbound.as_mut().unwrap_or(&mut self.stream);
        target.send(&encoded).map_err(TransportError::Channel)
    }

    fn recv(&mut self) -> Result<Vec<u8>, TransportError<Self::Error>> {
        let deadline = Instant::now() + self.settings.recv_timeout;

        loop {
            // A previous read may have carried more than one APDU
            if !self.buffer.is_empty() {
                match AcseApdu::decode(&self.buffer) {
                    Ok(Some((apdu, used))) => {
                        debug!("received APDU: {:02X?}", &self.buffer[..used]);
                        self.buffer.drain(..used);
                        return Ok(apdu.user_information.content);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!("discarding undecodable APDU: {}", err);
                        self.buffer.clear();
                        return Err(TransportError::Envelope(err));
                    }
                }
            }

            if Instant::now() >= deadline {
                warn!("no complete APDU within {:?}", self.settings.recv_timeout);
                return Err(TransportError::Timeout);
            }

            self.accept_pending().map_err(TransportError::Channel)?;
            if let Some(inbound) = self.inbound.as_mut() {
                Self::drain(inbound, &mut self.buffer).map_err(TransportError::Channel)?;
            }
            Self::drain(&mut self.stream, &mut self.buffer).map_err(TransportError::Channel)?;
        }
    }

    fn clear(&mut self) -> Result<(), TransportError<Self::Error>> {
        self.buffer.clear();
        Ok(())
    }
}

impl Drop for NetworkLink {
    fn drop(&mut self) {
        self.close();
    }
}
