//! Payload-level links: reliable delivery of one PSEM payload at a time.
//!
//! [`serial::SerialLink`] frames payloads with CRCs, toggle bits and ACK/NACK
//! retries; [`network::NetworkLink`] wraps them in C12.22 envelopes over TCP.
//! The client is generic over [`Link`] and works with either.

use alloc::vec::Vec;
use core::fmt;

use crate::epsem::EnvelopeError;
use crate::frame::FrameError;

pub mod serial;

#[cfg(feature = "transport-tcp")]
pub mod network;

pub use serial::{LinkSettings, SerialLink};

/// Errors raised by a link. `E` is the underlying channel error.
#[derive(Debug)]
pub enum TransportError<E> {
    /// No ACK after the configured number of attempts.
    SendFailed { attempts: usize },
    /// No valid frame after the configured number of attempts.
    RecvFailed { attempts: usize },
    /// I/O error from the byte channel.
    Channel(E),
    /// A payload could not be framed.
    Frame(FrameError),
    /// A C12.22 envelope could not be encoded or decoded.
    Envelope(EnvelopeError),
    /// No complete response before the receive deadline.
    Timeout,
}

impl<E> From<FrameError> for TransportError<E> {
    fn from(err: FrameError) -> Self {
        TransportError::Frame(err)
    }
}

impl<E> From<EnvelopeError> for TransportError<E> {
    fn from(err: EnvelopeError) -> Self {
        TransportError::Envelope(err)
    }
}

impl<E: fmt::Display> fmt::Display for TransportError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendFailed { attempts } => {
                write!(f, "frame not acknowledged after {} attempts", attempts)
            }
            Self::RecvFailed { attempts } => {
                write!(f, "no valid frame received after {} attempts", attempts)
            }
            Self::Channel(err) => write!(f, "channel error: {}", err),
            Self::Frame(err) => write!(f, "framing error: {}", err),
            Self::Envelope(err) => write!(f, "envelope error: {}", err),
            Self::Timeout => write!(f, "timed out waiting for a response"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for TransportError<E> {}

/// Delivers whole PSEM payloads to and from the device.
///
/// One request is outstanding at a time: every `send` is followed by the
/// matching `recv` before the next `send`.
pub trait Link {
    /// The underlying channel error.
    type Error: fmt::Debug;

    /// Delivers one request payload.
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError<Self::Error>>;

    /// Receives one complete response payload.
    fn recv(&mut self) -> Result<Vec<u8>, TransportError<Self::Error>>;

    /// Returns link-level state (the toggle bit) to its initial value.
    fn reset(&mut self) {}

    /// Discards stale bytes before a new session.
    fn clear(&mut self) -> Result<(), TransportError<Self::Error>> {
        Ok(())
    }
}
