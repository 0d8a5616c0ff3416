use std::time::Duration;

/// Byte-oriented duplex channel underneath a [`Link`](crate::link::Link).
///
/// The link engines drive the protocol on top of this trait; implementations
/// only move bytes (serial port, TCP socket, in-memory pipe).
///
/// Reads are bounded by the configured read timeout. A read that times out
/// without data must return `Ok(0)` rather than an error: the link engines
/// count it against their retry budget.
pub trait Transport: core::fmt::Debug {
    /// The error type returned by transport operations.
    type Error: core::fmt::Debug;

    /// Writes all of `data` to the channel.
    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Reads up to `buffer.len()` bytes.
    ///
    /// Returns the number of bytes read, `0` if the read timed out. A closed
    /// channel is an error, not `0`.
    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error>;

    /// Changes the read timeout. `None` blocks indefinitely.
    ///
    /// Default implementation ignores the request.
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Discards any buffered input and output.
    ///
    /// Default implementation does nothing.
    fn clear(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(feature = "transport-tcp")]
pub mod tcp;

#[cfg(feature = "transport-serial")]
pub mod serial;
