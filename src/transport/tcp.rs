//! TCP byte transport.
//!
//! Used directly for C12.18 over a terminal server, and as the stream under
//! [`NetworkLink`](crate::link::network::NetworkLink) for C12.22.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::transport::Transport;

/// Registered C12.22 TCP port.
pub const DEFAULT_C1222_TCP_PORT: u16 = 1153;

/// Default read timeout applied on connect.
pub const DEFAULT_TCP_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Default write timeout applied on connect.
pub const DEFAULT_TCP_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Synchronous TCP transport.
///
/// # Timeouts
///
/// A read that hits the read timeout returns `Ok(0)`. A peer that has closed
/// the connection is reported as [`io::ErrorKind::UnexpectedEof`]. By default:
/// - Read timeout: 1 second
/// - Write timeout: 30 seconds
///
/// # Examples
///
/// ```no_run
/// use ansi_c12::transport::tcp::TcpTransport;
/// use std::time::Duration;
///
/// let mut transport = TcpTransport::connect("192.168.1.100:1153")?;
/// transport.set_write_timeout(Some(Duration::from_secs(60)))?;
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connects to `addr` and applies the default timeouts.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        Self::from_stream(TcpStream::connect(addr)?)
    }

    /// Wraps an already connected stream, e.g. one accepted from a listener.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_read_timeout(Some(DEFAULT_TCP_READ_TIMEOUT))?;
        stream.set_write_timeout(Some(DEFAULT_TCP_WRITE_TIMEOUT))?;

        // Disable Nagle's algorithm for lower latency
        stream.set_nodelay(true)?;

        Ok(Self { stream })
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_write_timeout(timeout)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Shuts down the read, write, or both halves of the connection.
    pub fn shutdown(&self, how: std::net::Shutdown) -> io::Result<()> {
        self.stream.shutdown(how)
    }

    /// Returns the underlying stream.
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl Transport for TcpTransport {
    type Error = io::Error;

    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        match self.stream.read(buffer) {
            Ok(0) if !buffer.is_empty() => {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer"))
            }
            Ok(read) => Ok(read),
            Err(err) if is_timeout(&err) => Ok(0),
            Err(err) => Err(err),
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), Self::Error> {
        self.stream.set_read_timeout(timeout)
    }
}

/// `WouldBlock` on Unix, `TimedOut` on Windows.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_C1222_TCP_PORT, 1153);
        assert_eq!(DEFAULT_TCP_READ_TIMEOUT, Duration::from_secs(1));
    }

    #[test]
    fn test_loopback_exchange_and_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpTransport::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let mut server = TcpTransport::from_stream(accepted).unwrap();

        client.send(&[0xEE, 0x00]).unwrap();
        let mut buffer = [0u8; 8];
        let mut read = 0;
        while read < 2 {
            read += server.recv(&mut buffer[read..]).unwrap();
        }
        assert_eq!(&buffer[..2], &[0xEE, 0x00]);

        client.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(client.recv(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_closed_peer_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpTransport::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        drop(accepted);

        let mut buffer = [0u8; 8];
        let err = client.recv(&mut buffer).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(client.recv(&mut []).unwrap(), 0);
    }
}
