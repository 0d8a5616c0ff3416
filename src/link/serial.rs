//! C12.18 link engine: framing, toggle bit, ACK/NACK retries and multi-frame
//! reassembly over a raw byte [`Transport`].

use std::thread;
use std::time::Duration;

use log::{debug, error, warn};

use crate::frame::{
    ACK, CONTROL_TOGGLE, DEFAULT_IDENTITY, FRAME_CRC_SIZE, FRAME_HEADER_SIZE, FRAME_START, Frame,
    MAX_PAYLOAD_SIZE, NACK, declared_length,
};
use crate::link::{Link, TransportError};
use crate::transport::Transport;

/// Attempts per send and per received frame.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Pause before retransmitting after a NACK or a missing acknowledgement.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Link engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Alternate the control-byte toggle bit on every acknowledged frame.
    pub toggle_control: bool,
    /// Attempts before `SendFailed` / `RecvFailed`.
    pub max_attempts: usize,
    /// Delay between send attempts.
    pub retry_delay: Duration,
    /// Identity byte placed in outbound frames.
    pub identity: u8,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            toggle_control: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            identity: DEFAULT_IDENTITY,
        }
    }
}

/// Reliable payload delivery over a half-duplex serial channel.
///
/// # Examples
///
/// ```no_run
/// # #[cfg(feature = "transport-tcp")]
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use ansi_c12::link::{Link, SerialLink};
/// use ansi_c12::transport::tcp::TcpTransport;
///
/// let transport = TcpTransport::connect("10.0.0.5:4001")?;
/// let mut link = SerialLink::new(transport);
/// link.send(&[0x20])?;
/// let response = link.recv()?;
/// # Ok(())
/// # }
/// # #[cfg(not(feature = "transport-tcp"))]
/// # fn main() {}
/// ```
#[derive(Debug)]
pub struct SerialLink<T: Transport> {
    transport: T,
    settings: LinkSettings,
    toggle: bool,
}

impl<T: Transport> SerialLink<T> {
    pub fn new(transport: T) -> Self {
        Self::with_settings(transport, LinkSettings::default())
    }

    pub fn with_settings(transport: T, settings: LinkSettings) -> Self {
        Self { transport, settings, toggle: false }
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Current state of the toggle bit.
    pub fn toggle_bit(&self) -> bool {
        self.toggle
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn control_byte(&self) -> u8 {
        if self.settings.toggle_control && self.toggle { CONTROL_TOGGLE } else { 0x00 }
    }

    /// Fills `buffer` from the transport, stopping early on a timeout.
    fn read_into(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError<T::Error>> {
        let mut filled = 0;
        while filled < buffer.len() {
            let read = self.transport.recv(&mut buffer[filled..]).map_err(TransportError::Channel)?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        Ok(filled)
    }

    fn reply(&mut self, byte: u8) -> Result<(), TransportError<T::Error>> {
        self.transport.send(&[byte]).map_err(TransportError::Channel)
    }

    /// Reads one frame. `Ok(None)` means the frame was missing or corrupt.
    fn read_frame(&mut self) -> Result<Option<Frame>, TransportError<T::Error>> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        if self.read_into(&mut header[..1])? == 0 {
            warn!("no frame received");
            return Ok(None);
        }
        if header[0] != FRAME_START {
            warn!("expected frame start 0xEE, got 0x{:02X}", header[0]);
            return Ok(None);
        }

        let read = self.read_into(&mut header[1..])?;
        if read < FRAME_HEADER_SIZE - 1 {
            warn!("truncated frame header ({} of {} bytes)", read + 1, FRAME_HEADER_SIZE);
            self.reply(NACK)?;
            return Ok(None);
        }

        let length = declared_length(&header)?;
        if length > MAX_PAYLOAD_SIZE {
            warn!("frame declares {} payload bytes, more than {}", length, MAX_PAYLOAD_SIZE);
            self.reply(NACK)?;
            return Ok(None);
        }

        let mut raw = vec![0u8; FRAME_HEADER_SIZE + length + FRAME_CRC_SIZE];
        raw[..FRAME_HEADER_SIZE].copy_from_slice(&header);
        let read = self.read_into(&mut raw[FRAME_HEADER_SIZE..])?;
        if read < length + FRAME_CRC_SIZE {
            warn!("truncated frame body ({} of {} bytes)", read, length + FRAME_CRC_SIZE);
            self.reply(NACK)?;
            return Ok(None);
        }

        match Frame::decode(&raw) {
            Ok((frame, _)) => {
                debug!("received frame: {:02X?}", raw);
                self.reply(ACK)?;
                Ok(Some(frame))
            }
            Err(err) => {
                warn!("discarding frame: {}", err);
                self.reply(NACK)?;
                Ok(None)
            }
        }
    }
}

impl<T: Transport> Link for SerialLink<T> {
    type Error = T::Error;

    /// Sends one frame and waits for its acknowledgement.
    ///
    /// NACKs, silence and stray bytes all count against the same attempt
    /// budget; the toggle bit only flips once the frame is acknowledged.
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError<Self::Error>> {
        let frame = Frame::build(self.settings.identity, self.control_byte(), 0, payload)?;
        let attempts = self.settings.max_attempts;

        for attempt in 1..=attempts {
            debug!("sending frame (attempt {}/{}): {:02X?}", attempt, attempts, frame);
            self.transport.send(&frame).map_err(TransportError::Channel)?;

            let mut reply = [0u8; 1];
            match (self.read_into(&mut reply)?, reply[0]) {
                (0, _) => warn!("no acknowledgement received"),
                (_, ACK) => {
                    if self.settings.toggle_control {
                        self.toggle = !self.toggle;
                    }
                    return Ok(());
                }
                (_, NACK) => warn!("frame rejected with NACK"),
                (_, other) => warn!("unexpected reply byte 0x{:02X}", other),
            }

            if attempt < attempts {
                thread::sleep(self.settings.retry_delay);
            }
        }

        error!("frame not acknowledged after {} attempts", attempts);
        Err(TransportError::SendFailed { attempts })
    }

    /// Receives frames until one with sequence number 0 completes the payload.
    ///
    /// Every valid frame is ACKed and refills the attempt budget; corrupt or
    /// truncated frames are NACKed and consume one attempt.
    fn recv(&mut self) -> Result<Vec<u8>, TransportError<Self::Error>> {
        let attempts = self.settings.max_attempts;
        let mut remaining = attempts;
        let mut payload = Vec::new();

        while remaining > 0 {
            match self.read_frame()? {
                Some(frame) => {
                    payload.extend_from_slice(&frame.payload);
                    if frame.sequence == 0 {
                        return Ok(payload);
                    }
                    debug!("{} more frame(s) to follow", frame.sequence);
                    remaining = attempts;
                }
                None => remaining -= 1,
            }
        }

        error!("no valid frame received after {} attempts", attempts);
        Err(TransportError::RecvFailed { attempts })
    }

    fn reset(&mut self) {
        self.toggle = false;
    }

    fn clear(&mut self) -> Result<(), TransportError<Self::Error>> {
        self.transport.clear().map_err(TransportError::Channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use std::collections::VecDeque;

    /// In-memory channel: `recv` serves queued chunks, an empty chunk is a
    /// read timeout.
    #[derive(Debug)]
    struct MockTransport {
        sent_data: RefCell<Vec<Vec<u8>>>,
        response_queue: RefCell<VecDeque<Vec<u8>>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self { sent_data: RefCell::new(Vec::new()), response_queue: RefCell::new(VecDeque::new()) }
        }

        fn push_response(&self, data: Vec<u8>) {
            self.response_queue.borrow_mut().push_back(data);
        }

        fn push_timeout(&self) {
            self.response_queue.borrow_mut().push_back(Vec::new());
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent_data.borrow().clone()
        }
    }

    impl Transport for MockTransport {
        type Error = ();

        fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
            self.sent_data.borrow_mut().push(data.to_vec());
            Ok(())
        }

        fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
            let mut queue = self.response_queue.borrow_mut();
            let Some(front) = queue.front_mut() else {
                return Ok(0);
            };
            let len = core::cmp::min(buffer.len(), front.len());
            buffer[..len].copy_from_slice(&front[..len]);
            front.drain(..len);
            if front.is_empty() {
                queue.pop_front();
            }
            Ok(len)
        }
    }

    fn fast_settings() -> LinkSettings {
        LinkSettings { retry_delay: Duration::ZERO, ..LinkSettings::default() }
    }

    fn link() -> SerialLink<MockTransport> {
        SerialLink::with_settings(MockTransport::new(), fast_settings())
    }

    fn response_frame(sequence: u8, payload: &[u8]) -> Vec<u8> {
        Frame::build(0x00, 0x00, sequence, payload).unwrap()
    }

    #[test]
    fn test_logon_frame_bytes() {
        let mut link = link();
        link.transport().push_response(vec![ACK]);

        let payload = [0x50, 0x00, 0x01, 0x41, 0x64, 0x6D, 0x69, 0x6E, 0x20, 0x20, 0x20, 0x20, 0x20];
        link.send(&payload).unwrap();

        let mut expected = vec![0xEE, 0x00, 0x00, 0x00, 0x00, 0x0D];
        expected.extend_from_slice(&payload);
        expected.extend_from_slice(&[0x9F, 0xC9]);
        assert_eq!(link.transport().sent(), vec![expected]);
    }

    #[test]
    fn test_toggle_alternates_on_ack() {
        let mut link = link();
        for _ in 0..3 {
            link.transport().push_response(vec![ACK]);
        }

        link.send(&[0x20]).unwrap();
        link.send(&[0x20]).unwrap();
        link.send(&[0x20]).unwrap();

        let controls: Vec<u8> = link.transport().sent().iter().map(|frame| frame[2]).collect();
        assert_eq!(controls, vec![0x00, 0x20, 0x00]);
        assert!(link.toggle_bit());
    }

    #[test]
    fn test_toggle_unaffected_by_retries() {
        let mut link = link();
        link.transport().push_response(vec![NACK]);
        link.transport().push_timeout();
        link.transport().push_response(vec![ACK]);
        link.transport().push_response(vec![ACK]);

        link.send(&[0x20]).unwrap();
        link.send(&[0x20]).unwrap();

        let controls: Vec<u8> = link.transport().sent().iter().map(|frame| frame[2]).collect();
        assert_eq!(controls, vec![0x00, 0x00, 0x00, 0x20]);
    }

    #[test]
    fn test_toggle_disabled() {
        let settings = LinkSettings { toggle_control: false, ..fast_settings() };
        let mut link = SerialLink::with_settings(MockTransport::new(), settings);
        link.transport().push_response(vec![ACK]);
        link.transport().push_response(vec![ACK]);

        link.send(&[0x20]).unwrap();
        link.send(&[0x20]).unwrap();

        let controls: Vec<u8> = link.transport().sent().iter().map(|frame| frame[2]).collect();
        assert_eq!(controls, vec![0x00, 0x00]);
        assert!(!link.toggle_bit());
    }

    #[test]
    fn test_send_fails_after_three_attempts() {
        let mut link = link();
        link.transport().push_response(vec![NACK]);
        link.transport().push_response(vec![0x42]);
        link.transport().push_timeout();

        let result = link.send(&[0x20]);
        assert!(matches!(result, Err(TransportError::SendFailed { attempts: 3 })));
        assert_eq!(link.transport().sent().len(), 3);
        assert!(!link.toggle_bit());
    }

    #[test]
    fn test_send_rejects_oversized_payload() {
        let mut link = link();
        let result = link.send(&vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(result, Err(TransportError::Frame(_))));
        assert!(link.transport().sent().is_empty());
    }

    #[test]
    fn test_recv_single_frame() {
        let mut link = link();
        link.transport().push_response(response_frame(0, &[0x00, 0x01, 0x02]));

        assert_eq!(link.recv().unwrap(), vec![0x00, 0x01, 0x02]);
        assert_eq!(link.transport().sent(), vec![vec![ACK]]);
    }

    #[test]
    fn test_recv_reassembles_multiple_frames() {
        let mut link = link();
        link.transport().push_response(response_frame(2, &[0x00, 0x01]));
        link.transport().push_response(response_frame(1, &[0x02, 0x03]));
        link.transport().push_response(response_frame(0, &[0x04]));

        assert_eq!(link.recv().unwrap(), vec![0x00, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(link.transport().sent(), vec![vec![ACK], vec![ACK], vec![ACK]]);
    }

    #[test]
    fn test_recv_nacks_corrupted_frames() {
        let mut link = link();
        for _ in 0..3 {
            let mut frame = response_frame(0, &[0x00, 0x01]);
            let last = frame.len() - 1;
            frame[last] ^= 0xFF;
            link.transport().push_response(frame);
        }

        let result = link.recv();
        assert!(matches!(result, Err(TransportError::RecvFailed { attempts: 3 })));
        assert_eq!(link.transport().sent(), vec![vec![NACK], vec![NACK], vec![NACK]]);
    }

    #[test]
    fn test_recv_recovers_after_corruption() {
        let mut link = link();
        let mut corrupted = response_frame(0, &[0x00, 0x07]);
        corrupted[6] ^= 0x01;
        link.transport().push_response(corrupted);
        link.transport().push_response(response_frame(0, &[0x00, 0x07]));

        assert_eq!(link.recv().unwrap(), vec![0x00, 0x07]);
        assert_eq!(link.transport().sent(), vec![vec![NACK], vec![ACK]]);
    }

    #[test]
    fn test_recv_bad_start_consumes_attempts() {
        let mut link = link();
        link.transport().push_response(vec![0x55, 0x55, 0x55]);

        let result = link.recv();
        assert!(matches!(result, Err(TransportError::RecvFailed { .. })));
        assert!(link.transport().sent().is_empty());
    }

    #[test]
    fn test_recv_truncated_body_is_nacked() {
        let mut link = link();
        let frame = response_frame(0, &[0x00, 0x01, 0x02, 0x03]);
        link.transport().push_response(frame[..frame.len() - 3].to_vec());

        let result = link.recv();
        assert!(matches!(result, Err(TransportError::RecvFailed { .. })));
        assert_eq!(link.transport().sent()[0], vec![NACK]);
    }

    #[test]
    fn test_reset_clears_toggle() {
        let mut link = link();
        link.transport().push_response(vec![ACK]);
        link.send(&[0x20]).unwrap();
        assert!(link.toggle_bit());

        link.reset();
        assert!(!link.toggle_bit());
    }
}
