//! Session control: identify, negotiate, logon/security, logoff, wait and
//! terminate.

use core::fmt;

use log::{info, warn};

use crate::client::{
    C1218Client, ClientError, Endianness, GENERAL_CONFIG_TABLE, SessionPhase, TableError,
};
use crate::link::Link;
use crate::request::Request;
use crate::response::{
    IdentifyResponse, NegotiateResponse, ResponseCode, ResponseError, split_status,
};

/// Session-level failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The device answered a session service with a non-zero status.
    Rejected { service: &'static str, code: u8 },
    /// The device sent an empty response.
    EmptyResponse { service: &'static str },
    /// The response body could not be decoded.
    Malformed { service: &'static str },
    /// The operation needs a negotiated session; call `start` first.
    NotInitialized,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { service, code } => write!(
                f,
                "{} rejected with status 0x{:02X} ({})",
                service,
                code,
                ResponseCode::describe(*code)
            ),
            Self::EmptyResponse { service } => write!(f, "empty {} response", service),
            Self::Malformed { service } => write!(f, "malformed {} response", service),
            Self::NotInitialized => write!(f, "session not initialized"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Result of [`C1218Client::login`]. A rejection is a normal outcome, not an
/// error: the session stays negotiated and the caller may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    LoggedIn,
    /// Logon refused, with the device's status code.
    UserRejected(u8),
    /// Security (password) refused, with the device's status code.
    PasswordRejected(u8),
}

impl LoginOutcome {
    pub fn is_logged_in(self) -> bool {
        self == LoginOutcome::LoggedIn
    }
}

impl<L: Link> C1218Client<L> {
    /// Sends a session request and returns the body of an `ok` response.
    fn session_request(&mut self, request: &Request) -> Result<Vec<u8>, ClientError<L::Error>> {
        let service = request.name();
        let response = self.exchange(request)?;
        let (status, body) = split_status(&response)
            .map_err(|_| SessionError::EmptyResponse { service })?;
        if status != ResponseCode::Ok as u8 {
            warn!("{} rejected: {}", service, ResponseCode::describe(status));
            return Err(SessionError::Rejected { service, code: status }.into());
        }
        Ok(body.to_vec())
    }

    /// Sends a logon or security request. `Ok(None)` means accepted.
    fn credential_request(&mut self, request: &Request) -> Result<Option<u8>, ClientError<L::Error>> {
        let service = request.name();
        let response = self.exchange(request)?;
        let (status, _) = split_status(&response)
            .map_err(|_| SessionError::EmptyResponse { service })?;
        if status != ResponseCode::Ok as u8 {
            warn!("{} rejected: {}", service, ResponseCode::describe(status));
            return Ok(Some(status));
        }
        Ok(None)
    }

    fn identify_and_negotiate(&mut self) -> Result<(), ClientError<L::Error>> {
        let body = self.session_request(&Request::Identify)?;
        let (_, identify) = IdentifyResponse::parse(&body)
            .map_err(|_| SessionError::Malformed { service: "identify" })?;
        info!(
            "device identified: standard {} version {}.{}",
            identify.standard, identify.version, identify.revision
        );
        self.state.identify = Some(identify);
        self.state.phase = SessionPhase::Identified;

        let request = Request::negotiate(
            self.settings.packet_size,
            self.settings.packet_count,
            &self.settings.baud_rates,
        )?;
        let body = self.session_request(&request)?;
        let (_, negotiate) = NegotiateResponse::parse(&body)
            .map_err(|_| SessionError::Malformed { service: "negotiate" })?;
        info!(
            "negotiated packet size {} x {}, baud rate {:?}",
            negotiate.packet_size, negotiate.packet_count, negotiate.baud_rate
        );
        self.state.negotiate = Some(negotiate);
        self.state.phase = SessionPhase::Negotiated;
        Ok(())
    }

    /// Opens a session: identify, then negotiate.
    ///
    /// If the device rejects either service a forced terminate is sent before
    /// the error is returned. Link failures are returned as they are.
    pub fn start(&mut self) -> Result<(), ClientError<L::Error>> {
        self.link.clear()?;

        match self.identify_and_negotiate() {
            Err(ClientError::Session(err)) => {
                warn!("session start failed ({}), terminating", err);
                if self.stop(true).is_err() {
                    warn!("terminate after failed start was not acknowledged");
                }
                Err(err.into())
            }
            result => result,
        }
    }

    /// Logs on with `username` and `user_id`, then sends `password` if given.
    ///
    /// Arguments are validated before anything is sent.
    pub fn login(
        &mut self,
        username: impl AsRef<[u8]>,
        user_id: u16,
        password: Option<&[u8]>,
    ) -> Result<LoginOutcome, ClientError<L::Error>> {
        let logon = Request::logon(username, user_id)?;
        let security = password.map(Request::security).transpose()?;

        if !self.state.is_initialized() {
            return Err(SessionError::NotInitialized.into());
        }

        if let Some(code) = self.credential_request(&logon)? {
            return Ok(LoginOutcome::UserRejected(code));
        }
        if let Some(security) = security {
            if let Some(code) = self.credential_request(&security)? {
                return Ok(LoginOutcome::PasswordRejected(code));
            }
        }

        info!("logged on as user id {}", user_id);
        self.state.phase = SessionPhase::LoggedIn;
        Ok(LoginOutcome::LoggedIn)
    }

    /// Logs off, keeping the negotiated session open.
    pub fn logoff(&mut self) -> Result<(), ClientError<L::Error>> {
        self.session_request(&Request::Logoff)?;
        if self.state.is_logged_in() {
            self.state.phase = SessionPhase::Negotiated;
        }
        Ok(())
    }

    /// Asks the device to hold the session open for `seconds`.
    pub fn wait(&mut self, seconds: u8) -> Result<(), ClientError<L::Error>> {
        self.session_request(&Request::Wait { seconds })?;
        Ok(())
    }

    /// Terminates the session.
    ///
    /// The session state and the link toggle bit are reset when the device
    /// acknowledges, or unconditionally when `force` is set. Errors are still
    /// returned in the forced case.
    pub fn stop(&mut self, force: bool) -> Result<(), ClientError<L::Error>> {
        let result = self.session_request(&Request::Terminate);

        if result.is_ok() || force {
            self.state.phase = SessionPhase::Terminated;
            self.link.reset();
            info!("session terminated");
        }

        result.map(|_| ())
    }

    /// Reads the data-order flag from table 0 and adopts it for this session.
    pub fn detect_data_order(&mut self) -> Result<Endianness, ClientError<L::Error>> {
        let config = self.read_table(GENERAL_CONFIG_TABLE, None, None)?;
        let Some(&format_control) = config.first() else {
            return Err(TableError::Malformed {
                table_id: GENERAL_CONFIG_TABLE,
                error: ResponseError::TooShort(0),
            }
            .into());
        };

        let endianness =
            if format_control & 0x01 != 0 { Endianness::Big } else { Endianness::Little };
        info!("device data order: {:?}", endianness);
        self.state.endianness = endianness;
        Ok(endianness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientSettings;
    use crate::client::mock::SimulatedMeter;
    use crate::link::TransportError;
    use crate::request::{OPCODE_IDENTIFY, OPCODE_LOGON, OPCODE_NEGOTIATE, OPCODE_SECURITY};

    fn client(meter: SimulatedMeter) -> C1218Client<SimulatedMeter> {
        C1218Client::new(meter, ClientSettings::default())
    }

    #[test]
    fn test_start_identifies_and_negotiates() {
        let mut client = client(SimulatedMeter::new());
        client.start().unwrap();

        assert_eq!(client.state().phase, SessionPhase::Negotiated);
        assert!(client.state().is_initialized());
        assert_eq!(client.state().identify.as_ref().map(|id| id.version), Some(1));
        assert_eq!(client.state().negotiate.map(|n| n.packet_size), Some(512));
        assert_eq!(client.link().clears, 1);
        assert!(matches!(client.link().requests[0], Request::Identify));
        assert!(matches!(client.link().requests[1], Request::Negotiate { .. }));
    }

    #[test]
    fn test_start_rejected_identify_terminates() {
        let mut meter = SimulatedMeter::new();
        meter.statuses.insert(OPCODE_IDENTIFY, 0x01);
        let mut client = client(meter);

        let err = client.start().unwrap_err();
        assert!(matches!(
            err,
            ClientError::Session(SessionError::Rejected { service: "identify", code: 0x01 })
        ));
        assert!(matches!(client.link().requests.last(), Some(Request::Terminate)));
        assert!(!client.state().is_initialized());
        assert_eq!(client.link().resets, 1);
    }

    #[test]
    fn test_start_rejected_negotiate_terminates() {
        let mut meter = SimulatedMeter::new();
        meter.statuses.insert(OPCODE_NEGOTIATE + 1, 0x02);
        let mut client = client(meter);

        assert!(client.start().is_err());
        assert_eq!(client.link().requests.len(), 3);
        assert!(matches!(client.link().requests[2], Request::Terminate));
        assert_eq!(client.state().phase, SessionPhase::Terminated);
    }

    #[test]
    fn test_start_link_failure_skips_terminate() {
        let mut meter = SimulatedMeter::new();
        meter.fail_sends = true;
        let mut client = client(meter);

        let err = client.start().unwrap_err();
        assert!(matches!(err, ClientError::Transport(TransportError::SendFailed { .. })));
        assert!(client.link().requests.is_empty());
        assert_eq!(client.link().resets, 0);
    }

    #[test]
    fn test_login_requires_start() {
        let mut client = client(SimulatedMeter::new());
        let err = client.login("admin", 1, None).unwrap_err();
        assert!(matches!(err, ClientError::Session(SessionError::NotInitialized)));
        assert!(client.link().requests.is_empty());
    }

    #[test]
    fn test_login_validates_before_io() {
        let mut client = client(SimulatedMeter::new());
        client.start().unwrap();
        let sent = client.link().requests.len();

        let err = client.login("far-too-long-name", 1, None).unwrap_err();
        assert!(matches!(err, ClientError::Request(_)));
        let err = client.login("admin", 1, Some(&[0x41; 21])).unwrap_err();
        assert!(matches!(err, ClientError::Request(_)));
        assert_eq!(client.link().requests.len(), sent);
    }

    #[test]
    fn test_login_success() {
        let mut client = client(SimulatedMeter::new());
        client.start().unwrap();

        let outcome = client.login("admin", 2, Some(b"secret".as_slice())).unwrap();
        assert_eq!(outcome, LoginOutcome::LoggedIn);
        assert!(client.state().is_logged_in());
        assert_eq!(
            client.link().requests[2],
            Request::Logon { user_id: 2, username: b"admin".to_vec() }
        );
        assert_eq!(client.link().requests[3], Request::Security { password: b"secret".to_vec() });
    }

    #[test]
    fn test_login_without_password_skips_security() {
        let mut client = client(SimulatedMeter::new());
        client.start().unwrap();

        assert!(client.login("admin", 2, None).unwrap().is_logged_in());
        assert_eq!(client.link().requests.len(), 3);
    }

    #[test]
    fn test_login_rejections_are_outcomes() {
        let mut meter = SimulatedMeter::new();
        meter.statuses.insert(OPCODE_LOGON, 0x03);
        let mut user_rejected = client(meter);
        user_rejected.start().unwrap();
        assert_eq!(
            user_rejected.login("admin", 2, None).unwrap(),
            LoginOutcome::UserRejected(0x03)
        );
        assert!(!user_rejected.state().is_logged_in());
        assert!(user_rejected.state().is_initialized());

        let mut meter = SimulatedMeter::new();
        meter.statuses.insert(OPCODE_SECURITY, 0x03);
        let mut password_rejected = client(meter);
        password_rejected.start().unwrap();
        assert_eq!(
            password_rejected.login("admin", 2, Some(b"wrong".as_slice())).unwrap(),
            LoginOutcome::PasswordRejected(0x03)
        );
        assert!(!password_rejected.state().is_logged_in());
    }

    #[test]
    fn test_logoff_keeps_session() {
        let mut client = client(SimulatedMeter::new());
        client.start().unwrap();
        client.login("admin", 2, None).unwrap();

        client.logoff().unwrap();
        assert_eq!(client.state().phase, SessionPhase::Negotiated);
        assert!(client.state().is_initialized());
    }

    #[test]
    fn test_stop_resets_state_and_toggle() {
        let mut client = client(SimulatedMeter::new());
        client.start().unwrap();
        client.login("admin", 2, None).unwrap();

        client.stop(false).unwrap();
        assert_eq!(client.state().phase, SessionPhase::Terminated);
        assert!(!client.state().is_logged_in());
        assert_eq!(client.link().resets, 1);
    }

    #[test]
    fn test_stop_rejected_without_force_keeps_state() {
        let mut meter = SimulatedMeter::new();
        meter.statuses.insert(crate::request::OPCODE_TERMINATE, 0x06);
        let mut client = client(meter);
        client.start().unwrap();

        assert!(client.stop(false).is_err());
        assert!(client.state().is_initialized());
        assert_eq!(client.link().resets, 0);

        assert!(client.stop(true).is_err());
        assert!(!client.state().is_initialized());
        assert_eq!(client.link().resets, 1);
    }

    #[test]
    fn test_wait_service() {
        let mut client = client(SimulatedMeter::new());
        client.wait(30).unwrap();
        assert_eq!(client.link().requests, vec![Request::Wait { seconds: 30 }]);
    }

    #[test]
    fn test_detect_data_order() {
        let mut meter = SimulatedMeter::new();
        meter.tables.insert(GENERAL_CONFIG_TABLE, vec![0x01, 0x00, 0x00]);
        let mut client = client(meter);

        assert_eq!(client.detect_data_order().unwrap(), Endianness::Big);
        assert_eq!(client.state().endianness, Endianness::Big);
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::Rejected { service: "identify", code: 0x0A };
        assert_eq!(
            err.to_string(),
            "identify rejected with status 0x0A (invalid service sequence state)"
        );
    }
}
