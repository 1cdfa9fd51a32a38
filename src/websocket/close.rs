use std::fmt;

use crate::websocket::Role;
use crate::{Error, Result};

/// Longest close reason that fits in a control frame next to the code.
pub const MAX_REASON_LENGTH: usize = 123;

/// Status codes carried by close frames (RFC6455 §7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: the purpose of the connection has been fulfilled.
    Normal,
    /// 1001: the endpoint is going away.
    Away,
    /// 1002: protocol error.
    ProtocolError,
    /// 1003: received a kind of data that cannot be accepted.
    UnsupportedData,
    /// 1004: reserved.
    Undefined,
    /// 1005: no status code was present. Never sent.
    NoStatus,
    /// 1006: the connection dropped without a close frame. Never sent.
    Abnormal,
    /// 1007: message data did not match the message type.
    InvalidData,
    /// 1008: policy violation.
    PolicyViolation,
    /// 1009: message too big to process.
    TooBig,
    /// 1010: the server did not negotiate a required extension. Client only.
    MandatoryExtension,
    /// 1011: the server hit an unexpected condition. Server only.
    ServerError,
    /// 1015: TLS handshake failure. Never sent.
    TlsHandshakeFailure,
    /// Any other code, such as the 3000-4999 application range.
    Other(u16),
}

impl CloseCode {
    /// Codes that only describe a local condition and must never go on the wire.
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            CloseCode::NoStatus | CloseCode::Abnormal | CloseCode::TlsHandshakeFailure
        )
    }

    /// Whether a peer may legitimately send this code in a close frame.
    pub fn is_allowed_on_wire(self) -> bool {
        match u16::from(self) {
            1005 | 1006 | 1015 => false,
            1000..=1011 => self != CloseCode::Undefined,
            3000..=4999 => true,
            _ => false,
        }
    }

    /// Check that `reason` may accompany this code when sent by `role`.
    pub fn check_send(self, reason: &str, role: Role) -> Result<()> {
        if self.is_reserved() {
            return Err(Error::InvalidArgument(format!(
                "close code {} is never sent",
                self
            )));
        }
        if reason.len() > MAX_REASON_LENGTH {
            return Err(Error::InvalidArgument(format!(
                "close reason is {} bytes, at most {} are allowed",
                reason.len(),
                MAX_REASON_LENGTH
            )));
        }
        match (self, role) {
            (CloseCode::MandatoryExtension, Role::Server) => Err(Error::InvalidArgument(
                "mandatory extension can only be sent by a client".into(),
            )),
            (CloseCode::ServerError, Role::Client) => Err(Error::InvalidArgument(
                "server error can only be sent by a server".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1004 => CloseCode::Undefined,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidData,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::TooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::ServerError,
            1015 => CloseCode::TlsHandshakeFailure,
            other => CloseCode::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::Undefined => 1004,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidData => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::TooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::ServerError => 1011,
            CloseCode::TlsHandshakeFailure => 1015,
            CloseCode::Other(code) => code,
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_round_trip() {
        for code in [1000u16, 1001, 1002, 1007, 1009, 1011, 3000, 4999] {
            assert_eq!(u16::from(CloseCode::from(code)), code);
        }
        assert_eq!(CloseCode::from(1011), CloseCode::ServerError);
    }

    #[test]
    fn reserved_codes_stay_local() {
        assert!(CloseCode::NoStatus.is_reserved());
        assert!(CloseCode::Abnormal.is_reserved());
        assert!(CloseCode::TlsHandshakeFailure.is_reserved());
        assert!(!CloseCode::Normal.is_reserved());
        assert!(!CloseCode::Abnormal.is_allowed_on_wire());
        assert!(!CloseCode::Other(1016).is_allowed_on_wire());
        assert!(CloseCode::Other(4000).is_allowed_on_wire());
    }

    #[test]
    fn role_restrictions() {
        assert!(CloseCode::MandatoryExtension
            .check_send("", Role::Server)
            .is_err());
        assert!(CloseCode::MandatoryExtension
            .check_send("", Role::Client)
            .is_ok());
        assert!(CloseCode::ServerError.check_send("", Role::Client).is_err());
        assert!(CloseCode::ServerError.check_send("", Role::Server).is_ok());
        assert!(CloseCode::NoStatus.check_send("", Role::Client).is_err());
        assert!(CloseCode::Abnormal.check_send("", Role::Server).is_err());
        assert!(CloseCode::TlsHandshakeFailure
            .check_send("", Role::Client)
            .is_err());
        assert!(CloseCode::Normal
            .check_send(&"x".repeat(124), Role::Client)
            .is_err());
        assert!(CloseCode::Normal
            .check_send(&"x".repeat(123), Role::Client)
            .is_ok());
    }
}
