use std::error::Error as StdError;
use std::fmt;
use std::io;

use http_types::StatusCode;

use crate::websocket::CloseCode;

/// A specialized `Result` for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while serving HTTP connections and WebSocket sessions.
#[derive(Debug)]
pub enum Error {
    /// The transport failed. Always fatal to the connection.
    Io(io::Error),
    /// The peer violated HTTP/1.x framing; `status` is what it should be told.
    Http {
        /// Status of the error response.
        status: StatusCode,
        /// Human readable cause.
        message: String,
    },
    /// The peer violated the WebSocket protocol; `code` goes in the close frame.
    WebSocket {
        /// Close code to send to the peer.
        code: CloseCode,
        /// Human readable cause, also used as close reason.
        message: String,
    },
    /// The server answered a client handshake with something unacceptable.
    Handshake(String),
    /// A listener prefix could not be parsed.
    InvalidPrefix(String),
    /// A listener prefix is already registered elsewhere.
    PrefixConflict(String),
    /// The operation is not valid in the current state.
    InvalidState(String),
    /// An argument was rejected before anything hit the wire.
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Error::Http {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Error::http(StatusCode::BadRequest, message)
    }

    pub(crate) fn websocket(code: CloseCode, message: impl Into<String>) -> Self {
        Error::WebSocket {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::websocket(CloseCode::ProtocolError, message)
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState(message.into())
    }

    /// The status an HTTP peer should receive for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Http { status, .. } => *status,
            Error::Io(_) => StatusCode::InternalServerError,
            _ => StatusCode::BadRequest,
        }
    }

    /// The close code a WebSocket peer should receive for this error.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::WebSocket { code, .. } => *code,
            _ => CloseCode::Abnormal,
        }
    }

    /// Wrap this error so it can travel through `AsyncRead` implementations.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            Error::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "transport error: {}", err),
            Error::Http { status, message } => write!(f, "{} ({})", message, u16::from(*status)),
            Error::WebSocket { code, message } => {
                write!(f, "{} (close code {})", message, u16::from(*code))
            }
            Error::Handshake(message) => write!(f, "handshake failed: {}", message),
            Error::InvalidPrefix(prefix) => write!(f, "invalid prefix: {}", prefix),
            Error::PrefixConflict(prefix) => write!(f, "prefix already in use: {}", prefix),
            Error::InvalidState(message) => write!(f, "invalid state: {}", message),
            Error::InvalidArgument(message) => write!(f, "invalid argument: {}", message),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let wrapped = err
            .get_ref()
            .map_or(false, |inner| inner.is::<Error>());
        if !wrapped {
            return Error::Io(err);
        }

        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(inner)) => Error::Io(io::Error::new(kind, inner)),
            None => Error::Io(io::Error::from(kind)),
        }
    }
}
