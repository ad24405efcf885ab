use std::fmt;
use std::io;
use std::net::AddrParseError;
use std::sync::mpsc::SendError;
use std::sync::PoisonError;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug)]
pub enum ServerError {
    Io(io::Error),
    Json(serde_json::Error),
    AddrParse(AddrParseError),
    ArgumentError(String),
    ClientConnection(String),
    ProtocolViolation(String),
    ChannelSend(String),
    PoisonedLock,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Io(err) => write!(f, "I/O error: {}", err),
            ServerError::Json(err) => write!(f, "JSON error: {}", err),
            ServerError::AddrParse(err) => write!(f, "address parse error: {}", err),
            ServerError::ArgumentError(msg) => write!(f, "argument error: {}", msg),
            ServerError::ClientConnection(msg) => write!(f, "client connection error: {}", msg),
            ServerError::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            ServerError::ChannelSend(msg) => write!(f, "channel send error: {}", msg),
            ServerError::PoisonedLock => write!(f, "poisoned lock error"),
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> Self {
        ServerError::Io(err)
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Json(err)
    }
}

impl From<AddrParseError> for ServerError {
    fn from(err: AddrParseError) -> Self {
        ServerError::AddrParse(err)
    }
}

impl<T> From<SendError<T>> for ServerError {
    fn from(err: SendError<T>) -> Self {
        ServerError::ChannelSend(err.to_string())
    }
}

impl<T> From<PoisonError<T>> for ServerError {
    fn from(_: PoisonError<T>) -> Self {
        ServerError::PoisonedLock
    }
}
