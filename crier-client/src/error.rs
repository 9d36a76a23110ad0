use crier_proto::Status;
use std::fmt;

/// Errors that can occur during client operations
#[derive(Debug)]
pub enum ClientError {
    /// Failed to establish a connection to the server
    ConnectionFailed(std::io::Error),
    /// Connection was closed by the server
    ConnectionClosed,
    /// I/O error during communication
    Io(std::io::Error),
    /// Protocol-level error (malformed record, bad payload)
    Protocol(String),
    /// Received a record of an unexpected type
    UnexpectedRecord(String),
    /// Operation timed out
    Timeout,
    /// The server refused the operation with a status code
    Server(Status),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            Self::ConnectionClosed => write!(f, "Connection closed by server"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Self::UnexpectedRecord(msg) => write!(f, "Unexpected record: {}", msg),
            Self::Timeout => write!(f, "Operation timed out"),
            Self::Server(status) => write!(f, "Server refused: {}", status),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConnectionFailed(e) | Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed
        } else {
            Self::Io(err)
        }
    }
}

impl From<crier_proto::ProtoError> for ClientError {
    fn from(err: crier_proto::ProtoError) -> Self {
        match err {
            crier_proto::ProtoError::Io(e) => Self::from(e),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl ClientError {
    /// The status the server answered with, if this error carries one.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Server(status) => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
