use crate::domain::traceback::{ExceptionKind, RemoteError};
use crate::domain::session_log::SessionLog;
use thiserror::Error;

/// ReplBoard unified error type
#[derive(Error, Debug)]
pub enum BoardError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Failed to access {device} after {attempts} attempt(s): {message}")]
    Connect {
        device: String,
        attempts: u32,
        message: String,
    },

    #[error("Transport {operation} error: {source}")]
    Transport {
        operation: &'static str,
        session: SessionLog,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout waiting for {expected} ({buffered} bytes buffered)")]
    Timeout {
        expected: String,
        buffered: usize,
        session: SessionLog,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String, session: SessionLog },

    #[error("Remote error: {0}")]
    Remote(Box<RemoteError>),

    #[error("{kind}: {}", .message.as_deref().unwrap_or(""))]
    Exception {
        kind: ExceptionKind,
        message: Option<String>,
        #[source]
        remote: Box<RemoteError>,
    },

    #[error("Device is running in safe mode")]
    DegradedDevice { session: SessionLog },

    #[error("Device not connected")]
    NotConnected,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output error: {0}")]
    Output(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BoardError {
    /// Session log captured when the error was raised, if the variant has one.
    pub fn session(&self) -> Option<&SessionLog> {
        match self {
            BoardError::Transport { session, .. }
            | BoardError::Timeout { session, .. }
            | BoardError::Protocol { session, .. }
            | BoardError::DegradedDevice { session } => Some(session),
            BoardError::Remote(remote) | BoardError::Exception { remote, .. } => {
                Some(remote.session())
            }
            _ => None,
        }
    }

    /// The structured remote failure behind a `Remote` or `Exception` error.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            BoardError::Remote(remote) | BoardError::Exception { remote, .. } => Some(remote),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BoardError::Timeout { .. })
    }
}

pub type BoardResult<T> = Result<T, BoardError>;
