//! Protocol errors

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to a device
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The port could not be opened
    #[error("Unable to open port {port}: {reason}")]
    OpenFailed {
        /// Port name
        port: String,
        /// OS or driver message
        reason: String,
    },

    /// Reconnect was requested on a port that is still usable
    #[error("Port {0} is not disconnected")]
    NotDisconnected(String),

    /// The link is suspended and error-on-suspend is enabled
    #[error("Port {0} is suspended")]
    Suspended(String),

    /// The handle is gone; only a reconnect helps
    #[error("Port {0} is disconnected")]
    Disconnected(String),

    /// The device stopped making progress although the port is alive
    #[error("Read on port {port} took more than {per_reply:?} per reply")]
    Timeout {
        /// Port name
        port: String,
        /// Stall budget for a single reply
        per_reply: Duration,
    },

    /// The transport delivered fewer bytes than it reported pending
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Bytes reported pending
        expected: usize,
        /// Bytes actually read
        actual: usize,
    },

    /// More records were taken than are buffered
    #[error("Requested {requested} records but only {available} are buffered")]
    InsufficientRecords {
        /// Records asked for
        requested: usize,
        /// Complete records in the buffer
        available: usize,
    },

    /// A numeric-looking token failed to parse
    #[error("Invalid numeric token in reply: '{token}'")]
    InvalidReply {
        /// The offending token
        token: String,
    },

    /// Any other internal inconsistency
    #[error("Protocol fault: {0}")]
    ProtocolFault(String),
}

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The port could not be (re)opened. Retrying the open may succeed.
    OpenFailure,
    /// The transport is temporarily stalled.
    Suspended,
    /// The handle is gone and must be reopened.
    Disconnected,
    /// The device is present but did not answer within the retry ceiling.
    Timeout,
    /// Internal inconsistency. Never retried.
    ProtocolFault,
}

impl ProtocolError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::OpenFailed { .. } | ProtocolError::NotDisconnected(_) => {
                ErrorKind::OpenFailure
            }
            ProtocolError::Suspended(_) => ErrorKind::Suspended,
            ProtocolError::Disconnected(_) => ErrorKind::Disconnected,
            ProtocolError::Timeout { .. } => ErrorKind::Timeout,
            ProtocolError::ShortRead { .. }
            | ProtocolError::InsufficientRecords { .. }
            | ProtocolError::InvalidReply { .. }
            | ProtocolError::ProtocolFault(_) => ErrorKind::ProtocolFault,
        }
    }

    /// Whether retrying at some layer can clear this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::OpenFailure | ErrorKind::Suspended | ErrorKind::Disconnected
        )
    }
}
