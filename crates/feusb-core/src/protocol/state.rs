//! Port state machine
//!
//! Every transport outcome moves the port into a state:
//! success → `Connected`, a suspend → `Suspended`, a lost handle →
//! `Disconnected`. Only a successful reconnect leaves `Disconnected`.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::transport::LinkFault;
use super::ProtocolError;

/// Port status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortState {
    /// Normal operation
    Connected,
    /// The link is temporarily unable to move bytes
    Suspended,
    /// The handle is invalid and must be reopened
    Disconnected,
}

impl PortState {
    /// Record the outcome of a transport call and pass it through.
    ///
    /// A `Disconnected` state is sticky: stray successes cannot revive it.
    pub fn observe<T>(&mut self, outcome: Result<T, LinkFault>) -> Result<T, LinkFault> {
        let next = match &outcome {
            Ok(_) => PortState::Connected,
            Err(LinkFault::Suspended) => PortState::Suspended,
            Err(LinkFault::Disconnected) => PortState::Disconnected,
        };
        if *self != PortState::Disconnected {
            *self = next;
        }
        outcome
    }

    /// Refuse I/O on a disconnected port
    pub fn ensure_usable(&self, port: &str) -> Result<(), ProtocolError> {
        match self {
            PortState::Disconnected => Err(ProtocolError::Disconnected(port.to_string())),
            _ => Ok(()),
        }
    }

    /// Only a disconnected port may be reopened
    pub fn ensure_reconnectable(&self, port: &str) -> Result<(), ProtocolError> {
        match self {
            PortState::Disconnected => Ok(()),
            _ => Err(ProtocolError::NotDisconnected(port.to_string())),
        }
    }

    /// Leave `Disconnected` after a successful reopen
    pub fn reopened(&mut self) {
        *self = PortState::Connected;
    }

    /// True when I/O is currently possible
    pub fn is_connected(&self) -> bool {
        *self == PortState::Connected
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortState::Connected => "PORT_OK",
            PortState::Suspended => "SUSPENDED",
            PortState::Disconnected => "DISCONNECTED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let mut state = PortState::Connected;
        assert_eq!(state.observe::<()>(Err(LinkFault::Suspended)), Err(LinkFault::Suspended));
        assert_eq!(state, PortState::Suspended);

        assert_eq!(state.observe(Ok(3)), Ok(3));
        assert_eq!(state, PortState::Connected);

        let _ = state.observe::<()>(Err(LinkFault::Disconnected));
        assert_eq!(state, PortState::Disconnected);
    }

    #[test]
    fn test_disconnected_is_sticky() {
        let mut state = PortState::Disconnected;
        let _ = state.observe(Ok(()));
        assert_eq!(state, PortState::Disconnected);
        assert!(state.ensure_usable("COM3").is_err());

        state.reopened();
        assert!(state.is_connected());
        assert!(state.ensure_usable("COM3").is_ok());
    }

    #[test]
    fn test_reconnect_guard() {
        assert!(PortState::Disconnected.ensure_reconnectable("p").is_ok());
        assert!(matches!(
            PortState::Suspended.ensure_reconnectable("p"),
            Err(ProtocolError::NotDisconnected(_))
        ));
    }
}
