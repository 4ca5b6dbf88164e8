//! Transport abstraction
//!
//! A [`Transport`] is an open byte channel to one device. A [`Connector`]
//! knows how to open (and reopen) that channel by port name. The session
//! never touches an OS handle directly, so serial ports, simulated devices
//! and test doubles are interchangeable.

use std::fmt;

use super::ProtocolError;

/// Byte written by [`Transport::probe`] implementations. The device ignores it.
pub const PROBE_BYTE: u8 = 0x07;

/// Link-level failure reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFault {
    /// The link cannot move bytes right now but the handle is still valid
    Suspended,
    /// The handle is permanently invalid and must be reopened
    Disconnected,
}

impl fmt::Display for LinkFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkFault::Suspended => write!(f, "suspended"),
            LinkFault::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// An open, exclusively owned byte channel
pub trait Transport: Send {
    /// Write all of `data`
    fn write_raw(&mut self, data: &[u8]) -> Result<(), LinkFault>;

    /// Number of bytes that can be read without blocking
    fn bytes_pending(&mut self) -> Result<usize, LinkFault>;

    /// Read up to `count` bytes that were previously reported pending.
    ///
    /// Returning fewer bytes than requested is treated by the session as a
    /// protocol fault.
    fn read_raw(&mut self, count: usize) -> Result<Vec<u8>, LinkFault>;

    /// Test liveness without sending a real command
    fn probe(&mut self) -> Result<(), LinkFault>;

    /// Release the handle. Must tolerate being called more than once.
    fn close(&mut self);
}

/// Opens transports by port name
pub trait Connector: Send {
    /// Open a fresh handle to `port`
    fn open(&mut self, port: &str) -> Result<Box<dyn Transport>, ProtocolError>;
}
