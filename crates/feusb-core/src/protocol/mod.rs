//! USB-CDC Command/Reply Protocol
//!
//! Commands are upper-case ASCII terminated by a carriage return. Replies
//! are CR LF terminated records of whitespace separated numbers, possibly
//! spanning several LF separated lines.

pub mod command;
mod config;
mod error;
pub mod framer;
pub mod reply;
pub mod serial;
mod session;
mod state;
mod transport;

pub use command::{format_command, CommandBatch};
pub use config::{PollPolicy, SessionConfig, Sleeper, ThreadSleeper};
pub use error::{ErrorKind, ProtocolError};
pub use framer::ReplyBuffer;
pub use reply::{parse_line, parse_record, BatchReply, CommandReply, Number, ParsedValue};
pub use serial::{list_ports, PortInfo, SerialConnector, SerialTransport};
pub use session::Session;
pub use state::PortState;
pub use transport::{Connector, LinkFault, Transport, PROBE_BYTE};

/// Terminator ending every reply record
pub const RECORD_TERMINATOR: &[u8] = b"\r\n";

/// Rate handed to the OS when opening a port. CDC devices ignore it.
pub const NOMINAL_BAUD_RATE: u32 = 115200;

/// Default bound on a single OS read or write, in milliseconds
pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 1000;

/// Pause between writing a command and polling for its reply
pub const DEFAULT_SETTLE_MS: u64 = 1;

/// Pause between reply polls
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1;

/// Polls without progress before a read times out
pub const DEFAULT_RETRY_LIMIT: u32 = 20;

/// Pause between polls while the port is suspended
pub const DEFAULT_SUSPEND_INTERVAL_MS: u64 = 1000;
