//! # feusb Core Library
//!
//! Driver for USB-CDC motion controllers that speak a line-oriented ASCII
//! command/reply protocol.
//!
//! This library provides:
//! - Reply framing and numeric reply parsing
//! - A blocking command/reply session with suspend and disconnect tracking
//! - Automatic reconnection after the device is unplugged
//! - A `serialport` transport and a simulated device for testing
//!
//! ## Example
//!
//! ```rust,no_run
//! use feusb_core::protocol::{Session, SessionConfig};
//! use feusb_core::recovery::RobustSession;
//!
//! let session = Session::open_serial(SessionConfig::new("/dev/ttyACM0"))?;
//! let mut rcs = RobustSession::with_defaults(session);
//!
//! // Disable servos, then read the identity, servo and analog reports
//! if let Some(reply) = rcs.read(Some("C A0 U S M"), 3)?.completed() {
//!     println!("{}", serde_json::to_string(&reply).unwrap_or_default());
//! }
//! # Ok::<(), feusb_core::protocol::ProtocolError>(())
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod protocol;
pub mod recovery;
pub mod sim;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        BatchReply, CommandBatch, CommandReply, ErrorKind, Number, ParsedValue, PortState,
        ProtocolError, Session, SessionConfig,
    };
    pub use crate::recovery::{Outcome, RecoveryConfig, RecoveryObserver, RobustSession};
    pub use crate::sim::SimulatedDevice;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
