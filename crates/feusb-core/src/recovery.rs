//! Disconnect recovery
//!
//! [`RobustSession`] wraps a [`Session`] so that a lost device is reopened
//! without the caller driving the reconnect. The caller still learns that the
//! session was interrupted: a recovered call returns [`Outcome::Resumed`]
//! carrying the re-synchronization reply instead of the reply it asked for,
//! because anything written before the disconnect is gone and must not be
//! assumed to have run.
//!
//! An unresponsive device (present, but not answering) is not retried
//! automatically. The timeout is reported to the observer and returned;
//! [`RobustSession::await_replug`] then waits for the operator to unplug the
//! device and takes over once the port reports the loss.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::protocol::{BatchReply, CommandBatch, ErrorKind, PortState, ProtocolError, Session};

/// Recovery timing and behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Pause before every reopen attempt
    pub backoff_ms: u64,
    /// Status poll interval while waiting for the device to be unplugged
    pub unplug_poll_ms: u64,
    /// Query sent after a reconnect to confirm the device answers
    pub resync_command: String,
    /// Give up after this many failed reopens (`None` retries forever)
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 500,
            unplug_poll_ms: 500,
            resync_command: "U".to_string(),
            max_reconnect_attempts: None,
        }
    }
}

impl RecoveryConfig {
    /// Pause before each reopen
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Status poll interval while awaiting an unplug
    pub fn unplug_poll(&self) -> Duration {
        Duration::from_millis(self.unplug_poll_ms)
    }
}

/// Why the session stopped being actionable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseCause {
    /// The port reported the device gone
    Disconnected,
    /// The device stopped answering and is waiting to be re-plugged
    Unresponsive,
}

/// Hooks for the layer above the driver (display, motion state, ...)
///
/// All methods default to doing nothing.
pub trait RecoveryObserver {
    /// Output state must be frozen until the session resumes
    fn session_paused(&mut self, _cause: PauseCause) {}

    /// A reopen failed; `attempts` counts failures in this recovery cycle
    fn reconnect_failed(&mut self, _attempts: u32, _error: &ProtocolError) {}

    /// The device answered the re-synchronization query
    fn session_resumed(&mut self, _resync: &BatchReply) {}

    /// Replies stopped arriving although the port looks alive
    fn device_unresponsive(&mut self) {}
}

/// Observer that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RecoveryObserver for TracingObserver {
    fn session_paused(&mut self, cause: PauseCause) {
        warn!("Session paused: {:?}", cause);
    }

    fn reconnect_failed(&mut self, attempts: u32, error: &ProtocolError) {
        warn!("Reconnect attempt {} failed: {}", attempts, error);
    }

    fn session_resumed(&mut self, resync: &BatchReply) {
        info!("Session resumed, device reports {:?}", resync);
    }

    fn device_unresponsive(&mut self) {
        warn!("Device is not responding; unplug it to reset the connection");
    }
}

/// Result of a call that may have gone through a reconnect
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The call completed normally
    Completed(T),
    /// The device was lost and reconnected; the call's effect is unknown
    Resumed(BatchReply),
}

impl<T> Outcome<T> {
    /// The result, unless the call was interrupted by a reconnect
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            Outcome::Resumed(_) => None,
        }
    }

    /// True if a reconnect happened during the call
    pub fn is_resumed(&self) -> bool {
        matches!(self, Outcome::Resumed(_))
    }
}

/// Session that reconnects itself after a disconnect
pub struct RobustSession<O: RecoveryObserver = TracingObserver> {
    session: Session,
    config: RecoveryConfig,
    observer: O,
}

impl RobustSession<TracingObserver> {
    /// Wrap `session` with default recovery settings and a logging observer
    pub fn with_defaults(session: Session) -> Self {
        Self::new(session, RecoveryConfig::default(), TracingObserver)
    }
}

impl<O: RecoveryObserver> RobustSession<O> {
    /// Wrap `session`, reporting recovery events to `observer`
    pub fn new(session: Session, config: RecoveryConfig, observer: O) -> Self {
        Self {
            session,
            config,
            observer,
        }
    }

    /// The wrapped session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Mutable access for raw calls; these bypass recovery
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// The observer
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Mutable access to the observer
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Unwrap into the session and observer
    pub fn into_inner(self) -> (Session, O) {
        (self.session, self.observer)
    }

    /// Write a command, reconnecting if the device is gone
    pub fn write(&mut self, command: &str) -> Result<Outcome<()>, ProtocolError> {
        match self.session.write(command) {
            Ok(()) => Ok(Outcome::Completed(())),
            Err(e) => self.handle(e),
        }
    }

    /// Blocking read that reconnects if the device is gone
    pub fn read(
        &mut self,
        command: Option<&str>,
        count: usize,
    ) -> Result<Outcome<BatchReply>, ProtocolError> {
        match self.session.read(command, count) {
            Ok(reply) => Ok(Outcome::Completed(reply)),
            Err(e) => self.handle(e),
        }
    }

    /// Write a batch and read its replies, reconnecting if the device is gone
    pub fn query(&mut self, batch: &CommandBatch) -> Result<Outcome<BatchReply>, ProtocolError> {
        self.read(Some(&batch.text()), batch.expected_replies())
    }

    /// Wait until the port reports the device unplugged, then reconnect.
    ///
    /// Used after a timeout once the operator has been asked to re-plug.
    pub fn await_replug(&mut self) -> Result<BatchReply, ProtocolError> {
        self.observer.session_paused(PauseCause::Unresponsive);
        let interval = self.config.unplug_poll();
        while self.session.status() != PortState::Disconnected {
            self.session.pause(interval);
        }
        info!("{}: device unplugged", self.session.port_name());
        self.reconnect_and_resync()
    }

    fn handle<T>(&mut self, error: ProtocolError) -> Result<Outcome<T>, ProtocolError> {
        match error.kind() {
            ErrorKind::Disconnected => {
                self.observer.session_paused(PauseCause::Disconnected);
                self.reconnect_and_resync().map(Outcome::Resumed)
            }
            ErrorKind::Timeout => {
                self.observer.device_unresponsive();
                Err(error)
            }
            _ => Err(error),
        }
    }

    fn reconnect_and_resync(&mut self) -> Result<BatchReply, ProtocolError> {
        loop {
            self.reconnect_loop()?;
            let resync = self.config.resync_command.clone();
            match self.session.read(Some(&resync), 1) {
                Ok(reply) => {
                    self.observer.session_resumed(&reply);
                    return Ok(reply);
                }
                Err(e) if e.kind() == ErrorKind::Disconnected => {
                    warn!("{}: lost again during resync", self.session.port_name());
                }
                Err(e) => {
                    if e.kind() == ErrorKind::Timeout {
                        self.observer.device_unresponsive();
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Reopen once per backoff interval until it works
    fn reconnect_loop(&mut self) -> Result<(), ProtocolError> {
        let backoff = self.config.backoff();
        let mut attempts = 0u32;
        loop {
            self.session.pause(backoff);
            match self.session.reconnect() {
                Ok(_) => return Ok(()),
                Err(e @ ProtocolError::OpenFailed { .. }) => {
                    attempts += 1;
                    self.observer.reconnect_failed(attempts, &e);
                    if self
                        .config
                        .max_reconnect_attempts
                        .is_some_and(|max| attempts >= max)
                    {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
