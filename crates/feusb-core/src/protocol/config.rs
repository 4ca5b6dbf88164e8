//! Session configuration and polling policy

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    DEFAULT_RETRY_INTERVAL_MS, DEFAULT_RETRY_LIMIT, DEFAULT_SERIAL_TIMEOUT_MS, DEFAULT_SETTLE_MS,
    DEFAULT_SUSPEND_INTERVAL_MS,
};

/// Timing of the blocking read loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Pause after writing a command before the first poll
    pub settle_ms: u64,
    /// Pause between polls
    pub retry_interval_ms: u64,
    /// Polls without progress before a read gives up
    pub retry_limit: u32,
    /// Pause between polls while the port is suspended
    pub suspend_interval_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            settle_ms: DEFAULT_SETTLE_MS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            retry_limit: DEFAULT_RETRY_LIMIT,
            suspend_interval_ms: DEFAULT_SUSPEND_INTERVAL_MS,
        }
    }
}

impl PollPolicy {
    /// Same retry ceiling, no waiting. For tests and simulations.
    pub fn immediate() -> Self {
        Self {
            settle_ms: 0,
            retry_interval_ms: 0,
            retry_limit: DEFAULT_RETRY_LIMIT,
            suspend_interval_ms: 0,
        }
    }

    /// Pause after a write
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Pause between polls
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Pause between polls while suspended
    pub fn suspend_interval(&self) -> Duration {
        Duration::from_millis(self.suspend_interval_ms)
    }

    /// Longest a read may stall on one reply before timing out
    pub fn per_reply_budget(&self) -> Duration {
        self.retry_interval() * self.retry_limit
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Port name (e.g. "/dev/ttyACM0" or "COM3")
    pub port_name: String,
    /// Surface suspends as errors instead of waiting them out
    pub error_on_suspend: bool,
    /// Read loop timing
    pub poll: PollPolicy,
    /// Bound on each OS-level serial call
    pub serial_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            error_on_suspend: false,
            poll: PollPolicy::default(),
            serial_timeout_ms: DEFAULT_SERIAL_TIMEOUT_MS,
        }
    }
}

impl SessionConfig {
    /// Defaults for `port_name`
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }
}

/// Source of pauses for the polling loops
pub trait Sleeper: Send {
    /// Block for `duration`
    fn pause(&mut self, duration: Duration);
}

/// Real sleeps on the current thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn pause(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}
