//! Shared helpers for the integration tests
#![allow(dead_code)]

use feusb_core::protocol::{PollPolicy, Session, SessionConfig, Sleeper};
use feusb_core::sim::SimulatedDevice;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Records requested pauses instead of sleeping
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    pauses: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().unwrap().clone()
    }

    /// How many pauses of exactly `duration` were requested
    pub fn count(&self, duration: Duration) -> usize {
        self.pauses().iter().filter(|d| **d == duration).count()
    }
}

impl Sleeper for RecordingSleeper {
    fn pause(&mut self, duration: Duration) {
        self.pauses.lock().unwrap().push(duration);
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Default device timing, but every pause is recorded rather than slept
pub fn open_recorded(device: &SimulatedDevice) -> (Session, RecordingSleeper) {
    open_with_policy(device, PollPolicy::default())
}

pub fn open_with_policy(device: &SimulatedDevice, poll: PollPolicy) -> (Session, RecordingSleeper) {
    init_tracing();
    let sleeper = RecordingSleeper::default();
    let mut config = SessionConfig::new("sim0");
    config.poll = poll;
    let session = Session::open_with(
        Box::new(device.connector()),
        config,
        Box::new(sleeper.clone()),
    )
    .unwrap();
    (session, sleeper)
}
