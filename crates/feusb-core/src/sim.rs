//! Simulated device
//!
//! A scriptable stand-in for a USB-CDC controller. Tests and the demo tool
//! use it to exercise suspends, disconnects, slow replies and failed reopens
//! without hardware. All handles opened from one [`SimulatedDevice`] share
//! its state, so a test can keep the device and inspect it after handing a
//! connector to a session.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::protocol::{Connector, LinkFault, ProtocolError, Transport, RECORD_TERMINATOR};

/// What the device does on one `bytes_pending` poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// Nothing new arrives
    Idle,
    /// These bytes arrive before the poll is answered
    Deliver(Vec<u8>),
    /// The link reports a suspend
    Suspend,
    /// The handle dies (the device itself can be reopened)
    Disconnect,
}

#[derive(Debug, Default)]
struct SimState {
    /// Device is plugged in; opens fail while false
    present: bool,
    /// Generation of the only valid handle
    generation: u64,
    /// Opens that will fail before one succeeds
    failing_opens: u32,
    opens: u32,
    closes: u32,
    polls: u32,
    probes: u32,
    /// Bytes sent by the device and not yet read by the host
    incoming: Vec<u8>,
    /// Bytes written by the host, probes excluded
    written: Vec<u8>,
    /// Partial command line not yet terminated
    line: String,
    responses: HashMap<String, String>,
    poll_script: VecDeque<PollEvent>,
    write_faults: VecDeque<LinkFault>,
    read_faults: VecDeque<LinkFault>,
    probe_faults: VecDeque<LinkFault>,
    /// Bytes withheld from the next read
    short_read: usize,
}

impl SimState {
    fn check(&self, generation: u64) -> Result<(), LinkFault> {
        if self.present && self.generation == generation {
            Ok(())
        } else {
            Err(LinkFault::Disconnected)
        }
    }

    /// Invalidate the current handle. Whatever was in flight is lost.
    fn drop_handle(&mut self) {
        self.generation += 1;
        self.incoming.clear();
        self.line.clear();
    }

    fn execute(&mut self, data: &[u8]) {
        for &b in data {
            if b == b'\r' || b == b'\n' {
                let line = std::mem::take(&mut self.line).to_ascii_uppercase();
                let replies: Vec<String> = match self.responses.get(line.trim()) {
                    Some(reply) => vec![reply.clone()],
                    // Space separated batch: answer each known command
                    None => line
                        .split_whitespace()
                        .filter_map(|cmd| self.responses.get(cmd).cloned())
                        .collect(),
                };
                for reply in replies {
                    self.incoming.extend_from_slice(reply.as_bytes());
                    self.incoming.extend_from_slice(RECORD_TERMINATOR);
                }
            } else {
                self.line.push(b as char);
            }
        }
    }
}

/// Shared handle to a simulated device
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    inner: Arc<Mutex<SimState>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// A plugged-in device with no canned responses
    pub fn new() -> Self {
        let state = SimState {
            present: true,
            ..SimState::default()
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// A device answering the servo controller's status queries
    pub fn servo_controller() -> Self {
        let device = Self::new();
        device.respond("U", "USB-RCS 1 2 1.10");
        device.respond("M1", "M 8190");
        device.respond("S1", "S 9000 0 0 0");
        device.respond("M", "M 8190 0 16380 4095 0 0 0 0");
        let servos: Vec<String> = (0..16)
            .map(|i| format!("{} 0 0 0", 9000 + i * 1200))
            .collect();
        device.respond("S", &format!("S\n{}", servos.join("\n")));
        device
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connector opening handles to this device
    pub fn connector(&self) -> SimConnector {
        SimConnector {
            device: self.clone(),
        }
    }

    /// Reply `reply` (terminator added) whenever the line `command` is
    /// written. Matching ignores case, as the hardware does.
    pub fn respond(&self, command: &str, reply: &str) {
        self.state()
            .responses
            .insert(command.to_ascii_uppercase(), reply.to_string());
    }

    /// Make bytes available immediately
    pub fn deliver(&self, bytes: &[u8]) {
        self.state().incoming.extend_from_slice(bytes);
    }

    /// Queue behaviour for upcoming polls; once exhausted polls are idle
    pub fn script_polls(&self, events: impl IntoIterator<Item = PollEvent>) {
        self.state().poll_script.extend(events);
    }

    /// Fail upcoming writes with these faults, in order
    pub fn fail_writes(&self, faults: impl IntoIterator<Item = LinkFault>) {
        self.state().write_faults.extend(faults);
    }

    /// Fail upcoming reads with these faults, in order
    pub fn fail_reads(&self, faults: impl IntoIterator<Item = LinkFault>) {
        self.state().read_faults.extend(faults);
    }

    /// Fail upcoming probes with these faults, in order
    pub fn fail_probes(&self, faults: impl IntoIterator<Item = LinkFault>) {
        self.state().probe_faults.extend(faults);
    }

    /// The next `count` opens fail
    pub fn fail_opens(&self, count: u32) {
        self.state().failing_opens += count;
    }

    /// Withhold `count` bytes from the next read
    pub fn short_read(&self, count: usize) {
        self.state().short_read = count;
    }

    /// Pull the plug: the current handle dies and opens fail
    pub fn unplug(&self) {
        let mut state = self.state();
        state.present = false;
        state.drop_handle();
    }

    /// Plug the device back in; the next open succeeds
    pub fn plug_in(&self) {
        self.state().present = true;
    }

    /// Everything the host has written so far
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    /// Open attempts, successful or not
    pub fn opens(&self) -> u32 {
        self.state().opens
    }

    /// Handles closed by the host
    pub fn closes(&self) -> u32 {
        self.state().closes
    }

    /// `bytes_pending` calls on live handles
    pub fn polls(&self) -> u32 {
        self.state().polls
    }

    /// Probes on live handles
    pub fn probes(&self) -> u32 {
        self.state().probes
    }
}

/// Opens [`SimTransport`]s on a [`SimulatedDevice`]
#[derive(Debug, Clone)]
pub struct SimConnector {
    device: SimulatedDevice,
}

impl Connector for SimConnector {
    fn open(&mut self, port: &str) -> Result<Box<dyn Transport>, ProtocolError> {
        let mut state = self.device.state();
        state.opens += 1;
        let refused = if !state.present {
            Some("device not present")
        } else if state.failing_opens > 0 {
            state.failing_opens -= 1;
            Some("device busy")
        } else {
            None
        };
        if let Some(reason) = refused {
            return Err(ProtocolError::OpenFailed {
                port: port.to_string(),
                reason: reason.to_string(),
            });
        }
        // Bytes queued before the open stay readable
        state.generation += 1;
        Ok(Box::new(SimTransport {
            device: self.device.clone(),
            generation: state.generation,
            closed: false,
        }))
    }
}

/// One handle to a [`SimulatedDevice`]
#[derive(Debug)]
pub struct SimTransport {
    device: SimulatedDevice,
    generation: u64,
    closed: bool,
}

impl Transport for SimTransport {
    fn write_raw(&mut self, data: &[u8]) -> Result<(), LinkFault> {
        let mut state = self.device.state();
        state.check(self.generation)?;
        match state.write_faults.pop_front() {
            Some(LinkFault::Disconnected) => {
                state.drop_handle();
                Err(LinkFault::Disconnected)
            }
            Some(fault) => Err(fault),
            None => {
                state.written.extend_from_slice(data);
                state.execute(data);
                Ok(())
            }
        }
    }

    fn bytes_pending(&mut self) -> Result<usize, LinkFault> {
        let mut state = self.device.state();
        state.check(self.generation)?;
        state.polls += 1;
        match state.poll_script.pop_front() {
            Some(PollEvent::Deliver(bytes)) => state.incoming.extend_from_slice(&bytes),
            Some(PollEvent::Suspend) => return Err(LinkFault::Suspended),
            Some(PollEvent::Disconnect) => {
                state.drop_handle();
                return Err(LinkFault::Disconnected);
            }
            Some(PollEvent::Idle) | None => {}
        }
        Ok(state.incoming.len())
    }

    fn read_raw(&mut self, count: usize) -> Result<Vec<u8>, LinkFault> {
        let mut state = self.device.state();
        state.check(self.generation)?;
        match state.read_faults.pop_front() {
            Some(LinkFault::Disconnected) => {
                state.drop_handle();
                return Err(LinkFault::Disconnected);
            }
            Some(fault) => return Err(fault),
            None => {}
        }
        let withheld = std::mem::take(&mut state.short_read);
        let take = count.min(state.incoming.len()).saturating_sub(withheld);
        Ok(state.incoming.drain(..take).collect())
    }

    fn probe(&mut self) -> Result<(), LinkFault> {
        let mut state = self.device.state();
        state.check(self.generation)?;
        state.probes += 1;
        match state.probe_faults.pop_front() {
            Some(LinkFault::Disconnected) => {
                state.drop_handle();
                Err(LinkFault::Disconnected)
            }
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.device.state().closes += 1;
        }
    }
}
