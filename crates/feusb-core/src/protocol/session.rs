//! Session management
//!
//! A [`Session`] owns one transport handle and the reply buffer behind it.
//! It writes commands, blocks until the expected number of replies has been
//! framed, and tracks the port state across suspends and disconnects.

use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::{
    command::{format_command, CommandBatch},
    config::{PollPolicy, SessionConfig, Sleeper, ThreadSleeper},
    framer::ReplyBuffer,
    reply::{parse_record, BatchReply},
    serial::SerialConnector,
    state::PortState,
    transport::{Connector, LinkFault, Transport},
    ProtocolError,
};

/// Open connection to one device
pub struct Session {
    /// Reopens the port on reconnect
    connector: Box<dyn Connector>,
    /// Live handle; `None` once the port is lost or closed
    transport: Option<Box<dyn Transport>>,
    /// Bytes received but not yet consumed
    buffer: ReplyBuffer,
    state: PortState,
    config: SessionConfig,
    sleeper: Box<dyn Sleeper>,
    /// Metrics: cumulative bytes/commands sent and bytes/records received
    tx_bytes: u64,
    rx_bytes: u64,
    tx_commands: u64,
    rx_records: u64,
}

impl Session {
    /// Open a serial port described by `config`
    pub fn open_serial(config: SessionConfig) -> Result<Self, ProtocolError> {
        let connector = SerialConnector::new(Duration::from_millis(config.serial_timeout_ms));
        Self::open(Box::new(connector), config)
    }

    /// Open `config.port_name` through `connector`
    pub fn open(connector: Box<dyn Connector>, config: SessionConfig) -> Result<Self, ProtocolError> {
        Self::open_with(connector, config, Box::new(ThreadSleeper))
    }

    /// Open with a custom pause source
    pub fn open_with(
        mut connector: Box<dyn Connector>,
        config: SessionConfig,
        sleeper: Box<dyn Sleeper>,
    ) -> Result<Self, ProtocolError> {
        let transport = connector.open(&config.port_name)?;
        info!("Opened port {}", config.port_name);
        Ok(Self {
            connector,
            transport: Some(transport),
            buffer: ReplyBuffer::new(),
            state: PortState::Connected,
            config,
            sleeper,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_commands: 0,
            rx_records: 0,
        })
    }

    /// Release the port. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            info!("Closed port {}", self.config.port_name);
        }
        self.state = PortState::Disconnected;
    }

    /// Name the port was opened with
    pub fn port_name(&self) -> &str {
        &self.config.port_name
    }

    /// Active configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether suspends are reported as errors
    pub fn error_on_suspend(&self) -> bool {
        self.config.error_on_suspend
    }

    /// Choose between surfacing suspends as errors and waiting them out
    pub fn set_error_on_suspend(&mut self, enabled: bool) {
        self.config.error_on_suspend = enabled;
    }

    /// Cumulative tx bytes, rx bytes, commands written and records read
    pub fn counters(&self) -> (u64, u64, u64, u64) {
        (self.tx_bytes, self.rx_bytes, self.tx_commands, self.rx_records)
    }

    /// Number of bytes buffered but not yet consumed
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Pause using the session's sleeper
    pub fn pause(&mut self, duration: Duration) {
        self.sleeper.pause(duration);
    }

    /// Most recent state, without touching the port
    pub fn raw_status(&self) -> PortState {
        self.state
    }

    /// Probe the port and return its state. Link faults are reported
    /// through the returned state, never as errors.
    pub fn status(&mut self) -> PortState {
        if self.state == PortState::Disconnected {
            return self.state;
        }
        let outcome = match self.transport.as_mut() {
            Some(transport) => transport.probe(),
            None => Err(LinkFault::Disconnected),
        };
        if let Err(LinkFault::Disconnected) = self.state.observe(outcome) {
            self.lose_handle();
        }
        self.state
    }

    /// Reopen a disconnected port with an empty reply buffer
    pub fn reconnect(&mut self) -> Result<PortState, ProtocolError> {
        self.state.ensure_reconnectable(&self.config.port_name)?;
        if let Some(mut stale) = self.transport.take() {
            stale.close();
        }
        let transport = self.connector.open(&self.config.port_name)?;
        self.transport = Some(transport);
        self.buffer.clear();
        self.state.reopened();
        info!("Reconnected port {}", self.config.port_name);
        Ok(self.state)
    }

    /// Pull pending bytes into the buffer and return the buffered byte count
    pub fn raw_waiting(&mut self) -> Result<usize, ProtocolError> {
        self.state.ensure_usable(&self.config.port_name)?;
        let Some(transport) = self.transport.as_mut() else {
            return Err(ProtocolError::Disconnected(self.config.port_name.clone()));
        };

        match self.state.observe(transport.bytes_pending()) {
            Ok(0) => {}
            Ok(pending) => {
                let data = match self.state.observe(transport.read_raw(pending)) {
                    Ok(data) => data,
                    Err(LinkFault::Suspended) => return self.suspended_poll("reading"),
                    Err(LinkFault::Disconnected) => return Err(self.lose_handle()),
                };
                trace!("{}: read {:?}", self.config.port_name, String::from_utf8_lossy(&data));
                self.rx_bytes = self.rx_bytes.saturating_add(data.len() as u64);
                self.buffer.append(&data);
                if data.len() < pending {
                    return Err(ProtocolError::ShortRead {
                        expected: pending,
                        actual: data.len(),
                    });
                }
            }
            Err(LinkFault::Suspended) => return self.suspended_poll("polling"),
            Err(LinkFault::Disconnected) => return Err(self.lose_handle()),
        }
        Ok(self.buffer.len())
    }

    /// Pull pending bytes into the buffer and return the number of complete replies
    pub fn waiting(&mut self) -> Result<usize, ProtocolError> {
        self.raw_waiting()?;
        Ok(self.buffer.pending_record_count())
    }

    /// Return buffered characters, at most `limit` of them
    pub fn raw_read(&mut self, limit: Option<usize>) -> Result<Vec<u8>, ProtocolError> {
        self.raw_waiting()?;
        Ok(self.buffer.take_raw(limit))
    }

    /// Write bytes as-is. Suspends are waited out unless error-on-suspend is set.
    pub fn raw_write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.state.ensure_usable(&self.config.port_name)?;
        loop {
            let outcome = match self.transport.as_mut() {
                Some(transport) => transport.write_raw(data),
                None => Err(LinkFault::Disconnected),
            };
            match self.state.observe(outcome) {
                Ok(()) => {
                    self.tx_bytes = self.tx_bytes.saturating_add(data.len() as u64);
                    return Ok(());
                }
                Err(LinkFault::Suspended) if self.config.error_on_suspend => {
                    return Err(ProtocolError::Suspended(self.config.port_name.clone()));
                }
                Err(LinkFault::Suspended) => {
                    warn!("{}: suspended during write, waiting", self.config.port_name);
                    let interval = self.config.poll.suspend_interval();
                    self.sleeper.pause(interval);
                }
                Err(LinkFault::Disconnected) => return Err(self.lose_handle()),
            }
        }
    }

    /// Write a command, upper-cased and CR terminated
    pub fn write(&mut self, command: &str) -> Result<(), ProtocolError> {
        let wire = format_command(command);
        debug!("{}: send {:?}", self.config.port_name, wire);
        self.raw_write(wire.as_bytes())?;
        self.tx_commands = self.tx_commands.saturating_add(1);
        Ok(())
    }

    /// Optionally send `command`, then block until `count` replies are framed.
    ///
    /// The retry counter only advances while the number of buffered replies
    /// stays unchanged, so a slow but progressing device never times out.
    pub fn read(&mut self, command: Option<&str>, count: usize) -> Result<BatchReply, ProtocolError> {
        let poll = self.config.poll.clone();
        if let Some(command) = command {
            self.write(command)?;
            self.sleeper.pause(poll.settle());
        }

        let mut current = self.waiting()?;
        let mut previous = current;
        let mut retries = 0u32;
        while current < count {
            if self.state == PortState::Suspended {
                self.sleeper.pause(poll.suspend_interval());
            } else {
                if current == previous {
                    retries += 1;
                    if retries >= poll.retry_limit {
                        return Err(self.stalled(&poll));
                    }
                } else {
                    retries = 0;
                    previous = current;
                }
                self.sleeper.pause(poll.retry_interval());
            }
            current = self.waiting()?;
        }

        let records = self.buffer.take_records(count)?;
        self.rx_records = self.rx_records.saturating_add(records.len() as u64);
        let replies = records
            .iter()
            .map(|record| parse_record(record))
            .collect::<Result<Vec<_>, _>>()?;
        let batch = BatchReply::assemble(replies);
        debug!("{}: reply {:?}", self.config.port_name, batch);
        Ok(batch)
    }

    /// Write a batch and read the replies its queries produce
    pub fn query(&mut self, batch: &CommandBatch) -> Result<BatchReply, ProtocolError> {
        self.read(Some(&batch.text()), batch.expected_replies())
    }

    /// Discard buffered replies and drain anything the device still sends
    pub fn purge(&mut self) -> Result<(), ProtocolError> {
        if !self.buffer.is_empty() {
            debug!(
                "{}: purging {} buffered bytes",
                self.config.port_name,
                self.buffer.len()
            );
            self.buffer.clear();
        }
        self.state.ensure_usable(&self.config.port_name)?;

        let poll = self.config.poll.clone();
        let mut quiet = 0u32;
        while quiet < poll.retry_limit {
            self.sleeper.pause(poll.retry_interval());
            if self.raw_waiting()? == 0 {
                if self.state == PortState::Suspended {
                    self.sleeper.pause(poll.suspend_interval());
                } else {
                    quiet += 1;
                }
            } else {
                quiet = 0;
                self.buffer.clear();
            }
        }
        Ok(())
    }

    /// Decide why a read stopped making progress
    fn stalled(&mut self, poll: &PollPolicy) -> ProtocolError {
        match self.status() {
            PortState::Disconnected => ProtocolError::Disconnected(self.config.port_name.clone()),
            PortState::Suspended => ProtocolError::ProtocolFault(format!(
                "port {} is suspended but the suspend was not seen while polling",
                self.config.port_name
            )),
            PortState::Connected => {
                warn!(
                    "{}: no reply progress after {} polls",
                    self.config.port_name, poll.retry_limit
                );
                ProtocolError::Timeout {
                    port: self.config.port_name.clone(),
                    per_reply: poll.per_reply_budget(),
                }
            }
        }
    }

    /// A poll hit a suspend: fail in strict mode, otherwise report what is
    /// buffered and let the caller wait
    fn suspended_poll(&self, during: &str) -> Result<usize, ProtocolError> {
        if self.config.error_on_suspend {
            return Err(ProtocolError::Suspended(self.config.port_name.clone()));
        }
        debug!("{}: suspended while {}", self.config.port_name, during);
        Ok(self.buffer.len())
    }

    /// Drop the dead handle and report the disconnect
    fn lose_handle(&mut self) -> ProtocolError {
        warn!("{}: device disconnected", self.config.port_name);
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.state = PortState::Disconnected;
        ProtocolError::Disconnected(self.config.port_name.clone())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedDevice;
    use pretty_assertions::assert_eq;

    fn open(device: &SimulatedDevice) -> Session {
        let mut config = SessionConfig::new("sim0");
        config.poll = PollPolicy::immediate();
        Session::open(Box::new(device.connector()), config).unwrap()
    }

    #[test]
    fn test_session_starts_connected() {
        let device = SimulatedDevice::new();
        let session = open(&device);
        assert_eq!(session.raw_status(), PortState::Connected);
        assert_eq!(session.port_name(), "sim0");
        assert_eq!(session.counters(), (0, 0, 0, 0));
    }

    #[test]
    fn test_write_formats_command() {
        let device = SimulatedDevice::new();
        let mut session = open(&device);
        session.write("m1").unwrap();
        session.write("s\r").unwrap();
        assert_eq!(device.written(), b"M1\rS\r".to_vec());
        let (tx_bytes, _, tx_commands, _) = session.counters();
        assert_eq!(tx_bytes, 5);
        assert_eq!(tx_commands, 2);
    }

    #[test]
    fn test_close_is_idempotent() {
        let device = SimulatedDevice::new();
        let mut session = open(&device);
        session.close();
        session.close();
        assert_eq!(session.raw_status(), PortState::Disconnected);
        assert_eq!(device.closes(), 1);
        assert!(matches!(
            session.write("u"),
            Err(ProtocolError::Disconnected(_))
        ));
    }

    #[test]
    fn test_reconnect_requires_disconnected() {
        let device = SimulatedDevice::new();
        let mut session = open(&device);
        assert!(matches!(
            session.reconnect(),
            Err(ProtocolError::NotDisconnected(_))
        ));
    }

    #[test]
    fn test_raw_read_limit() {
        let device = SimulatedDevice::new();
        device.deliver(b"12 34\r\n");
        let mut session = open(&device);
        assert_eq!(session.raw_waiting().unwrap(), 7);
        assert_eq!(session.raw_read(Some(3)).unwrap(), b"12 ".to_vec());
        assert_eq!(session.raw_read(None).unwrap(), b"34\r\n".to_vec());
    }
}
