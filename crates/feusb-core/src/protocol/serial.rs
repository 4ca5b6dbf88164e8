//! Serial port transport
//!
//! USB-CDC devices enumerate as ordinary serial ports, so the `serialport`
//! crate provides the handle. Baud rate and framing are ignored by CDC
//! devices; a fixed rate is passed only because the OS API requires one.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::transport::{Connector, LinkFault, Transport, PROBE_BYTE};
use super::{ProtocolError, NOMINAL_BAUD_RATE};

/// Windows: "A device attached to the system is not functioning."
#[cfg(windows)]
const ERROR_GEN_FAILURE: i32 = 31;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => Self {
                name: info.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                manufacturer: usb_info.manufacturer,
                product: usb_info.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key placing CDC ports first:
///  - ttyACM* (numerically by suffix)
///  - then fercs* (numerically)
///  - then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "ttyACM"), (1, "fercs")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (2, 0, basename.to_string())
}

/// List available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux-only: the enumeration API can miss freshly re-plugged CDC nodes
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("fercs") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

fn classify_io(err: &io::Error) -> LinkFault {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
            LinkFault::Suspended
        }
        _ => {
            #[cfg(windows)]
            if err.raw_os_error() == Some(ERROR_GEN_FAILURE) {
                return LinkFault::Suspended;
            }
            LinkFault::Disconnected
        }
    }
}

fn classify_serial(err: &serialport::Error) -> LinkFault {
    match err.kind() {
        serialport::ErrorKind::Io(kind) => classify_io(&io::Error::from(kind)),
        _ => LinkFault::Disconnected,
    }
}

/// Read up to `count` bytes.
///
/// Bytes already taken from the OS are never discarded: once something has
/// been read, a later error ends the read early and the partial data is
/// returned for the caller to keep.
fn read_up_to<R: Read + ?Sized>(reader: &mut R, count: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; count];
    let mut filled = 0;
    while filled < count {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) if filled == 0 => return Err(e),
            Err(e) => {
                warn!("Read ended early after {} of {} bytes: {}", filled, count, e);
                break;
            }
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Serial port wrapper implementing [`Transport`]
pub struct SerialTransport {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Wrap an already opened port
    pub fn new(name: impl Into<String>, port: Box<dyn SerialPort>) -> Self {
        Self {
            name: name.into(),
            port: Some(port),
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, LinkFault> {
        self.port.as_mut().ok_or(LinkFault::Disconnected)
    }

    fn write_and_flush(&mut self, data: &[u8]) -> Result<(), LinkFault> {
        let port = self.port()?;
        port.write_all(data)
            .and_then(|_| port.flush())
            .map_err(|e| classify_io(&e))
    }
}

impl Transport for SerialTransport {
    fn write_raw(&mut self, data: &[u8]) -> Result<(), LinkFault> {
        trace!("{}: write {:?}", self.name, String::from_utf8_lossy(data));
        self.write_and_flush(data)
    }

    fn bytes_pending(&mut self) -> Result<usize, LinkFault> {
        let port = self.port()?;
        port.bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| classify_serial(&e))
    }

    fn read_raw(&mut self, count: usize) -> Result<Vec<u8>, LinkFault> {
        let name = self.name.clone();
        read_up_to(self.port()?, count).map_err(|e| {
            debug!("{}: read failed: {}", name, e);
            classify_io(&e)
        })
    }

    fn probe(&mut self) -> Result<(), LinkFault> {
        self.write_and_flush(&[PROBE_BYTE])
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("{}: closed", self.name);
        }
    }
}

/// Opens [`SerialTransport`]s
#[derive(Debug, Clone)]
pub struct SerialConnector {
    timeout: Duration,
}

impl SerialConnector {
    /// `timeout` bounds each individual OS read/write call
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(Duration::from_millis(super::DEFAULT_SERIAL_TIMEOUT_MS))
    }
}

impl Connector for SerialConnector {
    fn open(&mut self, port: &str) -> Result<Box<dyn Transport>, ProtocolError> {
        let handle = serialport::new(port, NOMINAL_BAUD_RATE)
            .timeout(self.timeout)
            .open()
            .map_err(|e| ProtocolError::OpenFailed {
                port: port.to_string(),
                reason: e.to_string(),
            })?;
        // Stale bytes from before the open would misalign the first reply
        if let Err(e) = handle.clear(serialport::ClearBuffer::All) {
            warn!("{}: could not clear stale buffers: {}", port, e);
        }
        Ok(Box::new(SerialTransport::new(port, handle)))
    }
}
