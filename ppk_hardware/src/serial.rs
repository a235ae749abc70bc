//! USB CDC serial transport for a real instrument.
use std::io::{self, Read, Write};
use std::time::Duration;

use ppk_traits::{ByteChannel, ChannelError};
use serialport::{SerialPort, SerialPortType};

use crate::error::{HwError, Result};

/// Serial port paths whose USB descriptor matches `vid`/`pid`, sorted.
pub fn find_ports(vid: u16, pid: u16) -> Result<Vec<String>> {
    let ports = serialport::available_ports().map_err(|e| HwError::Serial(e.to_string()))?;
    let mut out: Vec<String> = ports
        .into_iter()
        .filter(|p| match &p.port_type {
            SerialPortType::UsbPort(info) => info.vid == vid && info.pid == pid,
            _ => false,
        })
        .map(|p| p.port_name)
        .collect();
    out.sort();
    tracing::debug!(vid = vid, pid = pid, found = out.len(), "usb port scan");
    Ok(out)
}

pub struct SerialChannel {
    id: String,
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl SerialChannel {
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let timeout = Duration::from_millis(100);
        let port = serialport::new(path, baud)
            .timeout(timeout)
            .open()
            .map_err(|e| map_open_error(path, &e))?;
        tracing::info!(port = path, baud = baud, "opened serial port");
        Ok(Self {
            id: path.to_string(),
            port,
            timeout,
        })
    }
}

fn map_open_error(path: &str, e: &serialport::Error) -> HwError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => HwError::NotFound(path.to_string()),
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => HwError::NotFound(path.to_string()),
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => HwError::PermissionDenied {
            port: path.to_string(),
            reason: e.description.clone(),
        },
        _ if e.description.to_lowercase().contains("busy") => HwError::Busy {
            port: path.to_string(),
            reason: e.description.clone(),
        },
        _ => HwError::Serial(format!("{path}: {}", e.description)),
    }
}

fn map_io_error(id: &str, e: io::Error) -> HwError {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::UnexpectedEof => HwError::Disconnected(format!("{id}: {e}")),
        _ => HwError::Io(e),
    }
}

impl ByteChannel for SerialChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), ChannelError> {
        self.port
            .write_all(bytes)
            .and_then(|()| self.port.flush())
            .map_err(|e| Box::new(map_io_error(&self.id, e)) as ChannelError)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> std::result::Result<usize, ChannelError> {
        if timeout != self.timeout {
            self.port
                .set_timeout(timeout)
                .map_err(|e| Box::new(HwError::Serial(e.to_string())) as ChannelError)?;
            self.timeout = timeout;
        }
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) => Err(Box::new(map_io_error(&self.id, e))),
        }
    }
}
