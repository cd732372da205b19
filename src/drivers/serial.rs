//! `serialport`-backed byte source.
//!
//! Port setup is the only place acquisition can fail hard; the errors are
//! mapped onto [`ScopeError::Open`], [`ScopeError::PortState`] and
//! [`ScopeError::Config`] and handed back to the caller untouched.
use std::io::{self, Read};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, SerialPort};

use crate::drivers::{ByteSource, ScopeError};

pub const SUPPORTED_BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParityMode {
    #[default]
    None,
    Even,
    Odd,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBitsMode {
    #[default]
    #[serde(rename = "1")]
    One,
    #[serde(rename = "1.5")]
    OnePointFive,
    #[serde(rename = "2")]
    Two,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub parity: ParityMode,
    pub stop_bits: StopBitsMode,
}
impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            parity: ParityMode::None,
            stop_bits: StopBitsMode::One,
        }
    }
}
impl SerialSettings {
    pub fn validate(&self) -> Result<(), ScopeError> {
        if self.port.trim().is_empty() {
            return Err(ScopeError::Config("no serial port selected".into()));
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(ScopeError::Config(format!(
                "unsupported baud rate {}",
                self.baud_rate
            )));
        }
        if self.stop_bits == StopBitsMode::OnePointFive {
            return Err(ScopeError::Config("1.5 stop bits are not supported".into()));
        }
        Ok(())
    }
    /// Bare names like `ttyUSB0` are resolved under `/dev` on Unix.
    pub fn device_path(&self) -> String {
        let port = self.port.trim();
        if cfg!(unix) && !port.starts_with('/') {
            format!("/dev/{port}")
        } else {
            port.to_owned()
        }
    }
}

/// Names of the serial ports currently visible to the OS.
pub fn list_ports() -> Result<Vec<String>, ScopeError> {
    let ports = serialport::available_ports().map_err(|e| ScopeError::Open(e.to_string()))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

pub struct SerialSource {
    port: Option<Box<dyn SerialPort>>,
    path: String,
}
impl SerialSource {
    /// Opens the port with 8 data bits, no flow control and non-blocking reads.
    pub fn open(settings: &SerialSettings) -> Result<Self, ScopeError> {
        settings.validate()?;
        let path = settings.device_path();
        let parity = match settings.parity {
            ParityMode::None => serialport::Parity::None,
            ParityMode::Even => serialport::Parity::Even,
            ParityMode::Odd => serialport::Parity::Odd,
        };
        let stop_bits = match settings.stop_bits {
            StopBitsMode::Two => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };
        let port = serialport::new(&path, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(FlowControl::None)
            .timeout(Duration::ZERO)
            .open()
            .map_err(|e| match ScopeError::from(e) {
                ScopeError::Open(msg) => ScopeError::Open(format!("{path}: {msg}")),
                other => other,
            })?;
        port.clear(ClearBuffer::Input)
            .map_err(|e| ScopeError::PortState(format!("{path}: {e}")))?;
        log::info!(
            "opened {path} at {} baud ({:?} parity, {:?} stop bits)",
            settings.baud_rate,
            settings.parity,
            settings.stop_bits
        );
        Ok(Self {
            port: Some(port),
            path,
        })
    }
    pub fn path(&self) -> &str {
        &self.path
    }
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
impl ByteSource for SerialSource {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, ScopeError> {
        let Some(port) = self.port.as_mut() else {
            return Err(ScopeError::Read(format!("{} is closed", self.path)));
        };
        let pending = port
            .bytes_to_read()
            .map_err(|e| ScopeError::Read(e.to_string()))? as usize;
        if pending == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = pending.min(buf.len());
        match port.read(&mut buf[..want]) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) => Err(ScopeError::Read(e.to_string())),
        }
    }
    fn close(&mut self) {
        if self.port.take().is_some() {
            log::info!("closed {}", self.path);
        }
    }
    fn describe(&self) -> String {
        self.path.clone()
    }
}
impl Drop for SerialSource {
    fn drop(&mut self) {
        self.close();
    }
}
