//! Serial byte transport between the camera device and the host relay.
//!
//! [`SerialLink`] owns the port handle. After a hard I/O error it drops the
//! handle and reopens the port on the next read or write, so a replugged
//! device comes back without restarting the process.

pub use moodlink_core::pipeline::is_transient;
use serialport::{SerialPort, SerialPortType};
use std::io::{self, Read, Write};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("failed to open serial port {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },
    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),
    #[error("no USB serial port found; is the camera connected?")]
    NoUsbPort,
}

/// How to open the port.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub path: String,
    pub baud_rate: u32,
    /// Bounded wait for each read or write.
    pub timeout: Duration,
}

/// A discovered serial port.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub usb: bool,
    pub product: Option<String>,
}

/// Owned serial port handle that reopens itself after failures.
pub struct SerialLink {
    settings: LinkSettings,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialLink {
    /// Open the port now. Failure here is a startup error.
    pub fn open(settings: LinkSettings) -> Result<Self, LinkError> {
        let port = open_port(&settings)?;
        tracing::info!(
            path = %settings.path,
            baud = settings.baud_rate,
            timeout_ms = settings.timeout.as_millis() as u64,
            "serial link opened"
        );
        Ok(Self { settings, port: Some(port) })
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        if self.port.is_none() {
            let port = open_port(&self.settings).map_err(|e| io::Error::new(io::ErrorKind::NotConnected, e))?;
            tracing::info!(path = %self.settings.path, "serial link reopened");
            self.port = Some(port);
        }
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }

    /// Drop the handle after a hard error so the next call reopens it.
    fn check<T>(&mut self, result: io::Result<T>) -> io::Result<T> {
        if let Err(e) = &result {
            if !is_transient(e) {
                tracing::debug!(path = %self.settings.path, error = %e, "closing serial port after error");
                self.port = None;
            }
        }
        result
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.port()?.read(buf);
        self.check(result)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.port()?.write(buf);
        self.check(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.port()?.flush();
        self.check(result)
    }
}

fn open_port(settings: &LinkSettings) -> Result<Box<dyn SerialPort>, LinkError> {
    serialport::new(&settings.path, settings.baud_rate)
        .timeout(settings.timeout)
        .open()
        .map_err(|source| LinkError::Open {
            path: settings.path.clone(),
            source,
        })
}

/// List serial ports known to the OS.
pub fn list_ports() -> Result<Vec<PortInfo>, LinkError> {
    let ports = serialport::available_ports().map_err(LinkError::Enumerate)?;
    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(usb) => PortInfo {
                path: p.port_name,
                usb: true,
                product: usb.product,
            },
            _ => PortInfo {
                path: p.port_name,
                usb: false,
                product: None,
            },
        })
        .collect())
}

/// Path of the first USB serial port, where a camera enumerates.
pub fn detect_usb_port() -> Result<String, LinkError> {
    let ports = list_ports()?;
    tracing::debug!(ports = ?ports.iter().map(|p| &p.path).collect::<Vec<_>>(), "available serial ports");
    first_usb(&ports).ok_or(LinkError::NoUsbPort)
}

fn first_usb(ports: &[PortInfo]) -> Option<String> {
    ports.iter().find(|p| p.usb).map(|p| p.path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_usb_skips_builtin_ports() {
        let ports = vec![
            PortInfo { path: "/dev/ttyS0".into(), usb: false, product: None },
            PortInfo { path: "/dev/ttyACM0".into(), usb: true, product: Some("OpenMV".into()) },
            PortInfo { path: "/dev/ttyACM1".into(), usb: true, product: None },
        ];
        assert_eq!(first_usb(&ports).as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(first_usb(&ports[..1]), None);
    }

    #[test]
    fn test_open_missing_port() {
        let settings = LinkSettings {
            path: "/dev/tty-does-not-exist".into(),
            baud_rate: 115_200,
            timeout: Duration::from_millis(10),
        };
        assert!(matches!(SerialLink::open(settings), Err(LinkError::Open { .. })));
    }
}
