//! Serial port handling
//!
//! [`SerialTransport`] drives the USB-serial link to the ECU with the
//! `serialport` crate. A dedicated reader thread hands every received chunk to
//! a callback, normally [`crate::ecu::Ecu::receive_data`].

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::{debug, info, warn};

use super::transport::{ConnectionStatus, Transport};
use super::{ProtocolError, DEFAULT_BAUD_RATE};
use crate::observer::{ObserverList, SubscriptionId};

/// Read timeout of the reader thread
const READ_TIMEOUT_MS: u64 = 100;

/// Parity setting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParitySetting {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Serial line settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port name; the first USB serial device is used when unset
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: ParitySetting,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            stop_bits: 2,
            parity: ParitySetting::None,
        }
    }
}

impl SerialSettings {
    fn data_bits(&self) -> Result<DataBits, ProtocolError> {
        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            n => Err(ProtocolError::SerialError(format!("unsupported data bits: {n}"))),
        }
    }

    fn stop_bits(&self) -> Result<StopBits, ProtocolError> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            n => Err(ProtocolError::SerialError(format!("unsupported stop bits: {n}"))),
        }
    }

    fn parity(&self) -> Parity {
        match self.parity {
            ParitySetting::None => Parity::None,
            ParitySetting::Odd => Parity::Odd,
            ParitySetting::Even => Parity::Even,
        }
    }
}

/// Sort key putting ttyACM* first, then ttyUSB*, each numerically, then the rest
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// Names of the USB serial devices currently present, in preference order
pub fn usb_ports() -> Vec<String> {
    let mut names: Vec<String> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .filter(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
        .map(|p| p.port_name)
        .collect();
    names.sort_by_key(|n| port_sort_key(n));
    names
}

/// USB-serial link to the ECU
pub struct SerialTransport {
    settings: SerialSettings,
    port: Mutex<Option<Box<dyn SerialPort>>>,
    status: ObserverList<ConnectionStatus>,
}

impl SerialTransport {
    /// Transport with the given line settings; nothing is opened yet
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: Mutex::new(None),
            status: ObserverList::new(),
        }
    }

    /// Subscribe to link status changes
    pub fn on_status<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.status.subscribe(listener)
    }

    fn port_name(&self) -> Option<String> {
        match &self.settings.port {
            Some(name) => Some(name.clone()),
            None => usb_ports().into_iter().next(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Box<dyn SerialPort>>> {
        self.port.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a thread feeding every received chunk to `on_bytes`.
    ///
    /// The thread ends when the port is closed or a read fails.
    pub fn spawn_reader<F>(self: &Arc<Self>, mut on_bytes: F) -> Result<JoinHandle<()>, ProtocolError>
    where
        F: FnMut(Vec<u8>) + Send + 'static,
    {
        let mut reader = self
            .lock()
            .as_ref()
            .ok_or(ProtocolError::NotConnected)?
            .try_clone()?;
        let transport = Arc::clone(self);

        let handle = std::thread::Builder::new()
            .name("ECU-Serial".to_string())
            .spawn(move || {
                let mut buf = [0u8; 4096];
                while transport.is_open() {
                    match reader.read(&mut buf) {
                        Ok(0) => continue,
                        Ok(n) => on_bytes(buf[..n].to_vec()),
                        Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            warn!(error = %e, "serial read failed, closing port");
                            transport.close();
                            break;
                        }
                    }
                }
                debug!("serial reader stopped");
            })?;
        Ok(handle)
    }
}

impl Transport for SerialTransport {
    fn open(&self) -> Result<(), ProtocolError> {
        let mut guard = self.lock();
        if guard.is_some() {
            return Ok(());
        }

        let name = self
            .port_name()
            .ok_or_else(|| ProtocolError::ConnectionFailed("no USB serial device attached".into()))?;

        let port = serialport::new(&name, self.settings.baud_rate)
            .data_bits(self.settings.data_bits()?)
            .stop_bits(self.settings.stop_bits()?)
            .parity(self.settings.parity())
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(READ_TIMEOUT_MS))
            .open()?;

        info!(port = %name, baud = self.settings.baud_rate, "serial port opened");
        *guard = Some(port);
        drop(guard);
        self.status.notify(&ConnectionStatus::Connected);
        Ok(())
    }

    fn close(&self) {
        let closed = self.lock().take().is_some();
        if closed {
            info!("serial port closed");
            let status = if self.is_attached() {
                ConnectionStatus::Attached
            } else {
                ConnectionStatus::Detached
            };
            self.status.notify(&status);
        }
    }

    fn write(&self, data: &[u8]) -> Result<(), ProtocolError> {
        let mut guard = self.lock();
        let port = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    fn is_attached(&self) -> bool {
        match &self.settings.port {
            Some(name) => serialport::available_ports()
                .unwrap_or_default()
                .iter()
                .any(|p| &p.port_name == name),
            None => !usb_ports().is_empty(),
        }
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("settings", &self.settings)
            .field("open", &self.is_open())
            .finish()
    }
}
