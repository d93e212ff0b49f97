//! Serial port devices
//!
//! Provides hardware access to the controller over USB or RS-232:
//! - Port enumeration and discovery (name patterns, USB vendor ids)
//! - [`SerialDevice`], an async [`Device`] on top of `tokio-serial`
//! - [`SerialDeviceProvider`], which remembers the last port it handed out

use super::{Device, DeviceProvider, DeviceReader, DeviceWriter};
use async_trait::async_trait;
use laserdeck_core::ConnectionError;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB FTDI Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }

    /// Whether the port is a USB bridge from one of `vendor_ids`
    pub fn matches_vendor(&self, vendor_ids: &[u16]) -> bool {
        self.vid.is_some_and(|vid| vendor_ids.contains(&vid))
    }
}

/// List available serial ports on the system
///
/// Only ports whose names look like a controller link are returned:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>, ConnectionError> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::AcquisitionFailed {
            reason: format!("Failed to enumerate ports: {}", e),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_valid_cnc_port(&port.port_name))
        .map(|port| {
            let info = SerialPortInfo::new(&port.port_name, get_port_description(port));
            match &port.port_type {
                serialport::SerialPortType::UsbPort(usb_info) => {
                    let info = info.with_usb_ids(usb_info.vid, usb_info.pid);
                    match &usb_info.manufacturer {
                        Some(mfg) => info.with_manufacturer(mfg),
                        None => info,
                    }
                }
                _ => info,
            }
        })
        .collect())
}

/// Check if a port name matches controller link patterns
fn is_valid_cnc_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

/// Get a user-friendly description for a port
fn get_port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Pick the port to use from an enumeration
///
/// Vendor id matches win over name-pattern matches.
fn select_port<'a>(ports: &'a [SerialPortInfo], vendor_ids: &[u16]) -> Option<&'a SerialPortInfo> {
    ports
        .iter()
        .find(|p| p.matches_vendor(vendor_ids))
        .or_else(|| ports.iter().find(|p| p.vid.is_none()))
}

#[derive(Default)]
struct SerialState {
    open: bool,
    stream: Option<SerialStream>,
}

/// A serial port opened through `tokio-serial`
pub struct SerialDevice {
    port_name: String,
    state: Mutex<SerialState>,
}

impl SerialDevice {
    /// Create a closed device for `port_name`
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            state: Mutex::new(SerialState::default()),
        }
    }
}

#[async_trait]
impl Device for SerialDevice {
    fn name(&self) -> String {
        self.port_name.clone()
    }

    async fn open(&self, baud_rate: u32) -> Result<(), ConnectionError> {
        if self.state.lock().open {
            return Err(ConnectionError::AlreadyOpen {
                port: self.port_name.clone(),
            });
        }

        let stream = tokio_serial::new(&self.port_name, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", self.port_name, e);
                ConnectionError::FailedToOpen {
                    port: self.port_name.clone(),
                    reason: e.to_string(),
                }
            })?;

        let mut state = self.state.lock();
        state.open = true;
        state.stream = Some(stream);
        tracing::info!("Opened {} at {} baud", self.port_name, baud_rate);
        Ok(())
    }

    fn take_io(&self) -> Option<(DeviceReader, DeviceWriter)> {
        let stream = self.state.lock().stream.take()?;
        let (reader, writer) = tokio::io::split(stream);
        Some((Box::new(reader), Box::new(writer)))
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        if state.open {
            tracing::info!("Closed {}", self.port_name);
        }
        state.open = false;
        // The port itself closes once both split halves are dropped
        state.stream = None;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

/// Finds serial devices
///
/// The configured port counts as already authorized. Once discovery hands
/// out a port it is remembered and offered as authorized from then on.
pub struct SerialDeviceProvider {
    vendor_ids: Vec<u16>,
    authorized: Mutex<Option<Arc<SerialDevice>>>,
}

impl SerialDeviceProvider {
    /// Create a provider
    pub fn new(port: Option<String>, vendor_ids: Vec<u16>) -> Self {
        Self {
            vendor_ids,
            authorized: Mutex::new(port.map(|p| Arc::new(SerialDevice::new(p)))),
        }
    }
}

#[async_trait]
impl DeviceProvider for SerialDeviceProvider {
    async fn authorized_devices(&self) -> Result<Vec<Arc<dyn Device>>, ConnectionError> {
        Ok(self
            .authorized
            .lock()
            .iter()
            .map(|device| device.clone() as Arc<dyn Device>)
            .collect())
    }

    async fn request_device(&self) -> Result<Arc<dyn Device>, ConnectionError> {
        let ports = list_ports()?;
        let port = select_port(&ports, &self.vendor_ids).ok_or_else(|| {
            tracing::warn!("No compatible serial port among {} candidates", ports.len());
            ConnectionError::NoDeviceAvailable
        })?;

        tracing::info!("Selected {} ({})", port.port_name, port.description);
        let device = Arc::new(SerialDevice::new(&port.port_name));
        *self.authorized.lock() = Some(device.clone());
        Ok(device)
    }
}
