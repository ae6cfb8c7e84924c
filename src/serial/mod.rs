//! # Serial Communication Module
//!
//! Finds and opens the PPK2 USB serial port.
//!
//! This module handles:
//! - Enumerating serial ports and picking out PPK2s (by product string or VID/PID)
//! - The one-shot device-count check before any session is opened
//! - Opening the selected port

pub mod port_trait;

use crate::error::{Ppk2LoggerError, Result};
use std::fmt;
use std::time::Duration;
use tokio_serial::{SerialPortBuilderExt, SerialPortInfo, SerialPortType};
use tracing::{debug, info};

pub use port_trait::{SerialPortIO, TokioSerialPort};

/// The PPK2 is a USB CDC device, so the baud rate is nominal
pub const PPK2_BAUD_RATE: u32 = 9600;

/// Nordic Semiconductor USB vendor ID
pub const PPK2_USB_VID: u16 = 0x1915;

/// PPK2 USB product ID
pub const PPK2_USB_PID: u16 = 0xC00A;

/// USB product string reported by the PPK2
const PPK2_PRODUCT: &str = "PPK2";

/// Serial numbers are reported truncated to this many characters
const SERIAL_NUMBER_LEN: usize = 8;

/// A PPK2 found on the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Serial port path (e.g. /dev/ttyACM0 or COM3)
    pub port: String,
    /// Truncated USB serial number
    pub serial_number: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.port, self.serial_number)
    }
}

/// Source of the serial port list
#[cfg_attr(test, mockall::automock)]
pub trait PortEnumerator {
    fn available_ports(&self) -> Result<Vec<SerialPortInfo>>;
}

/// Enumerates the serial ports of the host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn available_ports(&self) -> Result<Vec<SerialPortInfo>> {
        tokio_serial::available_ports()
            .map_err(|e| Ppk2LoggerError::Serial(format!("Failed to enumerate serial ports: {}", e)))
    }
}

/// List the attached PPK2 ports, in enumeration order
pub fn list_devices<E: PortEnumerator + ?Sized>(ports: &E) -> Result<Vec<DeviceInfo>> {
    let devices: Vec<DeviceInfo> = ports
        .available_ports()?
        .into_iter()
        .filter_map(|info| {
            let SerialPortType::UsbPort(usb) = &info.port_type else {
                return None;
            };

            let is_ppk2 = usb.product.as_deref() == Some(PPK2_PRODUCT)
                || (usb.vid == PPK2_USB_VID && usb.pid == PPK2_USB_PID);
            if !is_ppk2 {
                return None;
            }

            let serial_number = usb
                .serial_number
                .as_deref()
                .unwrap_or_default()
                .chars()
                .take(SERIAL_NUMBER_LEN)
                .collect();

            Some(DeviceInfo {
                port: info.port_name.clone(),
                serial_number,
            })
        })
        .collect();

    debug!("Found {} PPK2 port(s)", devices.len());
    Ok(devices)
}

/// Pick the device to use from the discovered list
///
/// One PPK2 may show up as two ports, so anything from one to `max_ports`
/// entries is accepted and the first entry wins.
///
/// # Errors
///
/// - `DeviceNotFound` if the list is empty
/// - `TooManyDevices` if it holds more than `max_ports` entries
pub fn select_device(devices: Vec<DeviceInfo>, max_ports: usize) -> Result<DeviceInfo> {
    if devices.len() > max_ports {
        let listed: Vec<String> = devices.iter().map(ToString::to_string).collect();
        return Err(Ppk2LoggerError::TooManyDevices(format!("[{}]", listed.join(", "))));
    }

    let device = devices.into_iter().next().ok_or(Ppk2LoggerError::DeviceNotFound)?;
    info!("Found PPK2 at {} with serial number {}", device.port, device.serial_number);
    Ok(device)
}

/// Open the PPK2 serial port
///
/// # Arguments
///
/// * `path` - Device path (e.g., "/dev/ttyACM0")
/// * `timeout` - Read/write timeout
pub fn open_port(path: &str, timeout: Duration) -> Result<TokioSerialPort> {
    let port = tokio_serial::new(path, PPK2_BAUD_RATE)
        .timeout(timeout)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| Ppk2LoggerError::Serial(format!("Failed to open {}: {}", path, e)))?;

    info!("Opened PPK2 serial port {}", path);
    Ok(TokioSerialPort::new(port))
}
