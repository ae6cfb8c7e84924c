//! # PPK2 Driver Module
//!
//! Driver for the Nordic Power Profiler Kit 2 over its USB serial port.
//!
//! This module handles:
//! - Reading calibration modifiers from the device metadata
//! - Regulator voltage, measurement mode and DUT power commands
//! - Starting and stopping the measurement stream
//! - Decoding the stream into calibrated current readings
//!
//! The acquisition code only talks to the [`PowerProfiler`] trait.

pub mod decoder;
pub mod modifiers;
pub mod protocol;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Ppk2LoggerError, Result};
use crate::serial::SerialPortIO;
use decoder::SampleDecoder;
use modifiers::Modifiers;
use protocol::*;

pub use protocol::DutPower;

/// Attempts at reading the metadata block before giving up
const METADATA_READ_ATTEMPTS: usize = 5;

/// Pause between metadata reads
const METADATA_READ_DELAY: Duration = Duration::from_millis(100);

/// Operations the logger needs from a power profiler
#[async_trait]
pub trait PowerProfiler: Send {
    /// Read calibration modifiers from the device
    async fn get_modifiers(&mut self) -> Result<()>;

    /// Set the regulator output in millivolts
    async fn set_source_voltage(&mut self, mv: u16) -> Result<()>;

    /// Measure the whole draw of the DUT while supplying it
    async fn use_source_meter(&mut self) -> Result<()>;

    /// Switch DUT power on or off
    async fn toggle_dut_power(&mut self, state: DutPower) -> Result<()>;

    async fn start_measuring(&mut self) -> Result<()>;

    async fn stop_measuring(&mut self) -> Result<()>;

    /// Raw bytes buffered since the last call; empty if nothing arrived
    async fn get_data(&mut self) -> Result<Vec<u8>>;

    /// Decode a raw buffer into current readings in microamps
    fn get_samples(&mut self, buf: &[u8]) -> Vec<f64>;
}

/// PPK2 connected through a serial transport
pub struct Ppk2<P: SerialPortIO> {
    port: P,
    decoder: SampleDecoder,
    current_vdd: Option<u16>,
}

impl<P: SerialPortIO> std::fmt::Debug for Ppk2<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ppk2")
            .field("current_vdd", &self.current_vdd)
            .finish_non_exhaustive()
    }
}

impl<P: SerialPortIO> Ppk2<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            decoder: SampleDecoder::default(),
            current_vdd: None,
        }
    }

    pub fn modifiers(&self) -> &Modifiers {
        self.decoder.modifiers()
    }

    /// Last voltage sent to the regulator, after clamping
    pub fn current_vdd(&self) -> Option<u16> {
        self.current_vdd
    }

    async fn send_command(&mut self, command: &[u8]) -> Result<()> {
        self.port.write_all(command).await
            .map_err(|e| Ppk2LoggerError::Serial(format!("Failed to write command: {}", e)))?;

        self.port.flush().await
            .map_err(|e| Ppk2LoggerError::Serial(format!("Failed to flush serial port: {}", e)))?;

        debug!("Sent PPK2 command {:02X?}", command);
        Ok(())
    }

    async fn read_metadata(&mut self) -> Result<Option<String>> {
        let mut received = Vec::new();

        for _ in 0..METADATA_READ_ATTEMPTS {
            let chunk = self.port.read_available().await
                .map_err(|e| Ppk2LoggerError::Serial(format!("Failed to read metadata: {}", e)))?;
            received.extend_from_slice(&chunk);

            let text = String::from_utf8_lossy(&received);
            if text.contains(METADATA_END) {
                return Ok(Some(text.into_owned()));
            }

            tokio::time::sleep(METADATA_READ_DELAY).await;
        }

        Ok(None)
    }
}

#[async_trait]
impl<P: SerialPortIO> PowerProfiler for Ppk2<P> {
    async fn get_modifiers(&mut self) -> Result<()> {
        self.send_command(&[CMD_GET_META_DATA]).await?;

        match self.read_metadata().await? {
            Some(metadata) => {
                let mut modifiers = self.decoder.modifiers().clone();
                let updated = modifiers.apply_metadata(&metadata);
                info!("Loaded {} calibration coefficients from PPK2", updated);
                info!("PPK2 metadata: {}", modifiers.hardware_summary());
                self.decoder.set_modifiers(modifiers);
            }
            None => warn!("PPK2 did not send metadata, using default calibration"),
        }

        Ok(())
    }

    async fn set_source_voltage(&mut self, mv: u16) -> Result<()> {
        let [b1, b2] = encode_source_voltage(mv);
        self.send_command(&[CMD_REGULATOR_SET, b1, b2]).await?;
        self.current_vdd = Some(clamp_voltage(mv));
        Ok(())
    }

    async fn use_source_meter(&mut self) -> Result<()> {
        self.send_command(&[CMD_SET_POWER_MODE, POWER_MODE_SOURCE]).await
    }

    async fn toggle_dut_power(&mut self, state: DutPower) -> Result<()> {
        self.send_command(&[CMD_DEVICE_RUNNING_SET, state.as_arg()]).await?;
        info!("DUT power {:?}", state);
        Ok(())
    }

    async fn start_measuring(&mut self) -> Result<()> {
        if self.current_vdd.is_none() {
            return Err(Ppk2LoggerError::Protocol("Output voltage not set".to_string()));
        }

        self.decoder.reset();
        self.send_command(&[CMD_AVERAGE_START]).await
    }

    async fn stop_measuring(&mut self) -> Result<()> {
        self.send_command(&[CMD_AVERAGE_STOP]).await
    }

    async fn get_data(&mut self) -> Result<Vec<u8>> {
        self.port.read_available().await
            .map_err(|e| Ppk2LoggerError::Serial(format!("Failed to read samples: {}", e)))
    }

    fn get_samples(&mut self, buf: &[u8]) -> Vec<f64> {
        let vdd = self.current_vdd.unwrap_or(0);
        self.decoder.decode(buf, vdd)
    }
}
