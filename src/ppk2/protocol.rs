//! # PPK2 Protocol Definitions
//!
//! Command opcodes and argument encodings for the PPK2 serial protocol.

use crate::config::{MAX_SUPPLY_VOLTAGE_MV, MIN_SUPPLY_VOLTAGE_MV};

// Command opcodes
pub const CMD_AVERAGE_START: u8 = 0x06;
pub const CMD_AVERAGE_STOP: u8 = 0x07;
pub const CMD_DEVICE_RUNNING_SET: u8 = 0x0C;
pub const CMD_REGULATOR_SET: u8 = 0x0D;
pub const CMD_SET_POWER_MODE: u8 = 0x11;
pub const CMD_GET_META_DATA: u8 = 0x19;

// SET_POWER_MODE arguments
pub const POWER_MODE_SOURCE: u8 = 0x02;

// DEVICE_RUNNING_SET arguments
pub const DUT_POWER_OFF: u8 = 0x00;
pub const DUT_POWER_ON: u8 = 0x01;

/// Terminator of the metadata block sent in reply to GET_META_DATA
pub const METADATA_END: &str = "END";

/// Size of one sample word on the wire
pub const SAMPLE_SIZE: usize = 4;

/// Regulator setting 800 mV encodes as [3, 32]; every further millivolt
/// adds one to the 16-bit value.
const REGULATOR_BASE: u16 = 3 * 256;
const REGULATOR_OFFSET: u16 = 32;

/// DUT power switch state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutPower {
    On,
    Off,
}

impl DutPower {
    pub fn as_arg(self) -> u8 {
        match self {
            DutPower::On => DUT_POWER_ON,
            DutPower::Off => DUT_POWER_OFF,
        }
    }
}

/// Clamp a supply voltage to the regulator's range
pub fn clamp_voltage(mv: u16) -> u16 {
    mv.clamp(MIN_SUPPLY_VOLTAGE_MV, MAX_SUPPLY_VOLTAGE_MV)
}

/// Encode a supply voltage as the two REGULATOR_SET argument bytes
///
/// Out of range values are clamped to 800..=5000 mV first.
pub fn encode_source_voltage(mv: u16) -> [u8; 2] {
    let setting = REGULATOR_BASE + (clamp_voltage(mv) - MIN_SUPPLY_VOLTAGE_MV) + REGULATOR_OFFSET;
    setting.to_be_bytes()
}
