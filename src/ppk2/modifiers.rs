//! # Calibration Modifiers
//!
//! Per-range calibration coefficients read from the PPK2 metadata block.
//!
//! The metadata is plain text, one `key: value` pair per line, terminated by
//! `END`. Per-range keys carry the range index as a suffix (`R0` .. `R4`).

use tracing::{debug, warn};

/// Number of measurement ranges of the PPK2
pub const RANGE_COUNT: usize = 5;

/// Calibration coefficients, one entry per measurement range
#[derive(Debug, Clone, PartialEq)]
pub struct Modifiers {
    /// Shunt resistance (ohms)
    pub r: [f64; RANGE_COUNT],
    /// Gain slope
    pub gs: [f64; RANGE_COUNT],
    /// Gain intercept
    pub gi: [f64; RANGE_COUNT],
    /// ADC offset
    pub o: [f64; RANGE_COUNT],
    /// Voltage-dependent slope
    pub s: [f64; RANGE_COUNT],
    /// Voltage-dependent intercept
    pub i: [f64; RANGE_COUNT],
    /// User gain
    pub ug: [f64; RANGE_COUNT],
    pub calibrated: Option<String>,
    pub hw: Option<String>,
    pub ia: Option<String>,
}

impl Default for Modifiers {
    fn default() -> Self {
        Self {
            r: [1031.64, 101.65, 10.15, 0.94, 0.043],
            gs: [1.0; RANGE_COUNT],
            gi: [1.0; RANGE_COUNT],
            o: [0.0; RANGE_COUNT],
            s: [0.0; RANGE_COUNT],
            i: [0.0; RANGE_COUNT],
            ug: [1.0; RANGE_COUNT],
            calibrated: None,
            hw: None,
            ia: None,
        }
    }
}

impl Modifiers {
    /// Apply a metadata block on top of the current values
    ///
    /// Unknown keys and unparsable values are skipped. A shunt resistance of
    /// zero is ignored, since some units ship with it miscalibrated.
    ///
    /// Returns the number of coefficients that were updated.
    pub fn apply_metadata(&mut self, metadata: &str) -> usize {
        let mut updated = 0;

        for line in metadata.lines() {
            let Some((key, value)) = line.split_once(": ") else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "Calibrated" => self.calibrated = Some(value.to_string()),
                "HW" => self.hw = Some(value.to_string()),
                "IA" => self.ia = Some(value.to_string()),
                _ => {
                    if self.apply_coefficient(key, value) {
                        updated += 1;
                    }
                }
            }
        }

        debug!("Applied {} calibration coefficients", updated);
        updated
    }

    /// One-line description of the unit, for the startup log
    pub fn hardware_summary(&self) -> String {
        let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "unknown".to_string());
        format!(
            "hw {}, calibrated {}, ia {}",
            field(&self.hw),
            field(&self.calibrated),
            field(&self.ia)
        )
    }

    fn apply_coefficient(&mut self, key: &str, value: &str) -> bool {
        let Some((name, index)) = split_range_key(key) else {
            return false;
        };

        let table = match name {
            "R" => &mut self.r,
            "GS" => &mut self.gs,
            "GI" => &mut self.gi,
            "O" => &mut self.o,
            "S" => &mut self.s,
            "I" => &mut self.i,
            "UG" => &mut self.ug,
            _ => return false,
        };

        let parsed: f64 = match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Ignoring unparsable calibration value {}={}", key, value);
                return false;
            }
        };

        if name == "R" && parsed == 0.0 {
            warn!("Ignoring zero shunt resistance for {}", key);
            return false;
        }

        table[index] = parsed;
        true
    }
}

/// Split `GS3` into `("GS", 3)`
fn split_range_key(key: &str) -> Option<(&str, usize)> {
    let (last, _) = key.char_indices().last()?;
    let (name, digit) = key.split_at(last);
    let index = digit.parse::<usize>().ok()?;
    (index < RANGE_COUNT && !name.is_empty()).then_some((name, index))
}
