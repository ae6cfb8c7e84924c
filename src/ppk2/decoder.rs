//! # PPK2 Sample Decoder
//!
//! Turns the raw measurement stream into calibrated current readings.
//!
//! Each sample is a 32-bit little-endian word:
//!
//! | Bits  | Field                          |
//! |-------|--------------------------------|
//! | 0-13  | ADC value (scaled by 4)        |
//! | 14-16 | Measurement range (0-4)        |
//! | 18-23 | Counter (unused here)          |
//! | 24-31 | Logic port bits (unused here)  |
//!
//! Serial reads do not line up with word boundaries, so a trailing partial
//! word is kept and prepended to the next buffer.

use super::modifiers::{Modifiers, RANGE_COUNT};
use super::protocol::SAMPLE_SIZE;

const ADC_MASK: u32 = 0x3FFF;
const RANGE_SHIFT: u32 = 14;
const RANGE_MASK: u32 = 0x7;

/// Volts per ADC count after the x4 scaling
const ADC_MULT: f64 = 1.8 / 163_840.0;

/// Rolling average weight used in ranges 0-3
const SPIKE_FILTER_ALPHA: f64 = 0.18;
/// Rolling average weight used in range 4
const SPIKE_FILTER_ALPHA5: f64 = 0.06;
/// Samples smoothed after a range switch
const SPIKE_FILTER_SAMPLES: u32 = 3;

/// Smooths the transients the PPK2 produces when it switches ranges
#[derive(Debug, Default, Clone)]
pub struct SpikeFilter {
    rolling_avg: Option<f64>,
    rolling_avg4: Option<f64>,
    prev_range: Option<usize>,
    consecutive_range_samples: u32,
    after_spike: u32,
}

impl SpikeFilter {
    /// Feed one reading (amps) taken in `range`, get the filtered value back
    pub fn apply(&mut self, range: usize, value: f64) -> f64 {
        let prev_avg = self.rolling_avg;
        let prev_avg4 = self.rolling_avg4;

        self.rolling_avg = Some(match prev_avg {
            Some(avg) => SPIKE_FILTER_ALPHA * value + (1.0 - SPIKE_FILTER_ALPHA) * avg,
            None => value,
        });
        self.rolling_avg4 = Some(match prev_avg4 {
            Some(avg) => SPIKE_FILTER_ALPHA5 * value + (1.0 - SPIKE_FILTER_ALPHA5) * avg,
            None => value,
        });

        let prev_range = *self.prev_range.get_or_insert(range);
        let mut filtered = value;

        if prev_range != range || self.after_spike > 0 {
            if prev_range != range {
                self.consecutive_range_samples = 0;
                self.after_spike = SPIKE_FILTER_SAMPLES;
            } else {
                self.consecutive_range_samples += 1;
            }

            if range == RANGE_COUNT - 1 {
                if self.consecutive_range_samples < 2 {
                    self.rolling_avg = prev_avg;
                    self.rolling_avg4 = prev_avg4;
                }
                filtered = self.rolling_avg4.unwrap_or(value);
            } else {
                filtered = self.rolling_avg.unwrap_or(value);
            }

            self.after_spike -= 1;
        }

        self.prev_range = Some(range);
        filtered
    }
}

/// Stateful decoder for the PPK2 measurement stream
#[derive(Debug, Default, Clone)]
pub struct SampleDecoder {
    modifiers: Modifiers,
    filter: SpikeFilter,
    remainder: Vec<u8>,
}

impl SampleDecoder {
    pub fn modifiers(&self) -> &Modifiers {
        &self.modifiers
    }

    pub fn set_modifiers(&mut self, modifiers: Modifiers) {
        self.modifiers = modifiers;
    }

    /// Bytes of an incomplete word waiting for the next buffer
    pub fn pending_bytes(&self) -> usize {
        self.remainder.len()
    }

    /// Forget any partial word and filter state
    pub fn reset(&mut self) {
        self.filter = SpikeFilter::default();
        self.remainder.clear();
    }

    /// Decode a raw buffer into current readings in microamps
    ///
    /// # Arguments
    ///
    /// * `buf` - Bytes read from the device since the last call
    /// * `vdd_mv` - Supply voltage currently set on the device
    pub fn decode(&mut self, buf: &[u8], vdd_mv: u16) -> Vec<f64> {
        let mut data = std::mem::take(&mut self.remainder);
        data.extend_from_slice(buf);

        let mut chunks = data.chunks_exact(SAMPLE_SIZE);
        let samples = chunks
            .by_ref()
            .map(|word| {
                let raw = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                self.convert(raw, vdd_mv) * 1e6
            })
            .collect();

        self.remainder = chunks.remainder().to_vec();
        samples
    }

    /// Calibrated and filtered current of one sample word, in amps
    fn convert(&mut self, raw: u32, vdd_mv: u16) -> f64 {
        let range = (((raw >> RANGE_SHIFT) & RANGE_MASK) as usize).min(RANGE_COUNT - 1);
        let adc = f64::from((raw & ADC_MASK) * 4);
        let m = &self.modifiers;

        let without_gain = (adc - m.o[range]) * (ADC_MULT / m.r[range]);
        let current = m.ug[range]
            * (without_gain * (m.gs[range] * without_gain + m.gi[range])
                + (m.s[range] * (f64::from(vdd_mv) / 1000.0) + m.i[range]));

        self.filter.apply(range, current)
    }
}
