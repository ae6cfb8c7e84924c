//! # Log Records
//!
//! One CSV row: local timestamp plus the interval's average current.

use chrono::NaiveDateTime;

/// Timestamp columns, split into `date` and `time`
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d,%H:%M:%S%.3f";

/// Average current of one polling interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogRecord {
    /// Local wall-clock time the interval was logged
    pub timestamp: NaiveDateTime,
    /// Mean current over the interval in milliamps
    pub average_ma: f64,
}

impl LogRecord {
    pub fn new(timestamp: NaiveDateTime, average_ma: f64) -> Self {
        Self { timestamp, average_ma }
    }

    /// `YYYY-MM-DD,HH:MM:SS.mmm`
    pub fn timestamp_field(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Average in mA, always three decimals
    pub fn average_field(&self) -> String {
        format!("{:.3}", self.average_ma)
    }

    /// Full CSV line without the trailing newline
    pub fn to_csv_row(&self) -> String {
        format!("{},{}", self.timestamp_field(), self.average_field())
    }
}
