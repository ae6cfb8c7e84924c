//! # Telemetry Module
//!
//! Handles the CSV current log.
//!
//! This module handles:
//! - Naming the log file after the run's start time
//! - Writing the `date,time,average` header once
//! - Formatting one row per logged interval (millisecond timestamp, mA to 3 decimals)
//! - Flushing every row so an aborted run keeps what it measured

pub mod logger;
pub mod record;

pub use logger::CsvLog;
pub use record::LogRecord;
