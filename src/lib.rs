//! # PPK2 Logger Library
//!
//! Log the current draw of a device under test with a Nordic Power Profiler
//! Kit 2.
//!
//! This library provides device discovery, a small PPK2 serial driver, the
//! fixed-rate acquisition loop and the CSV log it writes.

pub mod acquisition;
pub mod app;
pub mod config;
pub mod error;
pub mod ppk2;
pub mod serial;
pub mod session;
pub mod telemetry;
