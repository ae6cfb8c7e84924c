//! # Run Orchestration
//!
//! Discovery, session setup, the acquisition loop and teardown, in that
//! order. The device session is always torn down once it was started,
//! whether the loop completes, fails or is interrupted.

use async_trait::async_trait;
use chrono::Local;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::acquisition::{Acquisition, AcquisitionPlan, AcquisitionSummary};
use crate::config::Config;
use crate::error::{Ppk2LoggerError, Result};
use crate::ppk2::{Ppk2, PowerProfiler};
use crate::serial::{self, DeviceInfo, PortEnumerator, TokioSerialPort};
use crate::session::Session;
use crate::telemetry::CsvLog;

/// Opens a profiler for a discovered device
#[async_trait]
pub trait Connector: Sync {
    type Device: PowerProfiler;

    async fn connect(&self, device: &DeviceInfo) -> Result<Self::Device>;
}

/// Connects to a real PPK2 over its serial port
#[derive(Debug, Clone, Copy)]
pub struct SerialConnector {
    pub timeout: Duration,
}

impl SerialConnector {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_millis(config.device.timeout_ms),
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    type Device = Ppk2<TokioSerialPort>;

    async fn connect(&self, device: &DeviceInfo) -> Result<Self::Device> {
        let port = serial::open_port(&device.port, self.timeout)?;
        Ok(Ppk2::new(port))
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// No PPK2 attached; nothing was touched
    NoDevice,
    /// More PPK2 ports than accepted; nothing was touched
    TooManyDevices(String),
    /// Every planned iteration ran
    Completed(AcquisitionSummary),
    /// Shutdown was requested mid-run
    Interrupted(AcquisitionSummary),
}

/// Pick the device from config or discovery
fn resolve_device<E: PortEnumerator + ?Sized>(config: &Config, ports: &E) -> Result<DeviceInfo> {
    if let Some(port) = &config.device.port {
        info!("Using configured PPK2 port {}", port);
        return Ok(DeviceInfo {
            port: port.clone(),
            serial_number: String::from("unknown"),
        });
    }

    let devices = serial::list_devices(ports)?;
    serial::select_device(devices, config.device.max_ports)
}

/// Run one logging session
///
/// `shutdown` resolves when the run should stop early (Ctrl+C in the
/// binary). It is watched from session setup onwards, settling delay
/// included. Device-count problems are reported as outcomes rather than
/// errors, since nothing was started.
///
/// # Errors
///
/// Returns error on port enumeration, connection, session setup, file or
/// device I/O failures. The session is torn down before a loop error is
/// returned.
pub async fn run<E, C, S>(config: &Config, ports: &E, connector: &C, shutdown: S) -> Result<RunOutcome>
where
    E: PortEnumerator + ?Sized,
    C: Connector,
    S: Future<Output = ()>,
{
    let device_info = match resolve_device(config, ports) {
        Ok(device_info) => device_info,
        Err(Ppk2LoggerError::DeviceNotFound) => {
            warn!("No PPK2s detected");
            return Ok(RunOutcome::NoDevice);
        }
        Err(Ppk2LoggerError::TooManyDevices(devices)) => {
            warn!("Too many PPK2s detected: {}", devices);
            return Ok(RunOutcome::TooManyDevices(devices));
        }
        Err(e) => return Err(e),
    };

    let device = connector.connect(&device_info).await?;
    let mut session = Session::new(device);
    let mut acquisition = Acquisition::new(
        AcquisitionPlan::from_config(config),
        config.logging.average_weighting,
    );

    tokio::pin!(shutdown);

    let started = tokio::select! {
        biased;
        _ = &mut shutdown => false,
        result = session.start(config) => {
            result?;
            true
        }
    };
    if !started {
        info!("Shutdown requested during session setup");
        session.teardown().await?;
        return Ok(RunOutcome::Interrupted(acquisition.summary()));
    }

    let opened = Local::now().naive_local();
    let mut log = match CsvLog::create(&config.logging.log_dir, opened) {
        Ok(log) => log,
        Err(e) => {
            error!("Failed to create log file: {}", e);
            if let Err(teardown_err) = session.teardown().await {
                warn!("Teardown failed: {}", teardown_err);
            }
            return Err(e);
        }
    };

    let result = tokio::select! {
        result = acquisition.run(session.device(), &mut log) => result.map(RunOutcome::Completed),
        _ = &mut shutdown => {
            info!("Shutdown requested, stopping acquisition");
            Ok(RunOutcome::Interrupted(acquisition.summary()))
        }
    };

    let teardown = session.teardown().await;
    let finish = log.finish().map(|_| ());

    let outcome = result?;
    teardown?;
    finish?;

    let summary = acquisition.summary();
    info!(
        "Finished after {} iterations: {} rows logged, {} empty polls, total average {:.3} mA",
        summary.iterations, summary.rows_logged, summary.empty_polls, summary.total_average_ma
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AverageWeighting;
    use crate::ppk2::DutPower;
    use crate::serial::{MockPortEnumerator, PPK2_USB_PID, PPK2_USB_VID};
    use crate::session::mocks::{Call, MockProfiler};
    use std::sync::{Arc, Mutex};
    use tokio_serial::{SerialPortInfo, SerialPortType, UsbPortInfo};

    /// Hands out a shared [`MockProfiler`] and records what it connected to
    struct MockConnector {
        device: MockProfiler,
        connected: Arc<Mutex<Vec<DeviceInfo>>>,
    }

    impl MockConnector {
        fn new(device: MockProfiler) -> Self {
            Self {
                device,
                connected: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn connected(&self) -> Vec<DeviceInfo> {
            self.connected.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Device = MockProfiler;

        async fn connect(&self, device: &DeviceInfo) -> Result<MockProfiler> {
            self.connected.lock().unwrap().push(device.clone());
            Ok(self.device.clone())
        }
    }

    fn ppk2_port(name: &str, serial: &str) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid: PPK2_USB_VID,
                pid: PPK2_USB_PID,
                serial_number: Some(serial.to_string()),
                manufacturer: Some("Nordic Semiconductor".to_string()),
                product: Some("PPK2".to_string()),
            }),
        }
    }

    fn enumerator(ports: Vec<SerialPortInfo>) -> MockPortEnumerator {
        let mut enumerator = MockPortEnumerator::new();
        enumerator
            .expect_available_ports()
            .times(1)
            .returning(move || Ok(ports.clone()));
        enumerator
    }

    /// One log per second for one minute: 60 iterations
    fn test_config(log_dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.device.settle_ms = 0;
        config.logging.log_dir = log_dir.to_string_lossy().into_owned();
        config.logging.logs_per_second = 1;
        config.duration.hours = -1;
        config.duration.minutes = 1;
        config
    }

    fn read_log(dir: &std::path::Path) -> String {
        let entry = std::fs::read_dir(dir).unwrap().next().unwrap().unwrap();
        std::fs::read_to_string(entry.path()).unwrap()
    }

    #[tokio::test]
    async fn test_no_device_makes_no_session_calls() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let profiler = MockProfiler::new();
        let connector = MockConnector::new(profiler.clone());

        let outcome = run(&config, &enumerator(vec![]), &connector, std::future::pending())
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::NoDevice);
        assert!(connector.connected().is_empty());
        assert!(profiler.calls().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_too_many_devices_makes_no_session_calls() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let profiler = MockProfiler::new();
        let connector = MockConnector::new(profiler.clone());
        let ports = vec![
            ppk2_port("/dev/ttyACM0", "AAAA0000"),
            ppk2_port("/dev/ttyACM1", "AAAA0000"),
            ppk2_port("/dev/ttyACM2", "BBBB1111"),
        ];

        let outcome = run(&config, &enumerator(ports), &connector, std::future::pending())
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::TooManyDevices(_)));
        assert!(connector.connected().is_empty());
        assert!(profiler.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_with_one_device() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let iterations = config.total_sample_count() as usize;

        let mut batches = vec![vec![2000.0]; iterations];
        batches[1] = vec![];
        let profiler = MockProfiler::with_batches(batches);
        let connector = MockConnector::new(profiler.clone());

        let outcome = run(
            &config,
            &enumerator(vec![ppk2_port("/dev/ttyACM0", "C2D4E6F8A0B2")]),
            &connector,
            std::future::pending(),
        )
        .await
        .unwrap();

        let summary = match outcome {
            RunOutcome::Completed(summary) => summary,
            other => panic!("Expected Completed, got {:?}", other),
        };
        assert_eq!(summary.iterations, 60);
        assert_eq!(summary.rows_logged, 59);
        assert_eq!(summary.empty_polls, 1);

        assert_eq!(
            connector.connected(),
            vec![DeviceInfo {
                port: "/dev/ttyACM0".to_string(),
                serial_number: "C2D4E6F8".to_string(),
            }]
        );

        let log = read_log(dir.path());
        let mut lines = log.lines();
        assert_eq!(lines.next(), Some("date,time,average"));
        assert_eq!(lines.clone().count(), 59);
        assert!(lines.all(|line| line.ends_with(",2.000")));

        let calls = profiler.calls();
        assert_eq!(
            &calls[..5],
            &[
                Call::GetModifiers,
                Call::SetSourceVoltage(5000),
                Call::UseSourceMeter,
                Call::DutPower(DutPower::On),
                Call::StartMeasuring,
            ]
        );
        assert_eq!(
            &calls[calls.len() - 2..],
            &[Call::DutPower(DutPower::Off), Call::StopMeasuring]
        );
        assert_eq!(calls.iter().filter(|c| **c == Call::StopMeasuring).count(), 1);
        assert_eq!(calls.iter().filter(|c| **c == Call::GetData).count(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_tears_down_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let profiler = MockProfiler::with_batches(vec![vec![1000.0]; 60]);
        let connector = MockConnector::new(profiler.clone());

        let shutdown = tokio::time::sleep(Duration::from_millis(10_500));
        let outcome = run(
            &config,
            &enumerator(vec![ppk2_port("/dev/ttyACM0", "C2D4E6F8")]),
            &connector,
            async move { shutdown.await },
        )
        .await
        .unwrap();

        let summary = match outcome {
            RunOutcome::Interrupted(summary) => summary,
            other => panic!("Expected Interrupted, got {:?}", other),
        };
        assert_eq!(summary.iterations, 10);
        assert_eq!(summary.rows_logged, 10);

        let calls = profiler.calls();
        assert_eq!(
            &calls[calls.len() - 2..],
            &[Call::DutPower(DutPower::Off), Call::StopMeasuring]
        );
        assert_eq!(calls.iter().filter(|c| **c == Call::StopMeasuring).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_settle_tears_down_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.device.settle_ms = 1000;
        let profiler = MockProfiler::with_batches(vec![vec![1000.0]; 60]);
        let connector = MockConnector::new(profiler.clone());

        let shutdown = tokio::time::sleep(Duration::from_millis(500));
        let outcome = run(
            &config,
            &enumerator(vec![ppk2_port("/dev/ttyACM0", "C2D4E6F8")]),
            &connector,
            async move { shutdown.await },
        )
        .await
        .unwrap();

        let summary = match outcome {
            RunOutcome::Interrupted(summary) => summary,
            other => panic!("Expected Interrupted, got {:?}", other),
        };
        assert_eq!(summary.iterations, 0);
        assert_eq!(summary.rows_logged, 0);

        assert_eq!(
            profiler.calls(),
            vec![
                Call::GetModifiers,
                Call::SetSourceVoltage(5000),
                Call::UseSourceMeter,
                Call::DutPower(DutPower::On),
                Call::StartMeasuring,
                Call::DutPower(DutPower::Off),
                Call::StopMeasuring,
            ]
        );
        // No log file is opened for a run that never started logging
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_before_setup_sends_only_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let profiler = MockProfiler::new();
        let connector = MockConnector::new(profiler.clone());

        let outcome = run(
            &config,
            &enumerator(vec![ppk2_port("/dev/ttyACM0", "C2D4E6F8")]),
            &connector,
            std::future::ready(()),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, RunOutcome::Interrupted(_)));
        assert_eq!(
            profiler.calls(),
            vec![Call::DutPower(DutPower::Off), Call::StopMeasuring]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_error_still_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let profiler = MockProfiler::with_batches(vec![vec![1000.0]; 60]);
        profiler.fail_on(Call::GetData);
        let connector = MockConnector::new(profiler.clone());

        let result = run(
            &config,
            &enumerator(vec![ppk2_port("/dev/ttyACM0", "C2D4E6F8")]),
            &connector,
            std::future::pending(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(profiler.calls().last(), Some(&Call::StopMeasuring));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_port_skips_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.device.port = Some("/dev/ttyACM5".to_string());
        config.logging.average_weighting = AverageWeighting::LoggedRows;
        let profiler = MockProfiler::with_batches(vec![vec![1000.0]; 60]);
        let connector = MockConnector::new(profiler.clone());

        let mut ports = MockPortEnumerator::new();
        ports.expect_available_ports().never();

        let outcome = run(&config, &ports, &connector, std::future::pending())
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(connector.connected()[0].port, "/dev/ttyACM5");
    }
}
