//! # Measurement Session
//!
//! Owns the profiler for the duration of a run: configures it for
//! source-meter logging and powers the DUT down again afterwards.

use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::ppk2::{DutPower, PowerProfiler};

/// A configured, measuring profiler
///
/// Call [`Session::teardown`] exactly once when done. Dropping a session
/// that was not torn down leaves the DUT powered, which is logged.
#[derive(Debug)]
pub struct Session<D: PowerProfiler> {
    device: D,
    torn_down: bool,
}

impl<D: PowerProfiler> Session<D> {
    /// Take ownership of the device; nothing is sent yet
    pub fn new(device: D) -> Self {
        Self {
            device,
            torn_down: false,
        }
    }

    /// Configure the device and start the measurement stream
    ///
    /// Steps, in order: read modifiers, set the supply voltage, select
    /// source meter mode, power the DUT, start measuring, then wait
    /// `settle_ms`. The future may be dropped at any await point; the
    /// session still owns the device and can be torn down afterwards.
    ///
    /// # Errors
    ///
    /// If any step fails the device is torn down (DUT power off, stop
    /// measuring) before the error is returned.
    pub async fn start(&mut self, config: &Config) -> Result<()> {
        if let Err(e) = self.configure(config).await {
            error!("Session setup failed: {}", e);
            if let Err(teardown_err) = self.teardown().await {
                warn!("Teardown after failed setup also failed: {}", teardown_err);
            }
            return Err(e);
        }

        let settle = Duration::from_millis(config.device.settle_ms);
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        Ok(())
    }

    async fn configure(&mut self, config: &Config) -> Result<()> {
        self.device.get_modifiers().await?;
        self.device.set_source_voltage(config.device.supply_voltage_mv).await?;
        self.device.use_source_meter().await?;
        self.device.toggle_dut_power(DutPower::On).await?;
        self.device.start_measuring().await?;

        info!(
            "Measuring in source meter mode at {} mV",
            config.device.supply_voltage_mv
        );
        Ok(())
    }

    pub fn device(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Power the DUT off, then stop measuring
    ///
    /// Both steps are attempted even if the first one fails; the first
    /// error is returned. Later calls do nothing.
    pub async fn teardown(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        let power = self.device.toggle_dut_power(DutPower::Off).await;
        let stop = self.device.stop_measuring().await;
        info!("Session closed: DUT power off, measurement stopped");

        power.and(stop)
    }
}

impl<D: PowerProfiler> Drop for Session<D> {
    fn drop(&mut self) {
        if !self.torn_down {
            warn!("Session dropped without teardown, DUT may still be powered");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::{Call, MockProfiler};
    use super::*;

    fn quick_config() -> Config {
        let mut config = Config::default();
        config.device.settle_ms = 0;
        config.device.supply_voltage_mv = 3300;
        config
    }

    #[tokio::test]
    async fn test_start_runs_configuration_in_order() {
        let mock = MockProfiler::new();
        let mut session = Session::new(mock.clone());
        session.start(&quick_config()).await.unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                Call::GetModifiers,
                Call::SetSourceVoltage(3300),
                Call::UseSourceMeter,
                Call::DutPower(DutPower::On),
                Call::StartMeasuring,
            ]
        );

        session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_powers_off_then_stops_once() {
        let mock = MockProfiler::new();
        let mut session = Session::new(mock.clone());
        session.start(&quick_config()).await.unwrap();

        session.teardown().await.unwrap();
        session.teardown().await.unwrap();
        assert!(session.is_torn_down());

        let calls = mock.calls();
        assert_eq!(
            &calls[calls.len() - 2..],
            &[Call::DutPower(DutPower::Off), Call::StopMeasuring]
        );
        assert_eq!(calls.iter().filter(|c| **c == Call::StopMeasuring).count(), 1);
    }

    #[tokio::test]
    async fn test_failed_setup_tears_down() {
        let mock = MockProfiler::new();
        mock.fail_on(Call::StartMeasuring);

        let mut session = Session::new(mock.clone());
        assert!(session.start(&quick_config()).await.is_err());
        assert!(session.is_torn_down());

        let calls = mock.calls();
        assert_eq!(
            &calls[calls.len() - 3..],
            &[Call::StartMeasuring, Call::DutPower(DutPower::Off), Call::StopMeasuring]
        );
    }

    #[tokio::test]
    async fn test_teardown_attempts_stop_after_power_off_failure() {
        let mock = MockProfiler::new();
        let mut session = Session::new(mock.clone());
        session.start(&quick_config()).await.unwrap();
        mock.fail_on(Call::DutPower(DutPower::Off));

        assert!(session.teardown().await.is_err());
        assert_eq!(mock.calls().last(), Some(&Call::StopMeasuring));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_waits_for_settle_delay() {
        let mut config = quick_config();
        config.device.settle_ms = 1000;

        let started = tokio::time::Instant::now();
        let mut session = Session::new(MockProfiler::new());
        session.start(&config).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1000));

        session.teardown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_after_dropped_start() {
        let mut config = quick_config();
        config.device.settle_ms = 1000;
        let mock = MockProfiler::new();
        let mut session = Session::new(mock.clone());

        let start = tokio::time::timeout(Duration::from_millis(500), session.start(&config)).await;
        assert!(start.is_err());

        session.teardown().await.unwrap();
        let calls = mock.calls();
        assert_eq!(calls.len(), 7);
        assert_eq!(
            &calls[5..],
            &[Call::DutPower(DutPower::Off), Call::StopMeasuring]
        );
    }
}
