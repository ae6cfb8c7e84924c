//! # Acquisition Loop
//!
//! Fixed-count polling loop that turns the measurement stream into
//! per-interval averages.
//!
//! Each iteration sleeps for the poll interval, pulls whatever the device
//! buffered, averages it and appends a CSV row. The sleep does not account
//! for the time spent polling and writing, so a run takes slightly longer
//! than its nominal duration. Empty polls produce no row but still count as
//! an iteration.

use chrono::{Local, NaiveDateTime};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{AverageWeighting, Config};
use crate::error::Result;
use crate::ppk2::PowerProfiler;
use crate::telemetry::{CsvLog, LogRecord};

/// Microamps per milliamp
const UA_PER_MA: f64 = 1000.0;

/// Iteration count and spacing of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionPlan {
    pub iterations: u64,
    pub interval: Duration,
}

impl AcquisitionPlan {
    pub fn from_config(config: &Config) -> Self {
        Self {
            iterations: config.total_sample_count(),
            interval: config.poll_interval(),
        }
    }

    /// Nominal run time, not counting polling overhead
    ///
    /// Saturates at `u64::MAX` nanoseconds.
    pub fn nominal_duration(&self) -> Duration {
        let nanos = self.interval.as_nanos().saturating_mul(u128::from(self.iterations));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Streaming mean of the interval averages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningAverage {
    weighting: AverageWeighting,
    value: f64,
    logged: u64,
}

impl RunningAverage {
    pub fn new(weighting: AverageWeighting) -> Self {
        Self {
            weighting,
            value: 0.0,
            logged: 0,
        }
    }

    /// Fold one interval average into the total
    ///
    /// `loop_index` is the zero-based iteration that produced `sample`.
    /// With [`AverageWeighting::LoopIndex`] it is the weight of the old
    /// value even when earlier iterations logged nothing, which pulls the
    /// total towards zero after empty polls. [`AverageWeighting::LoggedRows`]
    /// weights by the rows logged so far and gives the true mean.
    pub fn update(&mut self, loop_index: u64, sample: f64) -> f64 {
        let weight = match self.weighting {
            AverageWeighting::LoopIndex => loop_index,
            AverageWeighting::LoggedRows => self.logged,
        } as f64;

        self.value = (self.value * weight + sample) / (weight + 1.0);
        self.logged += 1;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn logged(&self) -> u64 {
        self.logged
    }
}

/// Counters of a finished or interrupted run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSummary {
    /// Iterations started (each one slept and polled)
    pub iterations: u64,
    pub rows_logged: u64,
    pub empty_polls: u64,
    /// Total average in mA
    pub total_average_ma: f64,
}

/// One logged interval and the running total after it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub record: LogRecord,
    /// Total average in mA after this row
    pub total_average_ma: f64,
}

impl Progress {
    /// Console line printed for every logged row
    pub fn line(&self) -> String {
        format!(
            "{}: {} mA Total Average: {} mA",
            self.record.timestamp_field(),
            self.record.average_field(),
            self.total_average_ma
        )
    }
}

/// State of the polling loop
///
/// The counters live outside the loop future so they stay readable when
/// the future is dropped on Ctrl+C.
pub struct Acquisition {
    plan: AcquisitionPlan,
    average: RunningAverage,
    iterations: u64,
    empty_polls: u64,
    clock: Box<dyn FnMut() -> NaiveDateTime + Send>,
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("plan", &self.plan)
            .field("average", &self.average)
            .field("iterations", &self.iterations)
            .field("empty_polls", &self.empty_polls)
            .finish_non_exhaustive()
    }
}

impl Acquisition {
    pub fn new(plan: AcquisitionPlan, weighting: AverageWeighting) -> Self {
        Self::with_clock(plan, weighting, || Local::now().naive_local())
    }

    /// Use a custom wall clock for row timestamps
    pub fn with_clock<F>(plan: AcquisitionPlan, weighting: AverageWeighting, clock: F) -> Self
    where
        F: FnMut() -> NaiveDateTime + Send + 'static,
    {
        Self {
            plan,
            average: RunningAverage::new(weighting),
            iterations: 0,
            empty_polls: 0,
            clock: Box::new(clock),
        }
    }

    pub fn summary(&self) -> AcquisitionSummary {
        AcquisitionSummary {
            iterations: self.iterations,
            rows_logged: self.average.logged(),
            empty_polls: self.empty_polls,
            total_average_ma: self.average.value(),
        }
    }

    /// Run every planned iteration
    ///
    /// # Errors
    ///
    /// Device and file errors end the loop immediately; the caller is
    /// responsible for tearing the session down.
    pub async fn run<D, W>(&mut self, device: &mut D, log: &mut CsvLog<W>) -> Result<AcquisitionSummary>
    where
        D: PowerProfiler,
        W: Write + Send,
    {
        info!(
            "Logging {} intervals of {:?} (nominal {:?})",
            self.plan.iterations,
            self.plan.interval,
            self.plan.nominal_duration()
        );

        for i in 0..self.plan.iterations {
            tokio::time::sleep(self.plan.interval).await;
            self.iterations = i + 1;

            if let Some(progress) = self.poll(i, device, log).await? {
                info!("{}", progress.line());
            }
        }

        Ok(self.summary())
    }

    /// Poll once and log a row if the device sent complete samples
    async fn poll<D, W>(&mut self, index: u64, device: &mut D, log: &mut CsvLog<W>) -> Result<Option<Progress>>
    where
        D: PowerProfiler,
        W: Write + Send,
    {
        let data = device.get_data().await?;
        if data.is_empty() {
            self.empty_polls += 1;
            debug!("Iteration {}: no data", index);
            return Ok(None);
        }

        let samples = device.get_samples(&data);
        let Some(mean_ua) = mean(&samples) else {
            self.empty_polls += 1;
            debug!("Iteration {}: {} bytes held no complete sample", index, data.len());
            return Ok(None);
        };

        let average_ma = mean_ua / UA_PER_MA;
        let total_average_ma = self.average.update(index, average_ma);
        let record = LogRecord::new((self.clock)(), average_ma);
        log.append(&record)?;

        Ok(Some(Progress { record, total_average_ma }))
    }
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}
