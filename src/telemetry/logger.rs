//! # CSV Log Writer
//!
//! Writes the current log: one header row, then one row per logged interval.

use chrono::NaiveDateTime;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::record::LogRecord;
use crate::error::Result;

/// Header row of every log file
pub const CSV_HEADER: &str = "date,time,average";

/// Suffix appended to the start timestamp to form the file name
const FILE_SUFFIX: &str = "_ppk2-log.csv";

/// Start timestamp part of the file name
const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M";

/// File name for a run started at `started`
pub fn log_file_name(started: NaiveDateTime) -> String {
    format!("{}{}", started.format(FILE_TIMESTAMP_FORMAT), FILE_SUFFIX)
}

/// CSV current log over any writer
pub struct CsvLog<W: Write> {
    writer: W,
    path: Option<PathBuf>,
    rows_written: u64,
    last_timestamp: Option<NaiveDateTime>,
}

impl<W: Write> std::fmt::Debug for CsvLog<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvLog")
            .field("path", &self.path)
            .field("rows_written", &self.rows_written)
            .finish_non_exhaustive()
    }
}

impl CsvLog<BufWriter<File>> {
    /// Create `<dir>/<start>_ppk2-log.csv`, creating `dir` if needed
    ///
    /// An existing file with the same name is truncated.
    pub fn create<P: AsRef<Path>>(dir: P, started: NaiveDateTime) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let path = dir.join(log_file_name(started));
        let file = File::create(&path)?;
        info!("Logging to {}", path.display());

        let mut log = Self::new(BufWriter::new(file))?;
        log.path = Some(path);
        Ok(log)
    }
}

impl<W: Write> CsvLog<W> {
    /// Wrap a writer and emit the header row
    pub fn new(mut writer: W) -> Result<Self> {
        writeln!(writer, "{}", CSV_HEADER)?;
        writer.flush()?;

        Ok(Self {
            writer,
            path: None,
            rows_written: 0,
            last_timestamp: None,
        })
    }

    /// Append one row and flush it
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        if let Some(last) = self.last_timestamp {
            if record.timestamp <= last {
                warn!(
                    "Log timestamp {} does not advance past {}",
                    record.timestamp, last
                );
            }
        }

        writeln!(self.writer, "{}", record.to_csv_row())?;
        self.writer.flush()?;

        self.rows_written += 1;
        self.last_timestamp = Some(record.timestamp);
        Ok(())
    }

    /// Path of the backing file, if the log was created on disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and hand back the writer
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
