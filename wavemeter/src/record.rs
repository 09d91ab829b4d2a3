//! Session record files.
//!
//! One file per streaming session, named after the local start time
//! (`2024-05-01-13-45-07.txt`). Each sample is one line:
//!
//! ```text
//! <unix_timestamp>,(<frequency_hz>,<power>)
//! ```
//!
//! Every line is written with a single open/append/close, so an interrupted
//! session never leaves a partial line behind.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use tracing::info;

use crate::bristol::Measurement;

/// `strftime` pattern for session file names.
pub const SESSION_NAME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Appends measurements to a per-session text file.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    path: PathBuf,
}

impl SessionRecorder {
    /// Start a session file in `dir`, named after the current local time.
    pub fn create_in(dir: impl AsRef<Path>) -> io::Result<Self> {
        Self::create_at_time(dir, Local::now())
    }

    /// Start a session file in `dir` named after `started`.
    ///
    /// Fails if a file for the same second already exists.
    pub fn create_at_time(dir: impl AsRef<Path>, started: DateTime<Local>) -> io::Result<Self> {
        let name = format!("{}.txt", started.format(SESSION_NAME_FORMAT));
        let path = dir.as_ref().join(name);
        OpenOptions::new().write(true).create_new(true).open(&path)?;
        info!("Recording session to {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one sample.
    pub fn append(&self, measurement: &Measurement) -> io::Result<()> {
        let line = format_line(measurement);
        let mut file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

/// Format one record line, including the trailing newline.
pub fn format_line(measurement: &Measurement) -> String {
    format!(
        "{},({},{})\n",
        unix_seconds(measurement.sample_time),
        measurement.frequency_hz,
        measurement.power
    )
}

fn unix_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_micros() as f64 / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bristol::Reading;
    use chrono::TimeZone;

    fn sample(secs: i64, frequency_hz: f64, power: f64) -> Measurement {
        let time = Utc.timestamp_opt(secs, 500_000_000).unwrap();
        Measurement::new(Reading::Frequency(frequency_hz), power, time)
    }

    #[test]
    fn test_line_format() {
        let line = format_line(&sample(1_700_000_000, 351_721_608_900_000.0, 0.25));
        assert_eq!(line, "1700000000.5,(351721608900000,0.25)\n");
    }

    #[test]
    fn test_no_signal_line() {
        let time = Utc.timestamp_opt(10, 0).unwrap();
        let line = format_line(&Measurement::new(Reading::NoSignal, 0.0, time));
        assert_eq!(line, "10,(0,0)\n");
    }

    #[test]
    fn test_session_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let started = Local.with_ymd_and_hms(2024, 5, 1, 13, 45, 7).unwrap();
        let recorder = SessionRecorder::create_at_time(dir.path(), started).unwrap();
        assert_eq!(
            recorder.path().file_name().unwrap().to_str().unwrap(),
            "2024-05-01-13-45-07.txt"
        );
        assert!(recorder.path().exists());

        // Same second again would clobber the first session
        assert!(SessionRecorder::create_at_time(dir.path(), started).is_err());
    }

    #[test]
    fn test_append_accumulates_lines() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = SessionRecorder::create_in(dir.path()).unwrap();
        recorder.append(&sample(1, 2.0, 3.0)).unwrap();
        recorder.append(&sample(4, 5.0, 6.0)).unwrap();

        let contents = std::fs::read_to_string(recorder.path()).unwrap();
        assert_eq!(contents, "1.5,(2,3)\n4.5,(5,6)\n");
    }
}
