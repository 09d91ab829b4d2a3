//! Bristol 671-series wavelength meter driver
//!
//! The wavemeter firmware serves its latest measurement over plain HTTP:
//!
//! - `GET /v1/measurement/wavelength` returns the wavelength as a bare number
//!   on the first line
//! - `GET /v1/measurement/summary` returns a record with at least
//!   `wavelength` and `power`, produced by a JavaScript-flavoured serializer
//!   whose literals are not always valid JSON (see [`normalize_literals`])
//!
//! # No Signal
//!
//! With no light on the input the firmware reports a wavelength of `0`. That
//! is not an error: it is parsed into [`Reading::NoSignal`] and surfaces as a
//! [`Measurement`] with `frequency_hz == 0.0`. Only transport failures are
//! errors. [`WavelengthSource::read_until_valid`] retries a bounded number of
//! times to ride through short dropouts, e.g. right after a switch change.
//!
//! # Units
//!
//! Frequencies are computed as `c / λ` with `λ` in meters. Firmware that
//! reports nanometers must be configured with [`WavelengthUnit::Nanometers`];
//! mixing the two silently scales every frequency by 1e9.
//!
//! # Example
//!
//! ```no_run
//! use wavemeter::bristol::{Bristol671, WavelengthSource};
//!
//! let mut wm = Bristol671::connect("192.168.0.109");
//! let m = wm.read_until_valid(25)?;
//! println!("{:.3} GHz", m.frequency_hz / 1e9);
//! # Ok::<(), wavemeter::bristol::WavemeterError>(())
//! ```

mod http;
mod mock;
mod summary;

pub use http::{HttpTransport, DEFAULT_ADDRESS, DEFAULT_TIMEOUT};
pub use mock::{ScriptedTransport, SimulatedTransport};
pub use summary::{normalize_literals, SummaryRecord};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

/// Speed of light in vacuum, m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Wavelength-only measurement endpoint.
pub const WAVELENGTH_PATH: &str = "/v1/measurement/wavelength";

/// Combined wavelength + power endpoint.
pub const SUMMARY_PATH: &str = "/v1/measurement/summary";

/// Default retry budget for [`WavelengthSource::read_until_valid`].
pub const DEFAULT_MAX_TRIES: usize = 25;

/// Errors that can occur while polling the wavemeter.
///
/// "No signal" is deliberately absent: it is a normal [`Measurement`].
#[derive(Error, Debug)]
pub enum WavemeterError {
    /// Host unreachable, timeout, HTTP error status or unreadable body.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The summary record could not be decoded, even after normalization.
    #[error("Malformed summary payload: {0}")]
    MalformedPayload(String),
}

/// Result type for wavemeter operations.
pub type WavemeterResult<T> = Result<T, WavemeterError>;

/// Unit of the wavelength values the firmware reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WavelengthUnit {
    #[default]
    Meters,
    Nanometers,
}

impl WavelengthUnit {
    pub fn to_meters(self, value: f64) -> f64 {
        match self {
            WavelengthUnit::Meters => value,
            WavelengthUnit::Nanometers => value * 1e-9,
        }
    }

    pub fn from_meters(self, meters: f64) -> f64 {
        match self {
            WavelengthUnit::Meters => meters,
            WavelengthUnit::Nanometers => meters * 1e9,
        }
    }
}

/// Convert a vacuum wavelength in meters to a frequency in Hz.
pub fn wavelength_to_frequency(wavelength_m: f64) -> f64 {
    SPEED_OF_LIGHT / wavelength_m
}

/// Outcome of interpreting one wavelength value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// A usable optical frequency in Hz.
    Frequency(f64),
    /// Zero, negative, non-numeric or non-finite wavelength.
    NoSignal,
}

impl Reading {
    /// Interpret a wavelength expressed in `unit`.
    pub fn from_wavelength(value: f64, unit: WavelengthUnit) -> Self {
        let meters = unit.to_meters(value);
        if !(meters.is_finite() && meters > 0.0) {
            return Reading::NoSignal;
        }
        let frequency = wavelength_to_frequency(meters);
        if frequency.is_finite() {
            Reading::Frequency(frequency)
        } else {
            Reading::NoSignal
        }
    }

    /// Parse one line of the wavelength endpoint.
    pub fn parse(text: &str, unit: WavelengthUnit) -> Self {
        match text.trim().parse::<f64>() {
            Ok(value) => Self::from_wavelength(value, unit),
            Err(_) => Reading::NoSignal,
        }
    }

    /// Frequency in Hz, `0.0` for [`Reading::NoSignal`].
    pub fn frequency_hz(self) -> f64 {
        match self {
            Reading::Frequency(f) => f,
            Reading::NoSignal => 0.0,
        }
    }
}

/// One wavemeter sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Optical frequency in Hz; exactly `0.0` means no signal.
    pub frequency_hz: f64,
    /// Optical power as reported by the summary endpoint; `0.0` for
    /// wavelength-only reads.
    pub power: f64,
    pub sample_time: DateTime<Utc>,
}

impl Measurement {
    pub fn new(reading: Reading, power: f64, sample_time: DateTime<Utc>) -> Self {
        Self {
            frequency_hz: reading.frequency_hz(),
            power,
            sample_time,
        }
    }

    /// A zero-frequency sample taken now.
    pub fn no_signal() -> Self {
        Self::new(Reading::NoSignal, 0.0, Utc::now())
    }

    /// `true` unless this is the no-signal sentinel.
    pub fn is_valid(&self) -> bool {
        self.frequency_hz != 0.0
    }
}

/// A source of wavemeter samples.
pub trait WavelengthSource {
    /// One read of the wavelength endpoint.
    ///
    /// Returns a zero-frequency [`Measurement`] when there is no signal;
    /// errors only on transport failure.
    fn read_once(&mut self) -> WavemeterResult<Measurement>;

    /// One read of the summary endpoint (frequency and power).
    fn read_summary(&mut self) -> WavemeterResult<Measurement>;

    /// Call [`read_once`](Self::read_once) up to `max_tries` times and return
    /// the first non-zero sample, or the last zero sample if none was valid.
    fn read_until_valid(&mut self, max_tries: usize) -> WavemeterResult<Measurement> {
        let mut last = None;
        for attempt in 1..=max_tries {
            let measurement = self.read_once()?;
            if measurement.is_valid() {
                if attempt > 1 {
                    debug!("Signal acquired after {attempt} read(s)");
                }
                return Ok(measurement);
            }
            last = Some(measurement);
        }
        debug!("No signal after {max_tries} read(s)");
        Ok(last.unwrap_or_else(Measurement::no_signal))
    }
}

impl<W: WavelengthSource + ?Sized> WavelengthSource for Box<W> {
    fn read_once(&mut self) -> WavemeterResult<Measurement> {
        (**self).read_once()
    }

    fn read_summary(&mut self) -> WavemeterResult<Measurement> {
        (**self).read_summary()
    }

    fn read_until_valid(&mut self, max_tries: usize) -> WavemeterResult<Measurement> {
        (**self).read_until_valid(max_tries)
    }
}

/// Fetches raw endpoint bodies from the wavemeter.
pub trait WavemeterTransport {
    /// GET `path` (e.g. [`WAVELENGTH_PATH`]) and return the body text.
    fn fetch(&mut self, path: &str) -> WavemeterResult<String>;
}

/// Driver for a Bristol 671 wavemeter.
pub struct Bristol671<T: WavemeterTransport = HttpTransport> {
    transport: T,
    unit: WavelengthUnit,
}

impl Bristol671<HttpTransport> {
    /// Poll the wavemeter at `address` (host, host:port or base URL) over HTTP.
    pub fn connect(address: &str) -> Self {
        Self::new(HttpTransport::new(address))
    }
}

impl<T: WavemeterTransport> Bristol671<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            unit: WavelengthUnit::default(),
        }
    }

    /// Set the unit the firmware reports wavelengths in.
    pub fn with_unit(mut self, unit: WavelengthUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn unit(&self) -> WavelengthUnit {
        self.unit
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Fetch and decode the full summary record.
    pub fn summary(&mut self) -> WavemeterResult<SummaryRecord> {
        let payload = self.transport.fetch(SUMMARY_PATH)?;
        trace!("Summary payload: {:?}", payload.trim());
        SummaryRecord::parse(&payload)
    }
}

impl<T: WavemeterTransport> WavelengthSource for Bristol671<T> {
    fn read_once(&mut self) -> WavemeterResult<Measurement> {
        let body = self.transport.fetch(WAVELENGTH_PATH)?;
        let line = body.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        let reading = Reading::parse(line, self.unit);
        trace!("Wavelength {:?} -> {:?}", line, reading);
        Ok(Measurement::new(reading, 0.0, Utc::now()))
    }

    fn read_summary(&mut self) -> WavemeterResult<Measurement> {
        let record = self.summary()?;
        let reading = Reading::from_wavelength(record.wavelength, self.unit);
        Ok(Measurement::new(reading, record.power, Utc::now()))
    }
}
