//! Wavemeter transports that never touch the network.

use std::collections::VecDeque;

use super::{
    WavelengthUnit, WavemeterError, WavemeterResult, WavemeterTransport, SPEED_OF_LIGHT,
    SUMMARY_PATH, WAVELENGTH_PATH,
};
use crate::fos::MockDaqHandle;

/// Transport that replays a fixed script of responses.
///
/// Responses are consumed in order regardless of path. Once the script is
/// exhausted the fallback body is returned, or a transport error if there is
/// none. Every requested path is logged.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: VecDeque<WavemeterResult<String>>,
    fallback: Option<String>,
    requests: Vec<String>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, body: &str) -> Self {
        self.script.push_back(Ok(body.to_string()));
        self
    }

    pub fn with_error(mut self, error: WavemeterError) -> Self {
        self.script.push_back(Err(error));
        self
    }

    pub fn with_fallback(mut self, body: &str) -> Self {
        self.fallback = Some(body.to_string());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }
}

impl WavemeterTransport for ScriptedTransport {
    fn fetch(&mut self, path: &str) -> WavemeterResult<String> {
        self.requests.push(path.to_string());
        match self.script.pop_front() {
            Some(response) => response,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| WavemeterError::Transport("script exhausted".to_string())),
        }
    }
}

/// A wavemeter looking at whichever laser a [`MockDaq`](crate::fos::MockDaq)
/// switch currently routes to it.
///
/// Each channel carries a true optical frequency (or nothing, for a dark
/// input). Reported values include a fractional calibration error, so
/// `reported = true * (1 + fractional_error)`, which is the error model the
/// drift correction assumes.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    switch: MockDaqHandle,
    frequencies_hz: [Option<f64>; 4],
    fractional_error: f64,
    power: f64,
    unit: WavelengthUnit,
    dropout_every: Option<usize>,
    reads: usize,
}

impl SimulatedTransport {
    pub fn new(switch: MockDaqHandle) -> Self {
        Self {
            switch,
            frequencies_hz: [None; 4],
            fractional_error: 0.0,
            power: 1.0,
            unit: WavelengthUnit::Meters,
            dropout_every: None,
            reads: 0,
        }
    }

    /// Put a laser at `frequency_hz` on input `channel` (0-3).
    pub fn with_laser(mut self, channel: usize, frequency_hz: f64) -> Self {
        if let Some(slot) = self.frequencies_hz.get_mut(channel) {
            *slot = Some(frequency_hz);
        }
        self
    }

    pub fn with_fractional_error(mut self, fractional_error: f64) -> Self {
        self.fractional_error = fractional_error;
        self
    }

    pub fn with_power(mut self, power: f64) -> Self {
        self.power = power;
        self
    }

    /// Report wavelengths in `unit`, like firmware configured for nm output.
    pub fn with_unit(mut self, unit: WavelengthUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Report no signal on every `n`th read.
    pub fn with_dropout_every(mut self, n: usize) -> Self {
        self.dropout_every = (n > 0).then_some(n);
        self
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Wavelength currently seen, in the configured unit; `0` when dark.
    fn current_wavelength(&self) -> f64 {
        if matches!(self.dropout_every, Some(n) if self.reads % n == 0) {
            return 0.0;
        }
        self.switch
            .active_channel()
            .and_then(|ch| self.frequencies_hz[usize::from(ch.index())])
            .map(|f| {
                let reported = f * (1.0 + self.fractional_error);
                self.unit.from_meters(SPEED_OF_LIGHT / reported)
            })
            .unwrap_or(0.0)
    }
}

impl WavemeterTransport for SimulatedTransport {
    fn fetch(&mut self, path: &str) -> WavemeterResult<String> {
        self.reads += 1;
        let wavelength = self.current_wavelength();
        match path {
            WAVELENGTH_PATH => Ok(format!("{wavelength}\n")),
            SUMMARY_PATH => {
                let power = if wavelength > 0.0 { self.power } else { 0.0 };
                Ok(format!(
                    "{{\"wavelength\": {wavelength}, \"power\": {power}, \"saturated\": False}}\n"
                ))
            }
            other => Err(WavemeterError::Transport(format!("404 Not Found: {other}"))),
        }
    }
}
