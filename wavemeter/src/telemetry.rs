//! Fan-out of correction results to subscribers.
//!
//! Results are published as `<topic> [corrected,measured,reference_error]`
//! messages (JSON array, Hz) so subscribers can filter by topic prefix. The
//! publisher connects lazily on the first publish; nothing is opened for runs
//! that never publish.

use std::io::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::correction::CorrectionResult;

/// Topic the corrected wavemeter stream is published under.
pub const DEFAULT_TOPIC: &str = "wavemeter";

/// Port of the telemetry PUB socket.
pub const DEFAULT_PUBLISH_PORT: u16 = 5554;

/// Errors that can occur while publishing telemetry.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Telemetry connect failed: {0}")]
    Connect(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "zmq")]
    #[error("ZMQ socket error: {0}")]
    Socket(#[from] zmq::Error),
}

/// The `(corrected, measured, reference_error)` tuple sent to subscribers, in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub corrected_frequency_hz: f64,
    pub measured_frequency_hz: f64,
    pub reference_error_hz: f64,
}

impl TelemetrySample {
    pub fn as_tuple(&self) -> (f64, f64, f64) {
        (
            self.corrected_frequency_hz,
            self.measured_frequency_hz,
            self.reference_error_hz,
        )
    }
}

impl From<&CorrectionResult> for TelemetrySample {
    fn from(result: &CorrectionResult) -> Self {
        Self {
            corrected_frequency_hz: result.corrected_frequency_hz,
            measured_frequency_hz: result.measured_target_frequency_hz,
            reference_error_hz: result.reference_error_hz,
        }
    }
}

/// Encode a sample as a `<topic> [corrected,measured,reference_error]` message.
pub fn encode(topic: &str, sample: &TelemetrySample) -> Result<String, TelemetryError> {
    Ok(format!("{topic} {}", serde_json::to_string(&sample.as_tuple())?))
}

/// Destination for published samples.
pub trait TelemetrySink {
    fn publish(&mut self, topic: &str, sample: &TelemetrySample) -> Result<(), TelemetryError>;
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for Box<S> {
    fn publish(&mut self, topic: &str, sample: &TelemetrySample) -> Result<(), TelemetryError> {
        (**self).publish(topic, sample)
    }
}

/// Sink writing one encoded message per line, e.g. to stdout or a pipe.
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TelemetrySink for WriterSink<W> {
    fn publish(&mut self, topic: &str, sample: &TelemetrySample) -> Result<(), TelemetryError> {
        writeln!(self.writer, "{}", encode(topic, sample)?)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// ZeroMQ PUB socket sink.
#[cfg(feature = "zmq")]
pub struct ZmqSink {
    // Keep the context alive for as long as the socket.
    _context: zmq::Context,
    socket: zmq::Socket,
}

#[cfg(feature = "zmq")]
impl ZmqSink {
    /// Bind a PUB socket on all interfaces at `port`.
    pub fn bind(port: u16) -> Result<Self, TelemetryError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::PUB)?;
        let endpoint = format!("tcp://*:{port}");
        socket
            .bind(&endpoint)
            .map_err(|e| TelemetryError::Connect(format!("bind {endpoint}: {e}")))?;
        info!("Telemetry publishing on {endpoint}");
        Ok(Self {
            _context: context,
            socket,
        })
    }
}

#[cfg(feature = "zmq")]
impl TelemetrySink for ZmqSink {
    fn publish(&mut self, topic: &str, sample: &TelemetrySample) -> Result<(), TelemetryError> {
        let message = encode(topic, sample)?;
        self.socket.send(message.as_bytes(), 0)?;
        Ok(())
    }
}

/// Publisher that opens its sink on first use.
///
/// A failed connect is reported to the caller and attempted again on the
/// next publish.
pub struct LazyPublisher<S, F>
where
    S: TelemetrySink,
    F: FnMut() -> Result<S, TelemetryError>,
{
    topic: String,
    connect: F,
    sink: Option<S>,
}

impl<S, F> LazyPublisher<S, F>
where
    S: TelemetrySink,
    F: FnMut() -> Result<S, TelemetryError>,
{
    pub fn new(topic: &str, connect: F) -> Self {
        Self {
            topic: topic.to_string(),
            connect,
            sink: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_connected(&self) -> bool {
        self.sink.is_some()
    }

    /// Publish one correction result, connecting first if needed.
    pub fn publish(&mut self, result: &CorrectionResult) -> Result<(), TelemetryError> {
        let sample = TelemetrySample::from(result);
        let sink = match self.sink.as_mut() {
            Some(sink) => sink,
            None => {
                info!("Starting telemetry publisher for topic '{}'", self.topic);
                self.sink.insert((self.connect)()?)
            }
        };
        sink.publish(&self.topic, &sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> CorrectionResult {
        CorrectionResult {
            corrected_frequency_hz: 399_999.75,
            measured_target_frequency_hz: 400_000.0,
            reference_error_hz: 0.25,
        }
    }

    #[test]
    fn test_encode_prefixes_topic() {
        let sample = TelemetrySample::from(&result());
        let message = encode(DEFAULT_TOPIC, &sample).unwrap();
        let (topic, json) = message.split_once(' ').unwrap();
        assert_eq!(topic, "wavemeter");
        let decoded: (f64, f64, f64) = serde_json::from_str(json).unwrap();
        assert_eq!(decoded, (399_999.75, 400_000.0, 0.25));
    }

    #[test]
    fn test_encode_is_ordered_tuple() {
        let sample = TelemetrySample::from(&CorrectionResult {
            corrected_frequency_hz: 1.0,
            measured_target_frequency_hz: 2.0,
            reference_error_hz: 3.0,
        });
        assert_eq!(
            encode(DEFAULT_TOPIC, &sample).unwrap(),
            "wavemeter [1.0,2.0,3.0]"
        );
    }

    #[test]
    fn test_writer_sink_one_line_per_sample() {
        let mut sink = WriterSink::new(Vec::new());
        let sample = TelemetrySample::from(&result());
        sink.publish("a", &sample).unwrap();
        sink.publish("b", &sample).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("a ["));
        assert!(lines[1].starts_with("b ["));
    }

    #[test]
    fn test_lazy_publisher_connects_once() {
        let mut connects = 0;
        let mut publisher = LazyPublisher::new(DEFAULT_TOPIC, || {
            connects += 1;
            Ok(WriterSink::new(Vec::new()))
        });
        assert!(!publisher.is_connected());
        publisher.publish(&result()).unwrap();
        publisher.publish(&result()).unwrap();
        assert!(publisher.is_connected());
        drop(publisher);
        assert_eq!(connects, 1);
    }

    #[test]
    fn test_lazy_publisher_retries_failed_connect() {
        let mut attempts = 0;
        let mut publisher = LazyPublisher::new(DEFAULT_TOPIC, || {
            attempts += 1;
            if attempts == 1 {
                Err(TelemetryError::Connect("address in use".to_string()))
            } else {
                Ok(WriterSink::new(Vec::new()))
            }
        });
        assert!(matches!(
            publisher.publish(&result()),
            Err(TelemetryError::Connect(_))
        ));
        assert!(!publisher.is_connected());
        publisher.publish(&result()).unwrap();
        assert!(publisher.is_connected());
    }
}
