//! Reference-locked drift correction.
//!
//! The wavemeter's calibration wanders by a small fractional amount over
//! time. A laser locked to a known atomic transition is routed to the
//! wavemeter alongside the laser under test; measuring both in quick
//! succession gives the instrument's present error, which is then scaled to
//! the target's frequency and removed.
//!
//! # Cycle
//!
//! One call to [`FrequencyCorrector::correct`] runs two phases strictly in
//! sequence:
//!
//! 1. select the reference channel, wait the settle time, read until valid
//! 2. select the target channel, wait the settle time, read until valid
//!
//! and then applies [`drift_correct`]:
//!
//! ```text
//! ref_error    = measured_ref - reference
//! target_error = ref_error * measured_target / measured_ref
//! corrected    = measured_target - target_error
//! ```
//!
//! # Example
//!
//! ```no_run
//! use wavemeter::bristol::Bristol671;
//! use wavemeter::correction::{FrequencyCorrector, ReferenceConfig};
//! use wavemeter::fos::{FiberSwitch, MockInventory};
//! use wavemeter::Channel;
//!
//! let fos = FiberSwitch::open(&MockInventory::single("USB-DIO24/37"))?;
//! let wm = Bristol671::connect("192.168.0.109");
//! let config = ReferenceConfig::new(Channel::Ch0, Channel::Ch1, 351_721.6089e9);
//! let mut corrector = FrequencyCorrector::new(fos, wm, config);
//!
//! let result = corrector.correct()?;
//! println!("{:.3} GHz", result.corrected_frequency_hz / 1e9);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::bristol::{WavelengthSource, WavemeterError, DEFAULT_MAX_TRIES};
use crate::channel::Channel;
use crate::fos::{ChannelError, ChannelSelector};

/// Time allowed after a channel switch before the wavemeter is read.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(250);

/// Which half of a correction cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Reference,
    Target,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePhase::Reference => write!(f, "reference"),
            CyclePhase::Target => write!(f, "target"),
        }
    }
}

/// Underlying failure of an aborted cycle.
#[derive(Error, Debug)]
pub enum CycleCause {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Wavemeter(#[from] WavemeterError),
}

/// Errors from a correction cycle.
#[derive(Error, Debug)]
pub enum CorrectionError {
    /// The reference channel never produced a signal, so the drift cannot
    /// be scaled.
    #[error("Reference signal lost (measured reference frequency is zero)")]
    ReferenceSignalLost,

    /// Channel selection or a wavemeter read failed mid-cycle.
    #[error("Correction cycle failed in {phase} phase: {cause}")]
    CycleFailed {
        phase: CyclePhase,
        #[source]
        cause: CycleCause,
    },
}

/// Result type for correction operations.
pub type CycleResult<T> = Result<T, CorrectionError>;

/// Output of one correction cycle. All values in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub corrected_frequency_hz: f64,
    pub measured_target_frequency_hz: f64,
    pub reference_error_hz: f64,
}

/// Apply the two-point drift correction.
///
/// The instrument error measured on the reference is assumed to be a fixed
/// fraction of the measured frequency and is scaled to the target.
///
/// # Errors
///
/// Returns [`CorrectionError::ReferenceSignalLost`] if `measured_ref_hz` is
/// zero.
pub fn drift_correct(
    measured_ref_hz: f64,
    reference_hz: f64,
    measured_target_hz: f64,
) -> CycleResult<CorrectionResult> {
    if measured_ref_hz == 0.0 {
        return Err(CorrectionError::ReferenceSignalLost);
    }
    let ref_error = measured_ref_hz - reference_hz;
    let target_error = ref_error * measured_target_hz / measured_ref_hz;
    Ok(CorrectionResult {
        corrected_frequency_hz: measured_target_hz - target_error,
        measured_target_frequency_hz: measured_target_hz,
        reference_error_hz: ref_error,
    })
}

/// Shared, atomically updated reference frequency.
///
/// Cloning gives another handle to the same value, so a UI or control thread
/// can retune the reference while the corrector runs.
#[derive(Debug, Clone)]
pub struct ReferenceFrequency(Arc<AtomicU64>);

impl ReferenceFrequency {
    pub fn new(frequency_hz: f64) -> Self {
        Self(Arc::new(AtomicU64::new(frequency_hz.to_bits())))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, frequency_hz: f64) {
        self.0.store(frequency_hz.to_bits(), Ordering::Release);
    }
}

/// Channel assignment and reference value for the corrector.
///
/// Clones share the same [`ReferenceFrequency`].
#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub reference_channel: Channel,
    pub target_channel: Channel,
    reference_frequency: ReferenceFrequency,
}

impl ReferenceConfig {
    pub fn new(reference_channel: Channel, target_channel: Channel, reference_hz: f64) -> Self {
        Self {
            reference_channel,
            target_channel,
            reference_frequency: ReferenceFrequency::new(reference_hz),
        }
    }

    pub fn reference_frequency_hz(&self) -> f64 {
        self.reference_frequency.get()
    }
}

/// Drives the switch and the wavemeter through correction cycles.
///
/// Owns both devices. Cycles take `&mut self`, so a switch change from one
/// cycle can never land between another cycle's switch and read.
pub struct FrequencyCorrector<S: ChannelSelector, W: WavelengthSource> {
    selector: S,
    source: W,
    config: ReferenceConfig,
    settle: Duration,
    max_tries: usize,
}

impl<S: ChannelSelector, W: WavelengthSource> FrequencyCorrector<S, W> {
    pub fn new(selector: S, source: W, config: ReferenceConfig) -> Self {
        Self {
            selector,
            source,
            config,
            settle: DEFAULT_SETTLE,
            max_tries: DEFAULT_MAX_TRIES,
        }
    }

    /// Override the post-switch settle time (default 250 ms).
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Override the per-phase read budget (default 25).
    pub fn with_max_tries(mut self, max_tries: usize) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn config(&self) -> &ReferenceConfig {
        &self.config
    }

    /// Replace the reference frequency. Takes effect on the next cycle.
    pub fn set_reference_frequency(&self, frequency_hz: f64) {
        debug!("Reference frequency set to {:.4} GHz", frequency_hz / 1e9);
        self.config.reference_frequency.set(frequency_hz);
    }

    /// Handle for updating the reference from another thread.
    pub fn reference_handle(&self) -> ReferenceFrequency {
        self.config.reference_frequency.clone()
    }

    /// Mutable access to the wavemeter between cycles (e.g. for summary reads).
    pub fn source_mut(&mut self) -> &mut W {
        &mut self.source
    }

    /// Mutable access to the switch between cycles.
    pub fn selector_mut(&mut self) -> &mut S {
        &mut self.selector
    }

    /// Run one full reference + target cycle.
    ///
    /// # Errors
    ///
    /// - [`CorrectionError::CycleFailed`] if a channel selection or a read
    ///   fails; a failed reference selection skips the target phase entirely
    /// - [`CorrectionError::ReferenceSignalLost`] if the reference never
    ///   produced a signal within the read budget
    pub fn correct(&mut self) -> CycleResult<CorrectionResult> {
        let reference_hz = self.config.reference_frequency.get();

        let measured_ref =
            self.measure(CyclePhase::Reference, self.config.reference_channel)?;
        let measured_target = self.measure(CyclePhase::Target, self.config.target_channel)?;

        if measured_target == 0.0 {
            warn!("No signal on target channel {}", self.config.target_channel);
        }

        let result = drift_correct(measured_ref, reference_hz, measured_target)?;
        debug!(
            "ref {:.4} GHz (err {:.4} GHz), target {:.4} GHz -> {:.4} GHz",
            measured_ref / 1e9,
            result.reference_error_hz / 1e9,
            measured_target / 1e9,
            result.corrected_frequency_hz / 1e9
        );
        Ok(result)
    }

    /// Select `channel`, settle, and read until valid.
    fn measure(&mut self, phase: CyclePhase, channel: Channel) -> CycleResult<f64> {
        let fail = |cause: CycleCause| CorrectionError::CycleFailed { phase, cause };

        self.selector
            .select(channel)
            .map_err(|e| fail(e.into()))?;
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        let measurement = self
            .source
            .read_until_valid(self.max_tries)
            .map_err(|e| fail(e.into()))?;
        Ok(measurement.frequency_hz)
    }

    /// Release the switch and hand back both devices.
    pub fn release(mut self) -> (S, W) {
        if let Err(e) = self.selector.release() {
            warn!("Failed to release channel selector: {e}");
        }
        (self.selector, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bristol::{Measurement, Reading, WavemeterResult};
    use crate::fos::ChannelResult;
    use approx::assert_relative_eq;
    use chrono::Utc;
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Select(Channel),
        Read,
    }

    type Log = Rc<RefCell<Vec<Op>>>;

    /// Records selections; fails selecting `fail_on` if set.
    struct RecordingSelector {
        log: Log,
        fail_on: Option<Channel>,
        current: Rc<RefCell<Option<Channel>>>,
    }

    impl ChannelSelector for RecordingSelector {
        fn select(&mut self, channel: Channel) -> ChannelResult<()> {
            self.log.borrow_mut().push(Op::Select(channel));
            if self.fail_on == Some(channel) {
                return Err(ChannelError::Device("stuck relay".to_string()));
            }
            *self.current.borrow_mut() = Some(channel);
            Ok(())
        }
    }

    /// Per-channel queue of frequencies; an empty queue reads as no signal.
    struct ChannelSource {
        log: Log,
        current: Rc<RefCell<Option<Channel>>>,
        queues: HashMap<Channel, VecDeque<WavemeterResult<f64>>>,
    }

    impl WavelengthSource for ChannelSource {
        fn read_once(&mut self) -> WavemeterResult<Measurement> {
            self.log.borrow_mut().push(Op::Read);
            let channel = self.current.borrow().expect("read before select");
            let next = self
                .queues
                .get_mut(&channel)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Ok(0.0))?;
            let reading = if next == 0.0 {
                Reading::NoSignal
            } else {
                Reading::Frequency(next)
            };
            Ok(Measurement::new(reading, 0.0, Utc::now()))
        }

        fn read_summary(&mut self) -> WavemeterResult<Measurement> {
            self.read_once()
        }
    }

    fn corrector(
        reference: Vec<WavemeterResult<f64>>,
        target: Vec<WavemeterResult<f64>>,
        fail_on: Option<Channel>,
    ) -> (FrequencyCorrector<RecordingSelector, ChannelSource>, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let current = Rc::new(RefCell::new(None));
        let selector = RecordingSelector {
            log: log.clone(),
            fail_on,
            current: current.clone(),
        };
        let mut queues = HashMap::new();
        queues.insert(Channel::Ch0, reference.into_iter().collect());
        queues.insert(Channel::Ch1, target.into_iter().collect());
        let source = ChannelSource {
            log: log.clone(),
            current,
            queues,
        };
        let config = ReferenceConfig::new(Channel::Ch0, Channel::Ch1, 351_721.6089);
        let corrector = FrequencyCorrector::new(selector, source, config)
            .with_settle(Duration::ZERO)
            .with_max_tries(5);
        (corrector, log)
    }

    #[test]
    fn test_drift_correct_reference_vector() {
        let result = drift_correct(351_721.8350, 351_721.6089, 400_000.0).unwrap();
        assert_relative_eq!(result.reference_error_hz, 0.2261, max_relative = 1e-6);
        assert_relative_eq!(
            result.corrected_frequency_hz,
            399_999.742_84,
            max_relative = 1e-6
        );
        assert_eq!(result.measured_target_frequency_hz, 400_000.0);

        let target_error = result.measured_target_frequency_hz - result.corrected_frequency_hz;
        assert_relative_eq!(
            target_error,
            0.2261 * 400_000.0 / 351_721.8350,
            max_relative = 1e-6
        );
    }

    #[test]
    fn test_drift_correct_zero_reference() {
        assert!(matches!(
            drift_correct(0.0, 351_721.6089, 400_000.0),
            Err(CorrectionError::ReferenceSignalLost)
        ));
    }

    #[test]
    fn test_drift_correct_removes_fractional_error() {
        let epsilon = 3.0e-7;
        let reference = 351.7216089e12;
        let target = 384.230e12;
        let result =
            drift_correct(reference * (1.0 + epsilon), reference, target * (1.0 + epsilon))
                .unwrap();
        assert_relative_eq!(result.corrected_frequency_hz, target, max_relative = 1e-12);
    }

    #[test]
    fn test_cycle_matches_reference_vector() {
        let (mut c, log) = corrector(vec![Ok(351_721.8350)], vec![Ok(400_000.0)], None);
        let result = c.correct().unwrap();
        assert_relative_eq!(
            result.corrected_frequency_hz,
            399_999.742_84,
            max_relative = 1e-6
        );
        assert_eq!(
            *log.borrow(),
            vec![
                Op::Select(Channel::Ch0),
                Op::Read,
                Op::Select(Channel::Ch1),
                Op::Read
            ]
        );
    }

    #[test]
    fn test_cycle_retries_through_dropout() {
        let (mut c, log) = corrector(
            vec![Ok(0.0), Ok(0.0), Ok(351_721.8350)],
            vec![Ok(0.0), Ok(400_000.0)],
            None,
        );
        c.correct().unwrap();
        let reads = log.borrow().iter().filter(|op| **op == Op::Read).count();
        assert_eq!(reads, 5);
    }

    #[test]
    fn test_reference_lost_still_selects_both_channels() {
        let (mut c, log) = corrector(Vec::new(), vec![Ok(400_000.0)], None);
        assert!(matches!(
            c.correct(),
            Err(CorrectionError::ReferenceSignalLost)
        ));
        let selects: Vec<Op> = log
            .borrow()
            .iter()
            .filter(|op| matches!(op, Op::Select(_)))
            .cloned()
            .collect();
        assert_eq!(
            selects,
            vec![Op::Select(Channel::Ch0), Op::Select(Channel::Ch1)]
        );
        // 5 tries on the reference, 1 on the target
        let reads = log.borrow().iter().filter(|op| **op == Op::Read).count();
        assert_eq!(reads, 6);
    }

    #[test]
    fn test_reference_select_failure_aborts_before_target() {
        let (mut c, log) = corrector(vec![Ok(1.0)], vec![Ok(1.0)], Some(Channel::Ch0));
        match c.correct() {
            Err(CorrectionError::CycleFailed {
                phase: CyclePhase::Reference,
                cause: CycleCause::Channel(ChannelError::Device(_)),
            }) => {}
            other => panic!("expected reference CycleFailed, got {other:?}"),
        }
        assert_eq!(*log.borrow(), vec![Op::Select(Channel::Ch0)]);
    }

    #[test]
    fn test_target_select_failure() {
        let (mut c, log) = corrector(vec![Ok(1.0)], vec![Ok(1.0)], Some(Channel::Ch1));
        assert!(matches!(
            c.correct(),
            Err(CorrectionError::CycleFailed {
                phase: CyclePhase::Target,
                cause: CycleCause::Channel(_)
            })
        ));
        assert_eq!(
            *log.borrow(),
            vec![Op::Select(Channel::Ch0), Op::Read, Op::Select(Channel::Ch1)]
        );
    }

    #[test]
    fn test_transport_failure_aborts_cycle() {
        let (mut c, log) = corrector(
            vec![Err(WavemeterError::Transport("timed out".to_string()))],
            vec![Ok(400_000.0)],
            None,
        );
        assert!(matches!(
            c.correct(),
            Err(CorrectionError::CycleFailed {
                phase: CyclePhase::Reference,
                cause: CycleCause::Wavemeter(WavemeterError::Transport(_))
            })
        ));
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_set_reference_applies_to_next_cycle() {
        let (mut c, _log) = corrector(
            vec![Ok(351_721.8350), Ok(351_721.8350)],
            vec![Ok(400_000.0), Ok(400_000.0)],
            None,
        );
        let first = c.correct().unwrap();
        assert_relative_eq!(first.reference_error_hz, 0.2261, max_relative = 1e-6);

        c.set_reference_frequency(351_721.8350);
        let second = c.correct().unwrap();
        assert_eq!(second.reference_error_hz, 0.0);
        assert_eq!(second.corrected_frequency_hz, 400_000.0);
    }

    #[test]
    fn test_reference_handle_shared_across_threads() {
        let (c, _log) = corrector(Vec::new(), Vec::new(), None);
        let handle = c.reference_handle();
        std::thread::spawn(move || handle.set(1.25e14)).join().unwrap();
        assert_eq!(c.config().reference_frequency_hz(), 1.25e14);
    }

    #[test]
    fn test_error_messages() {
        let err = CorrectionError::CycleFailed {
            phase: CyclePhase::Target,
            cause: CycleCause::Channel(ChannelError::InvalidChannel(9)),
        };
        assert_eq!(
            err.to_string(),
            "Correction cycle failed in target phase: Invalid channel 9 (expected 0, 1, 2 or 3)"
        );
    }
}
