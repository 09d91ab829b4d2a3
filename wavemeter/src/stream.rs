//! Polling loops with cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::bristol::{Measurement, WavelengthSource};
use crate::correction::{CorrectionResult, FrequencyCorrector};
use crate::fos::ChannelSelector;
use crate::record::SessionRecorder;

/// Default cadence of the correction display loop.
pub const DEFAULT_DISPLAY_INTERVAL: Duration = Duration::from_millis(100);

/// Longest single sleep between stop flag checks.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Shared cancellation flag, set from a signal handler or another thread.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early if a stop is requested.
    ///
    /// Returns `true` if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Counters reported when a loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: usize,
    pub failures: usize,
}

impl LoopStats {
    pub fn successes(&self) -> usize {
        self.cycles - self.failures
    }
}

/// Repeatedly read the summary endpoint until stopped.
///
/// Each valid-or-not sample is appended to `recorder` when one is given.
/// Read errors and record write errors are logged and counted, and the loop
/// carries on. `max_cycles` bounds the number of reads.
pub fn stream_summary<W: WavelengthSource + ?Sized>(
    source: &mut W,
    recorder: Option<&SessionRecorder>,
    interval: Duration,
    stop: &StopFlag,
    max_cycles: Option<usize>,
    mut on_sample: impl FnMut(&Measurement),
) -> LoopStats {
    let mut stats = LoopStats::default();
    while !stop.is_stopped() && max_cycles.map_or(true, |max| stats.cycles < max) {
        stats.cycles += 1;
        match source.read_summary() {
            Ok(measurement) => {
                on_sample(&measurement);
                if let Some(recorder) = recorder {
                    if let Err(e) = recorder.append(&measurement) {
                        warn!("Failed to append to {}: {e}", recorder.path().display());
                        stats.failures += 1;
                    }
                }
            }
            Err(e) => {
                warn!("Summary read failed: {e}");
                stats.failures += 1;
            }
        }
        if !interval.is_zero() && !stop.sleep(interval) {
            break;
        }
    }
    info!(
        "Summary stream stopped after {} read(s), {} failure(s)",
        stats.cycles, stats.failures
    );
    stats
}

/// Run correction cycles at a fixed cadence until stopped.
///
/// The cadence is measured from the start of one cycle to the start of the
/// next; a cycle slower than `interval` is followed immediately by the next
/// one. Failed cycles are logged and counted.
pub fn run_correction_loop<S, W>(
    corrector: &mut FrequencyCorrector<S, W>,
    interval: Duration,
    stop: &StopFlag,
    max_cycles: Option<usize>,
    mut on_result: impl FnMut(&CorrectionResult),
) -> LoopStats
where
    S: ChannelSelector,
    W: WavelengthSource,
{
    let mut stats = LoopStats::default();
    while !stop.is_stopped() && max_cycles.map_or(true, |max| stats.cycles < max) {
        let started = Instant::now();
        stats.cycles += 1;
        match corrector.correct() {
            Ok(result) => on_result(&result),
            Err(e) => {
                warn!("Correction cycle {} failed: {e}", stats.cycles);
                stats.failures += 1;
            }
        }
        let remaining = interval.saturating_sub(started.elapsed());
        if !remaining.is_zero() && !stop.sleep(remaining) {
            break;
        }
    }
    debug!("Correction loop exiting: {stats:?}");
    info!(
        "Ran {} correction cycle(s), {} failed",
        stats.cycles, stats.failures
    );
    stats
}
