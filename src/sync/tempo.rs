//! Tempo estimation from incoming clock pulses.
//!
//! The estimator measures one quarter note (24 pulses) at a time instead of
//! averaging individual pulse intervals, which keeps it immune to the per-pulse
//! jitter of USB and network MIDI.

use crate::config::{
    tempo_in_range, MAX_QUARTER_NOTE_SECS, MIN_QUARTER_NOTE_SECS, PULSES_PER_QUARTER_NOTE,
    TEMPO_HYSTERESIS_BPM,
};
use log::trace;
use std::time::{Duration, Instant};

/// Start of the current 24-pulse window and the pulses still missing from it
#[derive(Debug, Clone, Default)]
pub struct TempoEstimator {
    window_start: Option<Instant>,
    remaining: u64,
}

impl TempoEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the current window; the next pulse opens a fresh one
    pub fn reset(&mut self) {
        self.window_start = None;
        self.remaining = 0;
    }

    /// Feeds one pulse. Returns a candidate tempo each time a full quarter note
    /// has been measured and its duration is plausible.
    pub fn on_pulse(&mut self, now: Instant) -> Option<f64> {
        let start = match self.window_start {
            Some(start) => start,
            None => {
                self.window_start = Some(now);
                self.remaining = PULSES_PER_QUARTER_NOTE;
                return None;
            }
        };

        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }

        // Window complete, this pulse opens the next one
        self.window_start = Some(now);
        self.remaining = PULSES_PER_QUARTER_NOTE;

        let elapsed = now.saturating_duration_since(start);
        let candidate = bpm_from_quarter_note(elapsed);
        if candidate.is_none() {
            trace!("Discarding implausible quarter note duration {:?}", elapsed);
        }
        candidate
    }
}

/// Tempo for a measured quarter-note duration, `None` outside 0.2s..3.0s
pub fn bpm_from_quarter_note(elapsed: Duration) -> Option<f64> {
    let seconds = elapsed.as_secs_f64();
    if seconds > MIN_QUARTER_NOTE_SECS && seconds < MAX_QUARTER_NOTE_SECS {
        Some(60.0 / seconds)
    } else {
        None
    }
}

/// Whether an estimated tempo should replace the current one
pub fn accept_estimate(candidate: f64, current: f64, blocked: bool) -> bool {
    !blocked && tempo_in_range(candidate) && (candidate - current).abs() > TEMPO_HYSTERESIS_BPM
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(
        estimator: &mut TempoEstimator,
        start: Instant,
        interval: Duration,
        pulses: u32,
    ) -> Vec<f64> {
        (0..pulses)
            .filter_map(|i| estimator.on_pulse(start + interval * i))
            .collect()
    }

    #[test]
    fn test_measures_one_quarter_note() {
        let mut estimator = TempoEstimator::new();
        let start = Instant::now();
        // 100 BPM: 0.6s per quarter note, 25ms per pulse
        let estimates = feed(&mut estimator, start, Duration::from_millis(25), 25);
        assert_eq!(estimates.len(), 1);
        assert!((estimates[0] - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_consecutive_windows_share_boundary_pulse() {
        let mut estimator = TempoEstimator::new();
        let start = Instant::now();
        let estimates = feed(&mut estimator, start, Duration::from_millis(25), 49);
        assert_eq!(estimates.len(), 2);
        assert!((estimates[1] - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_discards_implausible_windows() {
        let mut estimator = TempoEstimator::new();
        let start = Instant::now();
        // 24 pulses in 48ms would be 1250 BPM
        let estimates = feed(&mut estimator, start, Duration::from_millis(2), 25);
        assert!(estimates.is_empty());

        // The window restarted, so a plausible quarter note is still measured
        let next = start + Duration::from_millis(48);
        let pulse = Duration::from_millis(25);
        let estimates = feed(&mut estimator, next + pulse, pulse, 24);
        assert_eq!(estimates.len(), 1);
    }

    #[test]
    fn test_reset_opens_fresh_window() {
        let mut estimator = TempoEstimator::new();
        let start = Instant::now();
        feed(&mut estimator, start, Duration::from_millis(25), 10);
        estimator.reset();
        let later = start + Duration::from_secs(10);
        let estimates = feed(&mut estimator, later, Duration::from_millis(25), 25);
        assert_eq!(estimates.len(), 1);
        assert!((estimates[0] - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_quarter_note_window_limits() {
        assert_eq!(bpm_from_quarter_note(Duration::from_millis(200)), None);
        assert_eq!(bpm_from_quarter_note(Duration::from_secs(3)), None);
        assert_eq!(bpm_from_quarter_note(Duration::from_millis(500)), Some(120.0));
    }

    #[test]
    fn test_acceptance_rules() {
        assert!(accept_estimate(125.0, 120.0, false));
        // Hysteresis
        assert!(!accept_estimate(120.4, 120.0, false));
        // Blocked
        assert!(!accept_estimate(125.0, 120.0, true));
        // Out of range
        assert!(!accept_estimate(19.0, 120.0, false));
    }
}
