//! Musical position derived from the pulse count.

use crate::config::{
    POSITION_UNITS_PER_QUARTER_NOTE, PULSES_PER_BOUNDARY, PULSES_PER_QUARTER_NOTE,
    QUARTER_NOTES_PER_BOUNDARY,
};

/// Pulse count plus the two derived views the rest of the engine reads.
///
/// `quarter_notes` is the single source of truth for boundary detection.
/// `beats` are sixteenth notes, the unit of the song position pointer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub pulse_count: u64,
    pub quarter_notes: f64,
    pub beats: i64,
}

impl Position {
    pub fn from_pulses(pulse_count: u64) -> Self {
        let quarter_notes = pulse_count as f64 / PULSES_PER_QUARTER_NOTE as f64;
        Position {
            pulse_count,
            quarter_notes,
            beats: (quarter_notes * POSITION_UNITS_PER_QUARTER_NOTE as f64).floor() as i64,
        }
    }

    /// Position set by an external jump. The pulse count is re-derived from the
    /// quarter-note value so later pulses continue from the same place.
    pub fn from_jump(beats: i64, quarter_notes: f64) -> Self {
        let pulse_count = (quarter_notes * PULSES_PER_QUARTER_NOTE as f64).round().max(0.0) as u64;
        Position {
            pulse_count,
            quarter_notes,
            beats,
        }
    }

    pub fn advance(&mut self) {
        *self = Position::from_pulses(self.pulse_count + 1);
    }

    /// Index of the whole-note boundary containing this position
    pub fn boundary(&self) -> i64 {
        boundary_of(self.quarter_notes)
    }

    /// Quarter notes elapsed since the start of the current boundary
    pub fn offset_in_boundary(&self) -> f64 {
        offset_in_boundary(self.quarter_notes)
    }

    /// Pulses elapsed since the start of the current boundary
    pub fn pulses_into_boundary(&self) -> u64 {
        pulses_into_boundary(self.quarter_notes)
    }

    /// 1-based bar and beat, for display
    pub fn bar_and_beat(&self) -> (u64, u64) {
        let bar = self.pulse_count / PULSES_PER_BOUNDARY + 1;
        let beat = (self.pulse_count % PULSES_PER_BOUNDARY) / PULSES_PER_QUARTER_NOTE + 1;
        (bar, beat)
    }
}

pub fn boundary_of(quarter_notes: f64) -> i64 {
    (quarter_notes / QUARTER_NOTES_PER_BOUNDARY as f64).floor() as i64
}

pub fn offset_in_boundary(quarter_notes: f64) -> f64 {
    quarter_notes - boundary_of(quarter_notes) as f64 * QUARTER_NOTES_PER_BOUNDARY as f64
}

pub fn pulses_into_boundary(quarter_notes: f64) -> u64 {
    (offset_in_boundary(quarter_notes) * PULSES_PER_QUARTER_NOTE as f64).floor() as u64
}

/// Quarter-note value where boundary `k` starts
pub fn boundary_start(boundary: i64) -> f64 {
    boundary as f64 * QUARTER_NOTES_PER_BOUNDARY as f64
}
