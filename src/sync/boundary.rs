//! Whole-note boundary detection with predictive emission.
//!
//! A marker for boundary `k` is sent a fixed amount of real time *before* the
//! position reaches `4k` quarter notes, so that it lands on the downbeat after
//! the downstream latency. The lead is converted to pulses at the current tempo,
//! which keeps it constant in milliseconds while every decision stays in the
//! pulse domain. Decisions compare against `last_fired_boundary` only, never
//! against wall-clock time, so the cadence cannot drift.

use super::position::{boundary_of, boundary_start, offset_in_boundary, Position};
use super::state::SyncState;
use crate::config::{
    MIN_LEAD_PULSES, PULSES_PER_BOUNDARY, PULSES_PER_QUARTER_NOTE, QUARTER_NOTES_PER_BOUNDARY,
};

/// A boundary whose marker was just sent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiredBoundary {
    pub boundary: i64,
    /// Quarter-note index reported to observers (`boundary * 4`)
    pub quarter_note: i64,
    /// Pulses counted since the previous fire or reconciliation
    pub spacing: u64,
}

/// What one position update decided. Side effects are carried out by the caller
/// once the state lock is released.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryOutcome {
    pub released: bool,
    pub fired: Option<FiredBoundary>,
    pub position: Position,
    pub ticks_to_next: f64,
    pub lead_ticks: f64,
}

/// Lead window in pulses for the given tempo, never below 1.5 pulses
pub fn lead_ticks(bpm: f64, lead_ms: f64) -> f64 {
    let ms_per_tick = (60_000.0 / bpm) / PULSES_PER_QUARTER_NOTE as f64;
    (lead_ms / ms_per_tick).max(MIN_LEAD_PULSES)
}

/// Pulses left until the next boundary starts
pub fn ticks_to_next_boundary(quarter_notes: f64) -> f64 {
    (QUARTER_NOTES_PER_BOUNDARY as f64 - offset_in_boundary(quarter_notes))
        * PULSES_PER_QUARTER_NOTE as f64
}

/// The boundary that must fire at this position, if any.
///
/// Boundary 0 of a fresh run fires as soon as the position is inside the first
/// quarter note: the lead window would otherwise need negative elapsed time.
pub fn boundary_due(quarter_notes: f64, last_fired: i64, lead: f64) -> Option<i64> {
    let current = boundary_of(quarter_notes);
    let next = current.saturating_add(1);

    let first_downbeat = last_fired < 0 && current == 0 && quarter_notes < 1.0;
    if first_downbeat {
        return Some(current);
    }

    if next > last_fired && ticks_to_next_boundary(quarter_notes) <= lead {
        Some(next)
    } else {
        None
    }
}

/// A sounding marker closes once the position has passed its own downbeat.
/// Markers older than one whole boundary are forced off in case the crossing
/// was never observed (e.g. after irregular delivery).
pub fn release_due(state: &SyncState) -> bool {
    state.note_active
        && (state.position.quarter_notes > state.marker_qn
            || state.marker_age >= PULSES_PER_BOUNDARY)
}

/// Runs release and fire decisions for the current position and applies them
/// to the bookkeeping. Release is decided on the state as it was before this
/// update, so a marker is never closed on the update that opened it.
pub fn check(state: &mut SyncState, lead_ms: f64) -> BoundaryOutcome {
    let quarter_notes = state.position.quarter_notes;
    let lead = lead_ticks(state.bpm, lead_ms);
    let due = boundary_due(quarter_notes, state.last_fired_boundary, lead);

    // A new marker always closes the previous one first
    let released = release_due(state) || (due.is_some() && state.note_active);
    if released {
        state.note_active = false;
        state.marker_age = 0;
    }

    let fired = due.map(|boundary| {
        let spacing = state.pulses_since_boundary;
        state.last_fired_boundary = boundary;
        state.predicted_next_boundary_qn = boundary_start(boundary + 1);
        state.pulses_since_boundary = 0;
        state.note_active = true;
        state.marker_qn = boundary_start(boundary);
        state.marker_age = 0;
        FiredBoundary {
            boundary,
            quarter_note: boundary * QUARTER_NOTES_PER_BOUNDARY as i64,
            spacing,
        }
    });

    BoundaryOutcome {
        released,
        fired,
        position: state.position,
        ticks_to_next: ticks_to_next_boundary(quarter_notes),
        lead_ticks: lead,
    }
}
