//! Boundary bookkeeping after position discontinuities.

use super::position::{boundary_of, boundary_start, offset_in_boundary, pulses_into_boundary};
use super::state::SyncState;
use crate::config::{HALF_BOUNDARY_QN, SEEK_BACKWARD_THRESHOLD_QN};

/// A position change that did not come from a pulse
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionUpdate {
    /// Song position pointer or locate
    Jump { previous_qn: f64, target_qn: f64 },
    /// Playback continuing from wherever the position was left
    Resume,
}

/// A jump counts as a seek when it lands more than half a quarter note behind
pub fn is_backward_seek(previous_qn: f64, target_qn: f64) -> bool {
    target_qn < previous_qn - SEEK_BACKWARD_THRESHOLD_QN
}

/// Whether the update may rewrite `last_fired_boundary`.
///
/// During forward playback pulses own the bookkeeping; position pointers
/// interleaved with them must not race for it.
pub fn should_reconcile(update: PositionUpdate, running: bool) -> bool {
    match update {
        PositionUpdate::Resume => true,
        PositionUpdate::Jump {
            previous_qn,
            target_qn,
        } => !running || is_backward_seek(previous_qn, target_qn),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bookkeeping {
    pub last_fired_boundary: i64,
    pub predicted_next_boundary_qn: f64,
    pub pulses_since_boundary: u64,
}

impl Bookkeeping {
    fn with_last_fired(last_fired_boundary: i64, quarter_notes: f64) -> Self {
        Bookkeeping {
            last_fired_boundary,
            predicted_next_boundary_qn: boundary_start(last_fired_boundary + 1),
            pulses_since_boundary: pulses_into_boundary(quarter_notes),
        }
    }

    pub fn apply(self, state: &mut SyncState) {
        state.last_fired_boundary = self.last_fired_boundary;
        state.predicted_next_boundary_qn = self.predicted_next_boundary_qn;
        state.pulses_since_boundary = self.pulses_since_boundary;
    }
}

/// Landing in the first half of a boundary leaves it pending, landing in the
/// second half counts it as already played.
pub fn bookkeeping_after_jump(quarter_notes: f64) -> Bookkeeping {
    let boundary = boundary_of(quarter_notes);
    let last_fired = if offset_in_boundary(quarter_notes) < HALF_BOUNDARY_QN {
        boundary - 1
    } else {
        boundary
    };
    Bookkeeping::with_last_fired(last_fired, quarter_notes)
}

/// Resuming never re-fires the boundary the position is already inside, and
/// leaves the next one eligible.
pub fn bookkeeping_for_resume(quarter_notes: f64) -> Bookkeeping {
    Bookkeeping::with_last_fired(boundary_of(quarter_notes) - 1, quarter_notes)
}

/// What [`reconcile`] did to the state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reconciliation {
    /// Boundary bookkeeping was recomputed
    pub applied: bool,
    /// A sounding marker was closed and needs its note off sent
    pub released: bool,
}

/// Brings the boundary bookkeeping in line with `state.position` after
/// `update`, which must already have been applied to the position.
///
/// Any sounding marker is closed when the bookkeeping is rewritten.
pub fn reconcile(update: PositionUpdate, state: &mut SyncState) -> Reconciliation {
    if !should_reconcile(update, state.running) {
        return Reconciliation::default();
    }

    let bookkeeping = match update {
        PositionUpdate::Jump { target_qn, .. } => bookkeeping_after_jump(target_qn),
        PositionUpdate::Resume => bookkeeping_for_resume(state.position.quarter_notes),
    };
    bookkeeping.apply(state);

    let released = state.note_active;
    state.note_active = false;
    state.marker_age = 0;
    Reconciliation {
        applied: true,
        released,
    }
}
