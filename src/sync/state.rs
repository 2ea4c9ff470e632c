use super::position::Position;
use super::tempo::TempoEstimator;
use crate::config::DEFAULT_BPM;

/// Who drives the pulse train
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The engine generates its own clock
    Master,
    /// Clock arrives from the external sequencer
    Slave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    RunningMaster,
    RunningSlave,
}

/// Everything the engine mutates from more than one thread. Lives behind a single mutex.
#[derive(Debug, Clone)]
pub struct SyncState {
    pub running: bool,
    pub mode: Mode,
    pub bpm: f64,
    pub position: Position,
    /// Boundary index of the last marker sent, -1 before the first
    pub last_fired_boundary: i64,
    pub predicted_next_boundary_qn: f64,
    /// Drift counter, restarted whenever a boundary fires or is reconciled
    pub pulses_since_boundary: u64,
    pub note_active: bool,
    /// Boundary start (quarter notes) of the marker currently sounding
    pub marker_qn: f64,
    /// Pulses since the sounding marker was sent
    pub marker_age: u64,
    pub bpm_updates_blocked: bool,
    pub transport_sync_blocked: bool,
    /// Every pulse received from outside, running or not
    pub incoming_pulse_count: u64,
    pub tempo_window: TempoEstimator,
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState {
            running: false,
            mode: Mode::Slave,
            bpm: DEFAULT_BPM,
            position: Position::default(),
            last_fired_boundary: -1,
            predicted_next_boundary_qn: -1.0,
            pulses_since_boundary: 0,
            note_active: false,
            marker_qn: 0.0,
            marker_age: 0,
            bpm_updates_blocked: false,
            transport_sync_blocked: false,
            incoming_pulse_count: 0,
            tempo_window: TempoEstimator::new(),
        }
    }
}

impl SyncState {
    pub fn new(bpm: f64) -> Self {
        SyncState {
            bpm,
            ..Self::default()
        }
    }

    pub fn transport(&self) -> TransportState {
        match (self.running, self.mode) {
            (false, _) => TransportState::Stopped,
            (true, Mode::Master) => TransportState::RunningMaster,
            (true, Mode::Slave) => TransportState::RunningSlave,
        }
    }

    /// Moves one pulse forward. No-op while stopped.
    pub fn advance_one_pulse(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.position.advance();
        self.pulses_since_boundary += 1;
        if self.note_active {
            self.marker_age += 1;
        }
        true
    }

    /// Zero state for position and boundary bookkeeping. Tempo, guards and the
    /// incoming pulse counter survive.
    pub fn reset_position(&mut self) {
        self.position = Position::default();
        self.last_fired_boundary = -1;
        self.predicted_next_boundary_qn = -1.0;
        self.pulses_since_boundary = 0;
        self.note_active = false;
        self.marker_qn = 0.0;
        self.marker_age = 0;
    }

    /// Fresh session from the top: zeroed position, first boundary due at 0
    pub fn begin_session(&mut self, mode: Mode) {
        self.reset_position();
        self.predicted_next_boundary_qn = 0.0;
        self.tempo_window.reset();
        self.mode = mode;
        self.running = true;
    }
}
