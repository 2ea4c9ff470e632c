//! The synchronization controller.
//!
//! `SyncController` owns the shared [`SyncState`] and is the only way to
//! mutate it. Three contexts call into it: the master pulse generator, the
//! MIDI input thread and the control surface. Every operation takes the state
//! lock once, decides what to do, releases the lock, and only then talks to
//! the MIDI output and the event subscribers.
//!
//! A marker note on is sent while holding the output lock and only after
//! re-checking the state, so a stop that won the race is never followed by a
//! stale note on. Lock order is timer, then output, then state.

use super::boundary::{self, BoundaryOutcome};
use super::events::{EventBus, SyncEvent};
use super::generator::{pulse_interval, PulseCallback, PulseTimer, ThreadPulseTimer};
use super::position::Position;
use super::reconcile::{reconcile, PositionUpdate};
use super::state::{Mode, SyncState, TransportState};
use super::tempo::accept_estimate;
use crate::config::{
    tempo_in_range, Settings, DEFAULT_BPM, DEFAULT_LEAD_MS, POSITION_UNITS_PER_QUARTER_NOTE,
};
use crate::midi::{MidiEngine, MidiMessage, MAX_SONG_POSITION};
use crossbeam::channel::Receiver;
use log::{debug, info, trace, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// The note sent on every boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
}

impl Default for Marker {
    fn default() -> Self {
        Marker {
            channel: 0,
            note: 60,
            velocity: 100,
        }
    }
}

impl Marker {
    pub fn on(&self) -> MidiMessage {
        MidiMessage::NoteOn {
            channel: self.channel,
            note: self.note,
            velocity: self.velocity,
        }
    }

    pub fn off(&self) -> MidiMessage {
        MidiMessage::NoteOff {
            channel: self.channel,
            note: self.note,
            velocity: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncSettings {
    pub initial_bpm: f64,
    /// Output latency the marker is sent ahead of
    pub lead_ms: f64,
    pub marker: Marker,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            initial_bpm: DEFAULT_BPM,
            lead_ms: DEFAULT_LEAD_MS,
            marker: Marker::default(),
        }
    }
}

impl From<&Settings> for SyncSettings {
    fn from(settings: &Settings) -> Self {
        SyncSettings {
            initial_bpm: settings.bpm,
            lead_ms: settings.lead_ms,
            marker: Marker {
                channel: settings.marker_channel,
                note: settings.marker_note,
                velocity: settings.marker_velocity,
            },
        }
    }
}

/// Point-in-time copy of everything observable about the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncSnapshot {
    pub transport: TransportState,
    pub bpm: f64,
    pub position: Position,
    pub last_fired_boundary: i64,
    pub predicted_next_boundary_qn: f64,
    pub pulses_since_boundary: u64,
    pub note_active: bool,
    pub bpm_updates_blocked: bool,
    pub transport_sync_blocked: bool,
    pub incoming_pulse_count: u64,
}

impl From<&SyncState> for SyncSnapshot {
    fn from(state: &SyncState) -> Self {
        SyncSnapshot {
            transport: state.transport(),
            bpm: state.bpm,
            position: state.position,
            last_fired_boundary: state.last_fired_boundary,
            predicted_next_boundary_qn: state.predicted_next_boundary_qn,
            pulses_since_boundary: state.pulses_since_boundary,
            note_active: state.note_active,
            bpm_updates_blocked: state.bpm_updates_blocked,
            transport_sync_blocked: state.transport_sync_blocked,
            incoming_pulse_count: state.incoming_pulse_count,
        }
    }
}

/// State reachable from the pulse generator thread
struct Shared {
    state: Mutex<SyncState>,
    output: Mutex<Box<dyn MidiEngine>>,
    events: EventBus,
    settings: SyncSettings,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, msg: MidiMessage) {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = output.send(msg) {
            warn!("Failed to send {:?}: {}", msg, e);
        }
    }

    /// Sends the note on for `boundary` unless the marker was closed after it
    /// fired. Returns whether the note went out.
    fn send_marker_on(&self, boundary: i64) -> bool {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        let still_sounding = {
            let state = self.lock_state();
            state.note_active && state.last_fired_boundary == boundary
        };
        if !still_sounding {
            debug!("Marker for boundary {} closed before it was sent", boundary);
            return false;
        }

        let msg = self.settings.marker.on();
        if let Err(e) = output.send(msg) {
            warn!("Failed to send {:?}: {}", msg, e);
        }
        true
    }

    fn release_marker(&self) {
        self.send(self.settings.marker.off());
        self.events.publish(SyncEvent::MarkerReleased);
    }

    fn emit_outcome(&self, outcome: &BoundaryOutcome) {
        if outcome.ticks_to_next <= outcome.lead_ticks * 2.0 {
            trace!(
                "qn {:.3}: {:.2} pulses to next boundary, lead {:.2}",
                outcome.position.quarter_notes,
                outcome.ticks_to_next,
                outcome.lead_ticks
            );
        }

        if outcome.released {
            debug!("Marker released at qn {:.3}", outcome.position.quarter_notes);
            self.release_marker();
        }

        if let Some(fired) = outcome.fired {
            debug!(
                "Boundary {} fired at qn {:.3} ({} pulses since previous)",
                fired.boundary, outcome.position.quarter_notes, fired.spacing
            );
            if self.send_marker_on(fired.boundary) {
                self.events.publish(SyncEvent::BoundaryFired(fired.quarter_note));
            }
        }
    }

    fn publish_position(&self, position: Position) {
        self.events.publish(SyncEvent::PositionChanged {
            beats: position.beats,
            quarter_notes: position.quarter_notes,
        });
    }

    /// One pulse from the internal generator
    fn on_internal_pulse(&self) {
        let outcome = {
            let mut state = self.lock_state();
            if state.transport() != TransportState::RunningMaster {
                return;
            }
            state.advance_one_pulse();
            boundary::check(&mut state, self.settings.lead_ms)
        };

        self.send(MidiMessage::Clock);
        self.emit_outcome(&outcome);
        self.events.publish(SyncEvent::PulseTick);
    }
}

/// Marks a session as running again without touching the position
fn resume_session(state: &mut SyncState, mode: Mode) -> bool {
    state.tempo_window.reset();
    state.mode = mode;
    state.running = true;
    reconcile(PositionUpdate::Resume, state).released
}

pub struct SyncController {
    shared: Arc<Shared>,
    timer: Mutex<Box<dyn PulseTimer>>,
}

impl SyncController {
    /// Controller driven by a real timing thread in master mode
    pub fn new<E>(engine: E, settings: SyncSettings) -> Self
    where
        E: MidiEngine + 'static,
    {
        Self::with_timer(engine, settings, ThreadPulseTimer::new())
    }

    pub fn with_timer<E, T>(engine: E, settings: SyncSettings, timer: T) -> Self
    where
        E: MidiEngine + 'static,
        T: PulseTimer + 'static,
    {
        let initial_bpm = if tempo_in_range(settings.initial_bpm) {
            settings.initial_bpm
        } else {
            warn!(
                "Initial tempo {} out of range, using {}",
                settings.initial_bpm, DEFAULT_BPM
            );
            DEFAULT_BPM
        };

        SyncController {
            shared: Arc::new(Shared {
                state: Mutex::new(SyncState::new(initial_bpm)),
                output: Mutex::new(Box::new(engine) as Box<dyn MidiEngine>),
                events: EventBus::new(),
                settings,
            }),
            timer: Mutex::new(Box::new(timer) as Box<dyn PulseTimer>),
        }
    }

    fn lock_timer(&self) -> MutexGuard<'_, Box<dyn PulseTimer>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pulse_callback(&self) -> PulseCallback {
        // Weak so a running generator never keeps a dropped controller alive
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        Box::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.on_internal_pulse();
            }
        })
    }

    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    pub fn subscribe_bounded(&self, capacity: usize) -> Receiver<SyncEvent> {
        self.shared.events.subscribe_bounded(capacity)
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot::from(&*self.shared.lock_state())
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock_state().running
    }

    pub fn transport_state(&self) -> TransportState {
        self.shared.lock_state().transport()
    }

    pub fn current_bpm(&self) -> f64 {
        self.shared.lock_state().bpm
    }

    pub fn position(&self) -> Position {
        self.shared.lock_state().position
    }

    pub fn last_fired_boundary(&self) -> i64 {
        self.shared.lock_state().last_fired_boundary
    }

    pub fn incoming_pulse_count(&self) -> u64 {
        self.shared.lock_state().incoming_pulse_count
    }

    /// Sets the local tempo. Values outside 20..=300 BPM are ignored and
    /// `false` is returned.
    pub fn set_tempo(&self, bpm: f64) -> bool {
        if !tempo_in_range(bpm) {
            debug!("Ignoring out of range tempo {}", bpm);
            return false;
        }

        let mut timer = self.lock_timer();
        self.shared.lock_state().bpm = bpm;
        if timer.is_active() {
            timer.set_interval(pulse_interval(bpm));
        }
        drop(timer);

        info!("Tempo set to {:.2} BPM", bpm);
        self.shared.events.publish(SyncEvent::TempoChanged(bpm));
        true
    }

    /// Freezes the tempo against estimates from incoming clock
    pub fn block_tempo_updates(&self, blocked: bool) {
        self.shared.lock_state().bpm_updates_blocked = blocked;
        info!("Incoming tempo updates {}", if blocked { "blocked" } else { "allowed" });
    }

    /// Ignores start, stop and continue from the external sequencer
    pub fn block_transport_sync(&self, blocked: bool) {
        self.shared.lock_state().transport_sync_blocked = blocked;
        info!("Incoming transport commands {}", if blocked { "blocked" } else { "allowed" });
    }

    /// Starts playback from the top with the local clock as master
    pub fn start(&self, send_command: bool) {
        let mut timer = self.lock_timer();
        let (bpm, position) = {
            let mut state = self.shared.lock_state();
            if state.running {
                debug!("Start ignored, already {:?}", state.transport());
                return;
            }
            state.begin_session(Mode::Master);
            (state.bpm, state.position)
        };

        if send_command {
            self.shared.send(MidiMessage::Start);
        }
        timer.start(pulse_interval(bpm), self.pulse_callback());
        drop(timer);

        info!("Transport started as master at {:.2} BPM", bpm);
        self.shared.events.publish(SyncEvent::RunningChanged(true));
        self.shared.publish_position(position);
    }

    /// Resumes master playback from the current position
    pub fn continue_playback(&self, send_command: bool) {
        let mut timer = self.lock_timer();
        let (bpm, position, released) = {
            let mut state = self.shared.lock_state();
            if state.running {
                debug!("Continue ignored, already {:?}", state.transport());
                return;
            }
            let released = resume_session(&mut state, Mode::Master);
            (state.bpm, state.position, released)
        };

        if released {
            self.shared.release_marker();
        }
        if send_command {
            self.shared.send(MidiMessage::Continue);
        }
        timer.start(pulse_interval(bpm), self.pulse_callback());
        drop(timer);

        info!(
            "Transport continued as master from qn {:.2}",
            position.quarter_notes
        );
        self.shared.events.publish(SyncEvent::RunningChanged(true));
        self.shared.publish_position(position);
    }

    /// Stops playback and rewinds to the top. The internal generator is
    /// quiescent when this returns, even if the transport was already stopped.
    pub fn stop(&self, send_command: bool) {
        let mut timer = self.lock_timer();
        timer.stop();

        let released = {
            let mut state = self.shared.lock_state();
            if !state.running {
                return;
            }
            let released = state.note_active;
            state.running = false;
            state.reset_position();
            released
        };
        drop(timer);

        if released {
            self.shared.release_marker();
        }
        if send_command {
            self.shared.send(MidiMessage::Stop);
        }

        info!("Transport stopped");
        self.shared.events.publish(SyncEvent::RunningChanged(false));
        self.shared.publish_position(Position::default());
    }

    /// Moves to `quarter_notes`, snapped to the sixteenth-note grid, and
    /// optionally tells the sequencer with a song position pointer.
    pub fn locate(&self, quarter_notes: f64, send_command: bool) {
        if !quarter_notes.is_finite() || quarter_notes < 0.0 {
            debug!("Ignoring locate to {}", quarter_notes);
            return;
        }

        let units = (quarter_notes * POSITION_UNITS_PER_QUARTER_NOTE as f64)
            .round()
            .min(f64::from(MAX_SONG_POSITION)) as u16;

        if send_command {
            self.shared
                .send(MidiMessage::SongPositionPointer { position: units });
        }
        self.handle_position_jump(
            i64::from(units),
            f64::from(units) / POSITION_UNITS_PER_QUARTER_NOTE as f64,
        );
    }

    /// Plays the marker once for `hold` so the downstream routing can be
    /// checked. Only allowed while stopped; returns whether it was sent.
    pub fn send_test_marker(&self, hold: Duration) -> bool {
        if self.is_running() {
            debug!("Test marker refused while running");
            return false;
        }

        let marker = self.shared.settings.marker;
        info!("Sending test marker (note {})", marker.note);
        self.shared.send(marker.on());
        thread::sleep(hold);
        self.shared.send(marker.off());
        true
    }

    /// Incoming clock pulse, stamped now
    pub fn handle_pulse(&self) {
        self.handle_pulse_at(Instant::now());
    }

    /// Incoming clock pulse received at `now`.
    ///
    /// Advances the position when running as slave, then feeds the tempo
    /// estimator unless the local clock is master.
    pub fn handle_pulse_at(&self, now: Instant) {
        let (outcome, tempo) = {
            let mut state = self.shared.lock_state();
            state.incoming_pulse_count += 1;

            let outcome = match state.transport() {
                TransportState::RunningSlave => {
                    state.advance_one_pulse();
                    Some(boundary::check(&mut state, self.shared.settings.lead_ms))
                }
                _ => None,
            };

            let mut tempo = None;
            if state.transport() != TransportState::RunningMaster {
                let (current, blocked) = (state.bpm, state.bpm_updates_blocked);
                if let Some(candidate) = state.tempo_window.on_pulse(now) {
                    if accept_estimate(candidate, current, blocked) {
                        state.bpm = candidate;
                        tempo = Some(candidate);
                    }
                }
            }
            (outcome, tempo)
        };

        if let Some(outcome) = outcome {
            self.shared.emit_outcome(&outcome);
        }
        if let Some(bpm) = tempo {
            info!("Tempo from incoming clock: {:.2} BPM", bpm);
            self.shared.events.publish(SyncEvent::TempoChanged(bpm));
        }
        if outcome.is_some() {
            self.shared.events.publish(SyncEvent::PulseTick);
        }
    }

    /// External Start: play from the top following the incoming clock
    pub fn handle_transport_start(&self) {
        let position = {
            let mut state = self.shared.lock_state();
            if state.transport_sync_blocked || state.running {
                debug!("External start ignored");
                return;
            }
            state.begin_session(Mode::Slave);
            state.position
        };

        info!("Transport started by external sequencer");
        self.shared.events.publish(SyncEvent::RunningChanged(true));
        self.shared.publish_position(position);
    }

    /// External Stop. Never echoed back.
    pub fn handle_transport_stop(&self) {
        if self.shared.lock_state().transport_sync_blocked {
            debug!("External stop ignored");
            return;
        }
        self.stop(false);
    }

    /// External Continue: follow the incoming clock from the current position
    pub fn handle_transport_continue(&self) {
        let (position, released) = {
            let mut state = self.shared.lock_state();
            if state.transport_sync_blocked || state.running {
                debug!("External continue ignored");
                return;
            }
            let released = resume_session(&mut state, Mode::Slave);
            (state.position, released)
        };

        if released {
            self.shared.release_marker();
        }
        info!(
            "Transport continued by external sequencer from qn {:.2}",
            position.quarter_notes
        );
        self.shared.events.publish(SyncEvent::RunningChanged(true));
        self.shared.publish_position(position);
    }

    /// Song position jump to `beats` sixteenths / `quarter_notes`.
    ///
    /// While running forward the pulses own the boundary bookkeeping, so it is
    /// only recomputed when stopped or on a backward seek. Positions outside
    /// the 14-bit song position range are ignored.
    pub fn handle_position_jump(&self, beats: i64, quarter_notes: f64) {
        let max_quarter_notes =
            f64::from(MAX_SONG_POSITION) / POSITION_UNITS_PER_QUARTER_NOTE as f64;
        let in_range = (0..=i64::from(MAX_SONG_POSITION)).contains(&beats)
            && quarter_notes.is_finite()
            && (0.0..=max_quarter_notes).contains(&quarter_notes);
        if !in_range {
            debug!("Ignoring position jump to {} / {}", beats, quarter_notes);
            return;
        }

        let (position, reconciliation, outcome) = {
            let mut state = self.shared.lock_state();
            let update = PositionUpdate::Jump {
                previous_qn: state.position.quarter_notes,
                target_qn: quarter_notes,
            };
            state.position = Position::from_jump(beats, quarter_notes);
            let reconciliation = reconcile(update, &mut state);

            let outcome = if state.running {
                Some(boundary::check(&mut state, self.shared.settings.lead_ms))
            } else {
                None
            };
            (state.position, reconciliation, outcome)
        };

        if reconciliation.applied {
            debug!(
                "Position jump to qn {:.2} reconciled boundary bookkeeping",
                quarter_notes
            );
        } else {
            trace!("Position jump to qn {:.2} during forward play", quarter_notes);
        }
        if reconciliation.released {
            self.shared.release_marker();
        }
        if let Some(outcome) = outcome {
            self.shared.emit_outcome(&outcome);
        }
        self.shared.publish_position(position);
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.stop(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MockMidiEngine;
    use crate::sync::generator::ManualPulseTimer;

    fn controller() -> (SyncController, ManualPulseTimer, crate::midi::SentMessages) {
        let engine = MockMidiEngine::new();
        let sent = engine.sent_messages();
        let timer = ManualPulseTimer::new();
        let controller = SyncController::with_timer(engine, SyncSettings::default(), timer.clone());
        (controller, timer, sent)
    }

    #[test]
    fn test_marker_messages() {
        let marker = Marker::default();
        assert_eq!(
            marker.on(),
            MidiMessage::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100
            }
        );
        assert_eq!(
            marker.off(),
            MidiMessage::NoteOff {
                channel: 0,
                note: 60,
                velocity: 0
            }
        );
    }

    #[test]
    fn test_master_start_sends_start_then_clock() {
        let (controller, timer, sent) = controller();
        controller.start(true);
        assert_eq!(controller.transport_state(), TransportState::RunningMaster);
        assert_eq!(timer.interval(), Some(pulse_interval(120.0)));

        timer.pulse();
        let sent = sent.lock().unwrap();
        assert_eq!(sent[0], MidiMessage::Start);
        assert_eq!(sent[1], MidiMessage::Clock);
        assert_eq!(sent[2], Marker::default().on());
    }

    #[test]
    fn test_stop_quiesces_generator_and_releases_marker() {
        let (controller, timer, sent) = controller();
        controller.start(false);
        timer.pulse();
        assert!(controller.snapshot().note_active);

        controller.stop(true);
        assert!(!timer.is_active());
        assert!(!timer.pulse());

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.transport, TransportState::Stopped);
        assert_eq!(snapshot.position, Position::default());
        assert_eq!(snapshot.last_fired_boundary, -1);

        let sent = sent.lock().unwrap();
        let tail: Vec<_> = sent.iter().rev().take(2).rev().copied().collect();
        assert_eq!(tail, vec![Marker::default().off(), MidiMessage::Stop]);
    }

    #[test]
    fn test_stop_between_fire_and_send_leaves_marker_off() {
        let (controller, _, sent) = controller();
        let events = controller.subscribe();
        controller.handle_transport_start();

        // The input thread fires boundary 0 and drops the state lock...
        let outcome = {
            let mut state = controller.shared.lock_state();
            state.advance_one_pulse();
            boundary::check(&mut state, DEFAULT_LEAD_MS)
        };
        assert_eq!(outcome.fired.map(|f| f.boundary), Some(0));

        // ...a stop gets in before its note on goes out
        controller.stop(true);
        controller.shared.emit_outcome(&outcome);

        assert_eq!(
            sent.lock().unwrap().as_slice(),
            &[Marker::default().off(), MidiMessage::Stop]
        );
        assert!(!events
            .try_iter()
            .any(|e| matches!(e, SyncEvent::BoundaryFired(_))));
        assert!(!controller.shared.send_marker_on(0));
    }

    #[test]
    fn test_set_tempo_retimes_running_generator() {
        let (controller, timer, _) = controller();
        controller.start(false);
        assert!(controller.set_tempo(60.0));
        assert_eq!(timer.interval(), Some(pulse_interval(60.0)));
        assert!(!controller.set_tempo(f64::NAN));
        assert_eq!(controller.current_bpm(), 60.0);
    }

    #[test]
    fn test_external_start_ignored_while_master() {
        let (controller, _, _) = controller();
        controller.start(false);
        controller.handle_transport_start();
        assert_eq!(controller.transport_state(), TransportState::RunningMaster);

        // Incoming clock is counted but does not move the master position
        controller.handle_pulse();
        assert_eq!(controller.incoming_pulse_count(), 1);
        assert_eq!(controller.position().pulse_count, 0);
    }

    #[test]
    fn test_test_marker_only_while_stopped() {
        let (controller, _, sent) = controller();
        assert!(controller.send_test_marker(Duration::from_millis(1)));
        assert_eq!(sent.lock().unwrap().len(), 2);

        controller.handle_transport_start();
        assert!(!controller.send_test_marker(Duration::from_millis(1)));
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_locate_snaps_to_sixteenths() {
        let (controller, _, sent) = controller();
        controller.locate(6.3, true);
        let position = controller.position();
        assert_eq!(position.beats, 25);
        assert_eq!(position.quarter_notes, 6.25);
        assert_eq!(position.pulse_count, 150);
        assert_eq!(
            sent.lock().unwrap().as_slice(),
            &[MidiMessage::SongPositionPointer { position: 25 }]
        );
    }

    #[test]
    fn test_failed_sends_do_not_stop_the_engine() {
        let timer = ManualPulseTimer::new();
        let controller = SyncController::with_timer(
            MockMidiEngine::failing(),
            SyncSettings::default(),
            timer.clone(),
        );
        controller.start(true);
        assert_eq!(timer.pulses(96), 96);
        assert_eq!(controller.last_fired_boundary(), 1);
    }
}
